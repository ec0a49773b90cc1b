//! Configuration and paths

use std::path::{Path, PathBuf};
use std::time::Duration;

/// All configurable paths and constants
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub contacts_csv: PathBuf,
    pub ledger_file: PathBuf,
    pub backup_dir: PathBuf,
    /// Session store kept by the bridge; delete it to re-pair after an auth failure
    pub session_dir: PathBuf,
    /// Program that owns the chat connection. No bridge ships with this crate.
    ///
    /// The default runs `node bridge.js` from `base_dir`, a wrapper the operator
    /// provides around a WhatsApp Web client library. Any executable works if it
    /// speaks NDJSON over stdio, one JSON object per line:
    ///
    /// - stdin requests `{"id": u64, "method": .., "params": {..}}` for
    ///   `send_message {chat_id, text}`, `is_registered_user {chat_id}` (result is
    ///   a bool), `send_presence_available {}` and `unread_conversations {}`
    ///   (result is `[{chat_id, messages: [{from, body, from_me}]}]`)
    /// - stdout responses `{"id", "ok", "result"?, "error"?}`
    /// - stdout events `{"event": "qr", "qr"}`, `{"event": "ready"}`,
    ///   `{"event": "message", "from", "body", "from_me"?}`,
    ///   `{"event": "auth_failure", "message"?}` and
    ///   `{"event": "disconnected", "reason"?}`
    ///
    /// Anything on stderr passes through to the terminal.
    pub bridge_command: PathBuf,
    pub bridge_args: Vec<String>,
    pub max_messages: usize,
    pub base_delay: Duration,
    pub max_jitter: Duration,
    pub settle_delay: Duration,
    pub presence_delay: Duration,
    pub campaign_messages: Vec<String>,
    pub main_message: String,
    pub interest_keywords: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::in_dir(Path::new("."))
    }
}

impl Config {
    /// Config with every path rooted at `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            base_dir: dir.to_path_buf(),
            contacts_csv: dir.join("contacts.csv"),
            ledger_file: dir.join("contacts.json"),
            backup_dir: dir.join("backups"),
            session_dir: dir.join(".wwebjs_auth"),
            bridge_command: PathBuf::from("node"),
            bridge_args: vec![dir.join("bridge.js").to_string_lossy().into_owned()],
            max_messages: MAX_MESSAGES,
            base_delay: BASE_DELAY,
            max_jitter: MAX_JITTER,
            settle_delay: SETTLE_DELAY,
            presence_delay: PRESENCE_DELAY,
            campaign_messages: CAMPAIGN_MESSAGES.iter().map(|m| m.to_string()).collect(),
            main_message: MAIN_MESSAGE.to_string(),
            interest_keywords: INTEREST_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &Path) -> Self {
        Self {
            bridge_command: PathBuf::from("/bin/false"),
            bridge_args: Vec::new(),
            ..Self::in_dir(temp_dir)
        }
    }
}

/// Campaign messages sent per process run
pub const MAX_MESSAGES: usize = 5;

/// Spacing between consecutive campaign sends
pub const BASE_DELAY: Duration = Duration::from_secs(60 * 60);

/// Upper bound (exclusive) of the random jitter added to each spacing
pub const MAX_JITTER: Duration = Duration::from_secs(30 * 60);

/// Pause after the registration check, before presence
pub const SETTLE_DELAY: Duration = Duration::from_millis(3000);

/// Pause between presence and the actual send
pub const PRESENCE_DELAY: Duration = Duration::from_millis(1500);

/// Suffix of a one-to-one chat target on the channel
pub const CHAT_SUFFIX: &str = "@c.us";

pub const CAMPAIGN_MESSAGES: &[&str] = &[
    "Namaste! ✨ Main ThinkNew channel se Rohit.\nEk giveaway chal raha hai jisme weekly & monthly jeetne ka moka hai.\n\nAgar aap interested ho to reply karein — \"send\" ya \"ok\" likh ke send kre 🙂",
];

pub const MAIN_MESSAGE: &str = "🏯 ThinkNew Mega Giveaway Live!\n\n👉 Har week 50 log jeette hain ₹500 tak\n👉 Har mahine 1 MEGA winner ko ₹10,000!\n\n📣 Winners declare hote hain Sunday aur Wednesday ko\n🔗 Entry link: https://giveawayprogram.netlify.app/\n\n💡 Mera number save zarur karein — jeetne par update yahin milega!";

/// Lowercase substrings that mark a reply as interested
pub const INTEREST_KEYWORDS: &[&str] = &[
    "interested",
    "i am interested",
    "haan",
    "send",
    "i'm in",
    "yes",
    "ok",
    "sure",
    "ready",
    "lets go",
    "done",
    "done it",
    "joined",
    "ho gaya",
];
