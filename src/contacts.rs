//! Contact ledger - load, lookup, mutate and snapshot campaign contacts

use crate::config::{Config, CHAT_SUFFIX};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// One lead in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(default)]
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub sent: bool,
    #[serde(default)]
    pub responded: bool,
}

impl ContactRecord {
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
            sent: false,
            responded: false,
        }
    }

    /// Canonical chat target for this contact
    pub fn chat_id(&self) -> String {
        to_chat_id(&self.number)
    }

    /// Whether an inbound channel address belongs to this contact
    pub fn matches_address(&self, address: &str) -> bool {
        let key = if self.number.contains('@') {
            self.number.clone()
        } else {
            normalize_number(&self.number)
        };
        !key.is_empty() && address.contains(&key)
    }
}

/// A CSV row as it comes from the source list
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    number: Option<String>,
}

/// Ledger counts for status output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSummary {
    pub total: usize,
    pub sent: usize,
    pub responded: usize,
    pub pending: usize,
}

impl LedgerSummary {
    pub fn of(contacts: &[ContactRecord]) -> Self {
        let sent = contacts.iter().filter(|c| c.sent).count();
        Self {
            total: contacts.len(),
            sent,
            responded: contacts.iter().filter(|c| c.responded).count(),
            pending: contacts.len() - sent,
        }
    }
}

/// Persistent contact list backed by a JSON ledger and a backup directory
pub struct ContactStore {
    ledger_path: PathBuf,
    backup_dir: PathBuf,
    csv_path: PathBuf,
    contacts: Vec<ContactRecord>,
}

impl ContactStore {
    pub fn new(config: &Config) -> Self {
        Self {
            ledger_path: config.ledger_file.clone(),
            backup_dir: config.backup_dir.clone(),
            csv_path: config.contacts_csv.clone(),
            contacts: Vec::new(),
        }
    }

    /// Parse the ledger file without ingesting or writing anything.
    ///
    /// Returns `None` when no ledger file exists.
    pub fn read_ledger(&self) -> Result<Option<Vec<ContactRecord>>> {
        if !self.ledger_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.ledger_path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Load the ledger, ingesting the CSV source when no ledger exists yet
    pub fn load(&mut self) -> Result<usize> {
        if self.ledger_path.exists() {
            let content = fs::read_to_string(&self.ledger_path)?;
            let contacts: Vec<ContactRecord> = serde_json::from_str(&content)?;
            if !contacts.is_empty() {
                self.contacts = contacts;
                debug!(
                    "Loaded {} contacts from {}",
                    self.contacts.len(),
                    self.ledger_path.display()
                );
                return Ok(self.contacts.len());
            }
            info!("Ledger {} is empty, ingesting source list", self.ledger_path.display());
        }

        self.import_csv()
    }

    /// Replace the in-memory list with a fresh CSV ingestion and persist it
    pub fn import_csv(&mut self) -> Result<usize> {
        self.contacts = ingest_csv(&self.csv_path)?;
        info!(
            "Ingested {} contacts from {}",
            self.contacts.len(),
            self.csv_path.display()
        );
        self.save()?;
        Ok(self.contacts.len())
    }

    /// Save ledger to disk atomically
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.ledger_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temp file in same directory (for atomic rename)
        let parent = self.ledger_path.parent().unwrap_or(Path::new("."));
        let mut temp = NamedTempFile::new_in(parent)?;

        let json = serde_json::to_string_pretty(&self.contacts)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;

        temp.persist(&self.ledger_path).map_err(|e| Error::Io(e.error))?;

        Ok(())
    }

    /// Copy the current ledger file into the backup directory
    pub fn backup(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir)?;
        let snapshot = fs::read(&self.ledger_path)?;
        let stamp = Utc::now().timestamp_millis();

        // Several mutations can land in the same millisecond; never overwrite
        let mut attempt = 0u32;
        loop {
            let file_name = if attempt == 0 {
                format!("contacts_{}.json", stamp)
            } else {
                format!("contacts_{}_{}.json", stamp, attempt)
            };
            let path = self.backup_dir.join(file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&snapshot)?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Persist then back up, in that order
    fn commit(&self) -> Result<()> {
        self.save()?;
        self.backup()?;
        Ok(())
    }

    /// Find the contact an inbound channel address belongs to
    pub fn find_by_address(&self, address: &str) -> Option<&ContactRecord> {
        self.contacts.iter().find(|c| c.matches_address(address))
    }

    /// Get contact by its ledger number
    pub fn get(&self, number: &str) -> Option<&ContactRecord> {
        self.contacts.iter().find(|c| c.number == number)
    }

    /// Mark a contact as having received the campaign message.
    ///
    /// Returns `Ok(false)` when the flag was already set. The in-memory flag is
    /// updated even when persisting fails.
    pub fn mark_sent(&mut self, number: &str) -> Result<bool> {
        let contact = self
            .contacts
            .iter_mut()
            .find(|c| c.number == number)
            .ok_or_else(|| Error::ContactNotFound(number.to_string()))?;
        if contact.sent {
            return Ok(false);
        }
        contact.sent = true;
        self.commit()?;
        Ok(true)
    }

    /// Mark a contact as having received the auto-reply
    pub fn mark_responded(&mut self, number: &str) -> Result<bool> {
        let contact = self
            .contacts
            .iter_mut()
            .find(|c| c.number == number)
            .ok_or_else(|| Error::ContactNotFound(number.to_string()))?;
        if contact.responded {
            return Ok(false);
        }
        contact.responded = true;
        self.commit()?;
        Ok(true)
    }

    /// Contacts not yet sent the campaign message, in ledger order
    pub fn unsent(&self) -> impl Iterator<Item = &ContactRecord> {
        self.contacts.iter().filter(|c| !c.sent)
    }

    /// All contacts in ledger order
    pub fn all(&self) -> &[ContactRecord] {
        &self.contacts
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary::of(&self.contacts)
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// Read contacts from a CSV file with `name` and `number` columns.
///
/// Rows without a usable number are skipped, as are repeats of a number
/// already seen. A missing or unreadable file is an error.
pub fn ingest_csv(path: &Path) -> Result<Vec<ContactRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| Error::Ingestion(format!("{}: {}", path.display(), e)))?;

    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h == "number") {
        return Err(Error::Ingestion(format!(
            "{}: missing 'number' column",
            path.display()
        )));
    }

    let mut seen = HashSet::new();
    let mut contacts = Vec::new();

    for (idx, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping malformed row {}: {}", idx + 2, e);
                continue;
            }
        };

        let number = match row.number {
            Some(n) if !normalize_number(&n).is_empty() => n,
            _ => {
                debug!("Skipping row {} without a number", idx + 2);
                continue;
            }
        };

        // Spellings of one number share a chat target
        if !seen.insert(to_chat_id(&number)) {
            warn!("Skipping duplicate number {} on row {}", number, idx + 2);
            continue;
        }

        contacts.push(ContactRecord::new(row.name.unwrap_or_default(), number));
    }

    Ok(contacts)
}

/// Strip a phone number down to its digits
pub fn normalize_number(number: &str) -> String {
    number.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Convert a ledger number into the channel's one-to-one chat target
pub fn to_chat_id(number: &str) -> String {
    if number.contains(CHAT_SUFFIX) {
        number.to_string()
    } else {
        format!("{}{}", normalize_number(number), CHAT_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_csv(temp_dir: &TempDir, csv: &str) -> ContactStore {
        let config = Config::for_test(temp_dir.path());
        fs::write(&config.contacts_csv, csv).unwrap();
        ContactStore::new(&config)
    }

    fn backup_count(temp_dir: &TempDir) -> usize {
        match fs::read_dir(temp_dir.path().join("backups")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("+91 98765-43210"), "919876543210");
        assert_eq!(normalize_number("919876543210"), "919876543210");
        assert_eq!(normalize_number("n/a"), "");
    }

    #[test]
    fn test_to_chat_id() {
        assert_eq!(to_chat_id("919876543210"), "919876543210@c.us");
        assert_eq!(to_chat_id("+91 98765 43210"), "919876543210@c.us");
        assert_eq!(to_chat_id("919876543210@c.us"), "919876543210@c.us");
    }

    #[test]
    fn test_matches_address_substring() {
        let contact = ContactRecord::new("Asha", "919876543210");
        assert!(contact.matches_address("919876543210@c.us"));
        assert!(!contact.matches_address("911111111111@c.us"));

        let formatted = ContactRecord::new("Asha", "+91 98765 43210");
        assert!(formatted.matches_address("919876543210@c.us"));
    }

    #[test]
    fn test_ingest_skips_rows_without_number() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("contacts.csv");
        fs::write(
            &path,
            "name,number\nAsha,919876543210\nNo Number,\n,919876543211\nBad,abc\n",
        )
        .unwrap();

        let contacts = ingest_csv(&path).unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].name, "Asha");
        assert_eq!(contacts[1].name, "");
        assert!(contacts.iter().all(|c| !c.sent && !c.responded));
    }

    #[test]
    fn test_ingest_number_only_column() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("contacts.csv");
        fs::write(&path, "number\n919876543210\n919876543211\n").unwrap();

        let contacts = ingest_csv(&path).unwrap();
        assert_eq!(contacts.len(), 2);
        assert!(contacts.iter().all(|c| c.name.is_empty()));
    }

    #[test]
    fn test_ingest_dedupes_numbers() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("contacts.csv");
        fs::write(&path, "name,number\nA,919876543210\nB,919876543210\n").unwrap();

        let contacts = ingest_csv(&path).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "A");
    }

    #[test]
    fn test_ingest_dedupes_spellings_of_one_number() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("contacts.csv");
        fs::write(&path, "name,number\nA,919876543210\nA2,+91 98765 43210\n").unwrap();

        let contacts = ingest_csv(&path).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "A");
    }

    #[test]
    fn test_ingest_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = ingest_csv(&temp_dir.path().join("nope.csv"));
        assert!(matches!(result, Err(Error::Ingestion(_))));
    }

    #[test]
    fn test_ingest_without_number_column_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("contacts.csv");
        fs::write(&path, "name,phone\nAsha,919876543210\n").unwrap();
        assert!(matches!(ingest_csv(&path), Err(Error::Ingestion(_))));
    }

    #[test]
    fn test_load_ingests_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(&temp_dir, "name,number\nAsha,919876543210\n");

        assert_eq!(store.load().unwrap(), 1);
        assert!(store.ledger_path().exists());

        // Second load reads the ledger, not the CSV
        fs::write(temp_dir.path().join("contacts.csv"), "name,number\n").unwrap();
        let mut store2 = ContactStore::new(&Config::for_test(temp_dir.path()));
        assert_eq!(store2.load().unwrap(), 1);
        assert_eq!(store2.all()[0].number, "919876543210");
    }

    #[test]
    fn test_load_empty_ledger_reingests() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(&temp_dir, "name,number\nAsha,919876543210\n");
        fs::write(temp_dir.path().join("contacts.json"), "[]").unwrap();

        assert_eq!(store.load().unwrap(), 1);
    }

    #[test]
    fn test_read_ledger_never_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_csv(&temp_dir, "name,number\nAsha,919876543210\n");
        assert!(store.read_ledger().unwrap().is_none());
        assert!(!store.ledger_path().exists());

        fs::write(store.ledger_path(), "[]").unwrap();
        assert_eq!(store.read_ledger().unwrap(), Some(Vec::new()));
        assert_eq!(fs::read_to_string(store.ledger_path()).unwrap(), "[]");
    }

    #[test]
    fn test_load_corrupt_ledger_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(&temp_dir, "name,number\nAsha,919876543210\n");
        fs::write(temp_dir.path().join("contacts.json"), "{ not json").unwrap();

        assert!(matches!(store.load(), Err(Error::Json(_))));
    }

    #[test]
    fn test_mark_sent_is_monotonic_and_backed_up() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(&temp_dir, "name,number\nAsha,919876543210\n");
        store.load().unwrap();

        assert!(store.mark_sent("919876543210").unwrap());
        assert!(!store.mark_sent("919876543210").unwrap());
        assert!(store.get("919876543210").unwrap().sent);
        assert_eq!(backup_count(&temp_dir), 1);

        let mut reloaded = ContactStore::new(&Config::for_test(temp_dir.path()));
        reloaded.load().unwrap();
        assert!(reloaded.all()[0].sent);
        assert!(!reloaded.all()[0].responded);
    }

    #[test]
    fn test_failed_backup_keeps_flag_in_memory() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(&temp_dir, "name,number\nAsha,919876543210\n");
        store.load().unwrap();
        // A file where the backup directory should be
        fs::write(temp_dir.path().join("backups"), "").unwrap();

        assert!(store.mark_sent("919876543210").is_err());
        assert!(store.get("919876543210").unwrap().sent);
        assert!(!store.mark_sent("919876543210").unwrap());
    }

    #[test]
    fn test_mark_responded_unknown_contact() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(&temp_dir, "name,number\nAsha,919876543210\n");
        store.load().unwrap();

        let result = store.mark_responded("910000000000");
        assert!(matches!(result, Err(Error::ContactNotFound(_))));
        assert_eq!(backup_count(&temp_dir), 0);
    }

    #[test]
    fn test_backups_never_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(
            &temp_dir,
            "name,number\nA,919876543210\nB,919876543211\nC,919876543212\n",
        );
        store.load().unwrap();

        store.mark_sent("919876543210").unwrap();
        store.mark_sent("919876543211").unwrap();
        store.mark_responded("919876543210").unwrap();

        assert_eq!(backup_count(&temp_dir), 3);
    }

    #[test]
    fn test_find_by_address() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(&temp_dir, "name,number\nAsha,919876543210\n");
        store.load().unwrap();

        assert_eq!(
            store.find_by_address("919876543210@c.us").map(|c| c.name.as_str()),
            Some("Asha")
        );
        assert!(store.find_by_address("15551234567@c.us").is_none());
    }

    #[test]
    fn test_summary() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with_csv(
            &temp_dir,
            "name,number\nA,919876543210\nB,919876543211\nC,919876543212\n",
        );
        store.load().unwrap();
        store.mark_sent("919876543210").unwrap();
        store.mark_responded("919876543210").unwrap();

        let summary = store.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.responded, 1);
        assert_eq!(summary.pending, 2);
    }
}
