//! Error types for lead-outreach

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Bridge protocol error: {0}")]
    Bridge(String),

    #[error("QR rendering failed: {0}")]
    Qr(String),
}

pub type Result<T> = std::result::Result<T, Error>;
