//! Error types for xfe-io

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IoError>;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("Missing data slot {slot}")]
    MissingSlot { slot: u16 },

    #[error("Data slot {slot} holds {actual} values, expected {expected}")]
    SlotLength {
        slot: u16,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported restart schema version {0}")]
    SchemaVersion(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_the_slot() {
        let err = IoError::SlotLength {
            slot: 3,
            expected: 6,
            actual: 2,
        };
        let text = format!("{err}");
        assert!(text.contains("slot 3"));
        assert!(text.contains("expected 6"));
    }
}
