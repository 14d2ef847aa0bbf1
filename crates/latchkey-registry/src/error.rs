use thiserror::Error;

/// Storage-specific error types for the device registry and pending log.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing a backing file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A registry line is not a valid device record
    #[error("Corrupt record on line {line}: {source}")]
    CorruptRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_record_display() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = StorageError::CorruptRecord { line: 3, source };
        assert!(error.to_string().starts_with("Corrupt record on line 3:"));
    }
}
