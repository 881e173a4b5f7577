//! Error types for KilnDB.

use crate::page::PageId;
use crate::types::KeyType;
use thiserror::Error;

/// Result type alias using KilnError.
pub type Result<T> = std::result::Result<T, KilnError>;

/// Errors that can occur in KilnDB operations.
#[derive(Debug, Error)]
pub enum KilnError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("unknown file id: {0}")]
    UnknownFile(u32),

    #[error("page not found: {0}")]
    PageNotFound(PageId),

    #[error("page not resident in buffer pool: {0}")]
    PageNotResident(PageId),

    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page full, unable to insert record")]
    PageFull,

    #[error("record of {size} bytes exceeds page capacity of {max}")]
    RecordTooLarge { size: usize, max: usize },

    #[error("record of {len} bytes too short for key at offset {offset}")]
    ShortRecord { offset: usize, len: usize },

    #[error("page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: PageId, reason: String },

    // Index errors
    #[error("index meta does not match constructor arguments: {0}")]
    BadIndexInfo(String),

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(KeyType),

    #[error("scan operator not in the permitted set")]
    BadOpcodes,

    #[error("scan range low bound exceeds high bound")]
    BadScanrange,

    #[error("no key satisfies the scan criteria")]
    NoSuchKeyFound,

    #[error("no scan has been initialized")]
    ScanNotInitialized,

    #[error("index scan has returned all qualifying entries")]
    IndexScanCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: KilnError = io_err.into();
        assert!(matches!(err, KilnError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = KilnError::PageNotFound(PageId::new(1, 42));
        assert_eq!(err.to_string(), "page not found: 1:42");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = KilnError::BufferPoolFull;
        assert_eq!(
            err.to_string(),
            "buffer pool full, unable to allocate frame"
        );
    }

    #[test]
    fn test_record_errors_display() {
        let err = KilnError::RecordTooLarge {
            size: 9000,
            max: 8150,
        };
        assert_eq!(
            err.to_string(),
            "record of 9000 bytes exceeds page capacity of 8150"
        );

        let err = KilnError::ShortRecord { offset: 12, len: 8 };
        assert_eq!(
            err.to_string(),
            "record of 8 bytes too short for key at offset 12"
        );
    }

    #[test]
    fn test_index_errors_display() {
        assert_eq!(
            KilnError::BadIndexInfo("rel.4".to_string()).to_string(),
            "index meta does not match constructor arguments: rel.4"
        );
        assert_eq!(
            KilnError::UnsupportedKeyType(KeyType::Text).to_string(),
            "unsupported key type: TEXT"
        );
        assert_eq!(
            KilnError::BadOpcodes.to_string(),
            "scan operator not in the permitted set"
        );
        assert_eq!(
            KilnError::BadScanrange.to_string(),
            "scan range low bound exceeds high bound"
        );
        assert_eq!(
            KilnError::NoSuchKeyFound.to_string(),
            "no key satisfies the scan criteria"
        );
        assert_eq!(
            KilnError::ScanNotInitialized.to_string(),
            "no scan has been initialized"
        );
        assert_eq!(
            KilnError::IndexScanCompleted.to_string(),
            "index scan has returned all qualifying entries"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(7)
        }

        fn returns_err() -> Result<i32> {
            Err(KilnError::BadOpcodes)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KilnError>();
    }
}
