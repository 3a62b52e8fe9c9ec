use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::source::ImageId;

pub type Result<T> = std::result::Result<T, ThumbError>;

/// Failures raised by the thumbnail subsystem.
///
/// Everything except `Config` is scoped to a single image and is reported,
/// never propagated past the record it belongs to.
#[derive(Debug, Error)]
pub enum ThumbError {
    #[error("cannot extract thumbnail for {id}: {reason}")]
    Extraction { id: ImageId, reason: String },

    #[error("thumbnail cache I/O failed at {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("thumbnail cache entry {} is unreadable: {reason}", path.display())]
    CacheFormat { path: PathBuf, reason: String },

    #[error("invalid thumbnail configuration: {0}")]
    Config(String),

    #[error("duplicate generation in flight for {id}")]
    RaceAnomaly { id: ImageId },
}

impl ThumbError {
    pub fn extraction(id: &ImageId, reason: impl ToString) -> Self {
        ThumbError::Extraction {
            id: id.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn cache_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ThumbError::CacheIo {
            path: path.into(),
            source,
        }
    }

    /// Only configuration errors stop the subsystem from starting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ThumbError::Config(_))
    }
}
