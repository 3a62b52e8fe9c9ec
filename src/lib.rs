//! Thumbnail management for an image viewer: one record per image in the
//! open collection, background generation with an on-disk cache, debounced
//! regeneration on change, grid layout, highlighting and auto-scroll.

pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod grid;
pub mod highlight;
pub mod record;
pub mod registry;
pub mod scroll;
pub mod source;
pub mod worker;

pub use cache::ThumbCache;
pub use config::ThumbConfig;
pub use error::{Result, ThumbError};
pub use highlight::FocusSnapshot;
pub use record::{ThumbStatus, ThumbnailRecord};
pub use registry::{Notice, Registry, SourceEvent};
pub use source::{ContentSignature, Extractor, FileExtractor, ImageId};
