//! Local media library: content-addressed import, tag/metadata index with
//! full-text search and smart folders, and byte-range serving of stored files.

pub mod database;
pub mod error;
pub mod ingest;
pub mod library;
pub mod media;
pub mod server;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use database::models::{
    DuplicateGroup, MediaDetails, MediaSummary, MediaTagInfo, MetaPatch, SmartFolder,
    SmartFolderPatch, Tag, TagSource,
};
pub use database::query::{SearchParams, SmartRule};
pub use database::repo::MetadataStore;
pub use error::{LibraryError, Result};
pub use ingest::import::{ImportControl, ImportEvent, ImportOutcome, ImportSummary, SkipReason};
pub use library::{AiInput, AiSuggestion, Capabilities, Library, LibraryStatus, Session};
pub use server::{ByteRange, MediaBody, MediaResolver, MediaResource, MediaServer, ResolvedFile};
