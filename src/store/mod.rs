//! Persistence for the tracker document.

pub mod document;
pub mod file;
pub mod github;
pub mod traits;

pub use document::{SchoolState, SchoolStatus, TrackerDocument};
pub use file::FileStore;
pub use github::GitHubStore;
pub use traits::{DocumentLocation, DocumentStore, LoadedDocument, VersionToken};
