//! Durable fragment storage for Recollect.
//!
//! This crate owns everything that touches disk: the fragment data model,
//! input validation, the versioned payload codec and the SQLite store that
//! commits fragments in atomic batches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  FragmentStore                                                          │
//! │  - Single SQLite file in WAL mode                                       │
//! │  - fragments: payload BLOB + type, confidence, created_at, last_evolved │
//! │  - fragment_metadata: JSON tag/link/access columns                      │
//! │  - meta: codec version marker                                           │
//! │  - One writer connection, one read-only snapshot connection             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use recollect_store::{Fragment, FragmentStore};
//!
//! let store = FragmentStore::open("/tmp/recollect/fragments.db")?;
//!
//! let fragment = Fragment::new("Watered the basil", "garden").with_tag("plants");
//! store.batch_commit(&[fragment.clone()])?;
//!
//! let loaded = store.get_fragment(&fragment.id)?;
//! assert_eq!(loaded, Some(fragment));
//! # Ok::<(), recollect_store::StoreError>(())
//! ```

pub mod backend;
pub mod codec;
pub mod error;
pub mod store;
pub mod types;
pub mod validation;

// Re-export backend trait
pub use backend::FragmentBackend;

// Re-export codec
pub use codec::{CODEC_VERSION, CodecError, MetadataRecord};

// Re-export error types
pub use error::{Result, StoreError};

// Re-export store
pub use store::{
    CODEC_VERSION_KEY, CommitReport, FragmentStore, FragmentSummary, MetadataUpdate, StoreOptions,
    StoreStats,
};

// Re-export types
pub use types::{
    AccessPattern, Fragment, FragmentContent, FragmentId, FragmentInput, FragmentType,
    TemporalTags,
};

// Re-export validation
pub use validation::{MAX_ASSOCIATIVE_LINKS, ValidationError, validate_fragment};
