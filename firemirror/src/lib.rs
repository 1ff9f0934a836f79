/*
 * firemirror - mirror a Firestore document tree to the filesystem and back
 *
 * SPDX-FileCopyrightText: 2025-2026 Steve Schoettler
 * SPDX-License-Identifier: Apache-2.0
 */
//! # firemirror
//!
//! Walks a hierarchical document database (collections containing documents,
//! documents containing sub-collections) and materializes it as a directory tree
//! of JSON files, and walks such a tree to replay the documents into a database.
//!
//! ## Layout on disk
//!
//! ```text
//! <root>/Users/u1.json             document Users/u1
//! <root>/Users/u1/Orders/o1.json   document Users/u1/Orders/o1
//! <root>/Users/u2.json             document Users/u2 (no sub-collections, no directory)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use firemirror::prelude::*;
//! # async fn example() -> Result<(), MirrorError> {
//! let source = MemoryStore::new();
//! let codec = PathCodec::new("/tmp/mirror");
//! let report = BackupWalker::new(&source, &LocalFs, &codec, BackupOptions::default())
//!     .run()
//!     .await?;
//! println!("{} documents", report.documents);
//!
//! let target = MemoryStore::new();
//! let report = RestoreWalker::new(&target, &LocalFs, &codec, RestoreOptions::default())
//!     .run()
//!     .await?;
//! assert!(report.is_complete());
//! # Ok(())
//! # }
//! ```
//!
//! The database and filesystem are reached only through the [`store::DocumentStore`]
//! and [`fs::MirrorFs`] traits, so walkers can be pointed at any pair of
//! source/destination handles, including in-memory fakes.
//!
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::default_trait_access)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::explicit_iter_loop)]
#![warn(clippy::implicit_clone)]
#![warn(clippy::literal_string_with_formatting_args)]
#![warn(clippy::match_same_arms)]
#![warn(clippy::option_if_let_else)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::ref_option)]
#![warn(clippy::redundant_closure)]
#![warn(clippy::uninlined_format_args)]
#![warn(clippy::unnecessary_wraps)]
#![warn(clippy::unused_async)]

pub mod address;
pub mod artifact;
pub mod backup;
pub mod codec;
pub mod error;
pub mod firestore;
pub mod fs;
#[doc(hidden)]
pub mod memory;
pub mod restore;
pub mod sequential;
pub mod store;
pub mod value;

/// Result type alias using `MirrorError` as the default error.
pub type Result<T, E = crate::error::MirrorError> = std::result::Result<T, E>;

/// Prelude module - import the common types with `use firemirror::prelude::*;`
pub mod prelude {
    pub use crate::error::*;
    pub use crate::{
        // Addressing
        address::{Address, AddressKind},
        // Serializer
        artifact::{ArtifactFormat, from_artifact, to_artifact},
        // Walkers
        backup::{BackupOptions, BackupReport, BackupWalker},
        codec::PathCodec,
        // Firestore backend
        firestore::{Credentials, FirestoreClient, FirestoreConfig},
        // Filesystem collaborator
        fs::{DirEntry, EntryKind, LocalFs, MirrorFs},
        memory::MemoryStore,
        restore::{RestoreFailure, RestoreOptions, RestoreReport, RestoreWalker},
        // Sequential driver
        sequential::{ExecutionPolicy, SequentialOutcome, Task, run_sequential, task},
        // Database collaborator
        store::{DocumentSnapshot, DocumentStore},
        // Values
        value::{FieldMap, FieldValue},
    };
}

// ============================================================================
// CONSTANTS
// ============================================================================

/// File extension of a document artifact, without the dot.
pub const ARTIFACT_EXTENSION: &str = "json";

/// Reserved key marking a tagged (non JSON-native) value inside an artifact.
pub const TYPE_TAG_KEY: &str = "__type__";

/// Key holding the payload of a tagged value.
pub const TYPE_VALUE_KEY: &str = "value";

/// Maximum nesting of arrays and maps inside one field.
/// Deeper values would produce JSON the parser refuses to read back.
pub const MAX_NESTING_DEPTH: usize = 100;

pub mod config {
    /// Environment variable naming a local Firestore emulator (`host:port`).
    pub const FIRESTORE_EMULATOR_HOST_ENV: &str = "FIRESTORE_EMULATOR_HOST";

    /// Firestore REST endpoint
    pub const FIRESTORE_API_URL: &str = "https://firestore.googleapis.com/v1/";

    /// Name of the default database in a project
    pub const DEFAULT_DATABASE: &str = "(default)";

    /// Documents or collection ids requested per page
    pub const DEFAULT_PAGE_SIZE: u32 = 300;

    /// Max retries for HTTP client
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// OAuth scope granting read/write access to Firestore
    pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

    /// Token endpoint used when a key file does not name one
    pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

    pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

    /// Lifetime requested for signed assertions (seconds).
    pub const TOKEN_LIFETIME_SECS: i64 = 3600;

    /// Refresh cached access tokens this long before they expire (seconds).
    pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

    /// Bearer token accepted by the emulator with full access
    pub const EMULATOR_TOKEN: &str = "owner";

    /// Trace target for request and response bodies.
    /// Enable with `RUST_LOG=firemirror::http_json=trace`.
    pub const HTTP_JSON_TARGET: &str = "firemirror::http_json";
}
