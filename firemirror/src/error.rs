//! Errors returned by the walkers and their collaborators
//!
use std::path::PathBuf;

use snafu::prelude::*;

use crate::address::Address;

/// Errors raised while backing up or restoring a mirror.
///
/// Every variant names the database address or filesystem path it concerns.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MirrorError {
    /// A mirror directory could not be created.
    #[snafu(display("Unable to create backup path {}: {source}", path.display()))]
    PathCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A document's fields could not be converted to an artifact.
    #[snafu(display("Unable to serialize document '{address}': {source}"))]
    Serialization {
        address: Address,
        source: ArtifactError,
    },

    /// An artifact file could not be written.
    #[snafu(display("Unable to write document artifact {}: {source}", path.display()))]
    ArtifactWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An artifact file could not be read.
    #[snafu(display("Unable to read document artifact {}: {source}", path.display()))]
    ArtifactRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An artifact file was read but its contents are not a valid artifact.
    #[snafu(display("Invalid document artifact {}: {source}", path.display()))]
    ArtifactDecode { path: PathBuf, source: ArtifactError },

    /// A file in the mirror does not map back to a document address.
    #[snafu(display("{source}"))]
    Path { source: PathError },

    /// Listing collections or documents in the source database failed.
    #[snafu(display("Unable to read '{address}' from database: {source}"))]
    DatabaseRead { address: String, source: StoreError },

    /// Writing a document to the target database failed.
    #[snafu(display("Unable to write document '{address}' to database: {source}"))]
    DatabaseWrite { address: Address, source: StoreError },

    /// A directory below the mirror root could not be listed.
    #[snafu(display("Unable to read mirror directory {}: {source}", path.display()))]
    DirectoryRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The root of the mirror could not be listed. Fatal for restore.
    #[snafu(display("Unable to read backup path {}: {source}", path.display()))]
    MirrorRoot {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<PathError> for MirrorError {
    fn from(source: PathError) -> Self {
        Self::Path { source }
    }
}

/// Errors from building addresses and mapping them to and from paths.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PathError {
    /// Segments are empty or contain the database path separator.
    #[snafu(display("Invalid address {segments:?}: {reason}"))]
    InvalidAddress {
        segments: Vec<String>,
        reason: String,
    },

    /// A mirror path does not decode to a document address.
    #[snafu(display("Malformed mirror path {}: {reason}", path.display()))]
    MalformedPath { path: PathBuf, reason: String },
}

/// Errors from the artifact serializer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArtifactError {
    /// A field value cannot be represented in an artifact.
    #[snafu(display("field '{field}': {reason}"))]
    Unrepresentable { field: String, reason: String },

    /// A field was present in the artifact but is not a valid encoding.
    #[snafu(display("field '{field}': {reason}"))]
    InvalidField { field: String, reason: String },

    /// The artifact is not a JSON object.
    #[snafu(display("JSON: {source}"))]
    Json { source: serde_json::Error },

    /// The artifact parsed as JSON, but the root is not an object.
    #[snafu(display("artifact root must be a JSON object"))]
    NotAnObject,
}

/// Errors returned by a `DocumentStore`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Http connection or timeout error
    #[snafu(display("HTTP error {method} url:{url}"))]
    Http {
        method: String,
        url: String,
        source: reqwest::Error,
    },

    /// Server responded with an error status.
    #[snafu(display("Server reported error ({status}) {method} {url}: {message}"))]
    Api {
        status: u16,
        method: String,
        url: String,
        message: String,
    },

    /// Server error on a retryable request, and all retry attempts failed.
    #[snafu(display("request failed {n} times: {message}"))]
    TooManyRetries { n: u32, message: String },

    /// Credentials could not be loaded or exchanged for an access token.
    #[snafu(display("Authentication failed: {message}"))]
    Auth { message: String },

    /// A server response could not be deserialized.
    #[snafu(display("Deserialization at {path}: {source}"))]
    Deserialization {
        path: String,
        source: serde_json::Error,
    },

    /// A document returned by the server holds a value this tool cannot represent.
    #[snafu(display("Unsupported value in {document}: {message}"))]
    UnsupportedValue { document: String, message: String },

    /// The addressed collection or document does not exist.
    #[snafu(display("{address} not found"))]
    NotFound { address: String },

    /// Some other error occurred
    #[snafu(display("{message}"))]
    Other { message: String },
}

/// Errors loading service-account credentials.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CredentialsError {
    /// Problem reading the credentials file
    #[snafu(display("credentials file {}: {source}", path.display()))]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Credentials file is not valid JSON or misses required keys
    #[snafu(display("credentials file {}: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A key required for token exchange is missing or empty
    #[snafu(display("credentials missing '{key}'"))]
    Missing { key: String },
}

impl From<CredentialsError> for StoreError {
    fn from(source: CredentialsError) -> Self {
        Self::Auth {
            message: source.to_string(),
        }
    }
}
