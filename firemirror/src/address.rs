//! Database addresses.
//!
//! An [`Address`] is the ordered list of segments
//! `[collection, document, collection, document, ...]` that locates a node in the
//! database tree. An odd number of segments names a collection, an even number
//! names a document.
//!
use std::fmt;

use crate::error::{InvalidAddressSnafu, PathError};

/// Separator between segments in the database's own path syntax (`Users/u1`).
pub const SEGMENT_SEPARATOR: char = '/';

/// Whether an address names a collection or a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AddressKind {
    Collection,
    Document,
}

/// Location of a collection or document in the database tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    segments: Vec<String>,
}

impl Address {
    /// Address of a root collection.
    pub fn collection(id: impl Into<String>) -> Result<Self, PathError> {
        Self::from_segments(vec![id.into()])
    }

    /// Builds an address from raw segments, validating each one.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return InvalidAddressSnafu {
                segments,
                reason: "address has no segments",
            }
            .fail();
        }
        for segment in &segments {
            validate_segment(segment).map_err(|reason| PathError::InvalidAddress {
                segments: segments.clone(),
                reason,
            })?;
        }
        Ok(Self { segments })
    }

    /// Parses a database path such as `Users/u1/Orders`.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        Self::from_segments(path.trim_matches(SEGMENT_SEPARATOR).split(SEGMENT_SEPARATOR))
    }

    pub fn kind(&self) -> AddressKind {
        if self.segments.len() % 2 == 0 {
            AddressKind::Document
        } else {
            AddressKind::Collection
        }
    }

    pub fn is_document(&self) -> bool {
        self.kind() == AddressKind::Document
    }

    pub fn is_collection(&self) -> bool {
        self.kind() == AddressKind::Collection
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Id of the collection or document this address names (the last segment).
    pub fn id(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Id of the root collection this address lives under.
    pub fn root_collection_id(&self) -> &str {
        self.segments.first().map_or("", String::as_str)
    }

    /// Address of a document inside this collection.
    pub fn child_document(&self, id: impl Into<String>) -> Result<Self, PathError> {
        self.child(AddressKind::Collection, id.into())
    }

    /// Address of a sub-collection of this document.
    pub fn child_collection(&self, id: impl Into<String>) -> Result<Self, PathError> {
        self.child(AddressKind::Document, id.into())
    }

    /// For a document, the collection that contains it. `None` for collections.
    pub fn parent_collection(&self) -> Option<Self> {
        self.is_document().then(|| Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Database path of the parent collection of a document, e.g. `Users/u1/Orders`.
    pub fn collection_path(&self) -> String {
        self.parent_collection()
            .map_or_else(|| self.to_string(), |parent| parent.to_string())
    }

    fn child(&self, expected: AddressKind, id: String) -> Result<Self, PathError> {
        let mut segments = self.segments.clone();
        segments.push(id);
        if self.kind() != expected {
            return InvalidAddressSnafu {
                segments,
                reason: format!("{} '{self}' cannot contain another {}", self.kind(), self.kind()),
            }
            .fail();
        }
        Self::from_segments(segments)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, segment) in self.segments.iter().enumerate() {
            if idx > 0 {
                write!(f, "{SEGMENT_SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

fn validate_segment(segment: &str) -> Result<(), String> {
    if segment.is_empty() {
        return Err("empty segment".to_string());
    }
    if segment.contains(SEGMENT_SEPARATOR) {
        return Err(format!("segment '{segment}' contains '{SEGMENT_SEPARATOR}'"));
    }
    Ok(())
}
