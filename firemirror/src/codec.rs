//! Mapping between database addresses and mirror paths.
//!
//! A document `[c1, d1, c2, d2]` is stored at `<root>/c1/d1/c2/d2.json`, and its
//! sub-collections live under the directory `<root>/c1/d1/c2/d2/`. A collection
//! has a directory and no file of its own.
//!
//! Segments are escaped so that any database id maps to a single, portable file
//! name and back:
//!
//! - `%`, `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`, control characters and DEL
//!   are written as `%XX` (uppercase hex of the byte);
//! - the segments `.` and `..` are written as `%2E` and `%2E%2E`;
//! - a segment ending in `.json` (any case) has that dot written as `%2E`, so
//!   document `d1.json` gets the directory `d1%2Ejson` and never collides with
//!   the artifact file `d1.json` of its sibling `d1`.
//!
//! Every other character is kept as is, so ordinary ids appear unchanged on disk.
//!
//! Database ids may be up to 1500 bytes, while most filesystems limit a file
//! name to 255 bytes. A segment whose escaped name (plus `.json` for an
//! artifact file) exceeds [`MAX_NAME_BYTES`] is rejected with
//! [`PathError::InvalidAddress`] naming the id.
//!
use std::path::{Component, Path, PathBuf};

use snafu::ensure;

use crate::{
    ARTIFACT_EXTENSION,
    address::Address,
    error::{InvalidAddressSnafu, PathError},
};

/// Longest file or directory name written to a mirror, in bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Converts between [`Address`]es and paths inside one mirror root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCodec {
    root: PathBuf,
}

impl PathCodec {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the artifact file holding a document's fields.
    pub fn document_file(&self, address: &Address) -> Result<PathBuf, PathError> {
        let segments = address.segments();
        let Some((id, parents)) = segments.split_last().filter(|_| address.is_document()) else {
            return InvalidAddressSnafu {
                segments: segments.to_vec(),
                reason: "only documents have artifact files",
            }
            .fail();
        };
        let mut path = self.root.clone();
        for segment in parents {
            path.push(file_name(address, segment, "")?);
        }
        path.push(file_name(address, id, &format!(".{ARTIFACT_EXTENSION}"))?);
        Ok(path)
    }

    /// Directory for a node: a collection's directory holds its documents,
    /// a document's directory holds its sub-collections.
    pub fn node_dir(&self, address: &Address) -> Result<PathBuf, PathError> {
        let mut path = self.root.clone();
        for segment in address.segments() {
            path.push(file_name(address, segment, "")?);
        }
        Ok(path)
    }

    /// Recovers the document address of an artifact file inside the mirror.
    pub fn decode(&self, path: &Path) -> Result<Address, PathError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| malformed(path, "not inside the mirror root"))?;

        let mut names = Vec::new();
        for component in relative.components() {
            let Component::Normal(name) = component else {
                return Err(malformed(path, "unexpected path component"));
            };
            let name = name
                .to_str()
                .ok_or_else(|| malformed(path, "file name is not valid UTF-8"))?;
            names.push(name);
        }

        let Some((file_name, dirs)) = names.split_last() else {
            return Err(malformed(path, "path names the mirror root"));
        };
        let stem = file_name
            .strip_suffix(ARTIFACT_EXTENSION)
            .and_then(|stem| stem.strip_suffix('.'))
            .ok_or_else(|| {
                malformed(path, &format!("missing .{ARTIFACT_EXTENSION} extension"))
            })?;
        if stem.is_empty() {
            return Err(malformed(path, "empty document id"));
        }

        let mut segments = Vec::with_capacity(names.len());
        for name in dirs.iter().copied().chain(std::iter::once(stem)) {
            segments.push(unescape_segment(name).map_err(|reason| malformed(path, &reason))?);
        }
        if segments.len() % 2 != 0 {
            return Err(malformed(
                path,
                "artifact sits in a document directory, not a collection directory",
            ));
        }
        Address::from_segments(segments).map_err(|err| malformed(path, &err.to_string()))
    }
}

/// Escaped name of one segment followed by `suffix`, within [`MAX_NAME_BYTES`].
fn file_name(address: &Address, segment: &str, suffix: &str) -> Result<String, PathError> {
    let name = escape_segment(segment) + suffix;
    ensure!(
        name.len() <= MAX_NAME_BYTES,
        InvalidAddressSnafu {
            segments: address.segments().to_vec(),
            reason: format!(
                "id '{segment}' needs a {} byte file name, the limit is {MAX_NAME_BYTES}",
                name.len()
            ),
        }
    );
    Ok(name)
}

fn malformed(path: &Path, reason: &str) -> PathError {
    PathError::MalformedPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn must_escape(ch: char) -> bool {
    matches!(
        ch,
        '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'
    ) || ch.is_ascii_control()
}

/// Escapes one address segment for use as a file or directory name.
pub fn escape_segment(segment: &str) -> String {
    if segment == "." || segment == ".." {
        return "%2E".repeat(segment.len());
    }
    // the dot of a trailing ".json" is escaped so no directory looks like an artifact
    let extension = ARTIFACT_EXTENSION.len() + 1;
    let dot = segment.len().checked_sub(extension).filter(|&at| {
        segment.as_bytes()[at] == b'.'
            && segment.as_bytes()[at + 1..].eq_ignore_ascii_case(ARTIFACT_EXTENSION.as_bytes())
    });

    let mut out = String::with_capacity(segment.len() + 2);
    for (at, ch) in segment.char_indices() {
        if must_escape(ch) || Some(at) == dot {
            // all escaped characters are single-byte ASCII
            out.push_str(&format!("%{:02X}", ch as u32));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Reverses [`escape_segment`].
pub fn unescape_segment(name: &str) -> Result<String, String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex = bytes
                .get(idx + 1..idx + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid escape sequence in '{name}'"))?;
            out.push(hex);
            idx += 3;
        } else {
            out.push(bytes[idx]);
            idx += 1;
        }
    }
    String::from_utf8(out).map_err(|_| format!("escaped name '{name}' is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str) -> Address {
        Address::parse(path).unwrap()
    }

    #[test]
    fn encodes_document_files_and_dirs() {
        let codec = PathCodec::new("/backup");
        let address = doc("Users/u1/Orders/o1");
        assert_eq!(
            codec.document_file(&address).unwrap(),
            PathBuf::from("/backup/Users/u1/Orders/o1.json")
        );
        assert_eq!(
            codec.node_dir(&address).unwrap(),
            PathBuf::from("/backup/Users/u1/Orders/o1")
        );
        assert!(codec.document_file(&doc("Users")).is_err());
    }

    #[test]
    fn restore_address_recovery() {
        let codec = PathCodec::new("/backup");
        let address = codec
            .decode(Path::new("/backup/Users/u1/Orders/o1.json"))
            .unwrap();
        assert_eq!(address.segments(), ["Users", "u1", "Orders", "o1"]);
    }

    #[test]
    fn decodes_root_collection_document() {
        let codec = PathCodec::new("/backup");
        let address = codec.decode(Path::new("/backup/Users/u1.json")).unwrap();
        assert_eq!(address.segments(), ["Users", "u1"]);
        assert_eq!(address.collection_path(), "Users");
    }

    #[test]
    fn round_trip_with_reserved_characters() {
        let codec = PathCodec::new("mirror");
        let ids = [
            "plain",
            "100%",
            "a:b",
            "back\\slash",
            ".",
            "..",
            "...",
            "%2F",
            "tab\there",
            "ünïcödé 文字",
            "ends.json",
            "q?*<>|\"",
        ];
        for id in ids {
            let address = Address::from_segments(["col", id, "sub", id]).unwrap();
            let path = codec.document_file(&address).unwrap();
            assert_eq!(codec.decode(&path).unwrap(), address, "id {id:?} via {path:?}");
        }
    }

    #[test]
    fn round_trip_deep_nesting() {
        let codec = PathCodec::new("/m");
        let segments: Vec<String> = (0..40).map(|n| format!("s{n}")).collect();
        let address = Address::from_segments(segments).unwrap();
        let path = codec.document_file(&address).unwrap();
        assert_eq!(codec.decode(&path).unwrap(), address);
    }

    #[test]
    fn escaped_names_are_single_components() {
        assert_eq!(escape_segment("a/b"), "a%2Fb");
        assert_eq!(escape_segment(".."), "%2E%2E");
        assert_eq!(escape_segment("x.y"), "x.y");
        assert_eq!(escape_segment("d1.json"), "d1%2Ejson");
        assert_eq!(escape_segment("d1.JSON"), "d1%2EJSON");
        assert_eq!(escape_segment(".json"), "%2Ejson");
        assert_eq!(escape_segment("json"), "json");
        assert_eq!(escape_segment("文.json"), "文%2Ejson");
        assert_eq!(unescape_segment("a%2Fb").unwrap(), "a/b");
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let codec = PathCodec::new("/backup");
        let cases = [
            "/elsewhere/Users/u1.json",
            "/backup/Users/u1.txt",
            "/backup/Users/u1",
            "/backup/Users/.json",
            "/backup/u1.json",
            "/backup/Users/u1/o1.json",
            "/backup/Users/bad%zz.json",
            "/backup/Users/a%2F.json",
        ];
        for case in cases {
            let err = codec.decode(Path::new(case));
            assert!(
                matches!(err, Err(PathError::MalformedPath { .. })),
                "{case} decoded to {err:?}"
            );
        }
    }

    #[test]
    fn json_suffixed_ids_do_not_collide_with_artifacts() {
        let codec = PathCodec::new("/backup");
        let file = codec.document_file(&doc("A/d1")).unwrap();
        let dir = codec.node_dir(&doc("A/d1.json")).unwrap();
        let nested = codec.document_file(&doc("A/d1.json/B/x")).unwrap();
        assert_eq!(file, PathBuf::from("/backup/A/d1.json"));
        assert_eq!(dir, PathBuf::from("/backup/A/d1%2Ejson"));
        assert_eq!(nested, PathBuf::from("/backup/A/d1%2Ejson/B/x.json"));
        assert_ne!(file, dir);
        assert_eq!(codec.decode(&nested).unwrap(), doc("A/d1.json/B/x"));
        let own_file = codec.document_file(&doc("A/d1.json")).unwrap();
        assert_eq!(own_file, PathBuf::from("/backup/A/d1%2Ejson.json"));
        assert_eq!(codec.decode(&own_file).unwrap(), doc("A/d1.json"));
    }

    #[test]
    fn overlong_ids_are_rejected_with_their_id() {
        let codec = PathCodec::new("/backup");
        let fits = "x".repeat(MAX_NAME_BYTES - 5);
        let address = Address::from_segments(["A", fits.as_str()]).unwrap();
        assert!(codec.document_file(&address).is_ok());

        let long = "y".repeat(MAX_NAME_BYTES - 4);
        let address = Address::from_segments(["A", long.as_str()]).unwrap();
        let err = codec.document_file(&address).unwrap_err();
        assert!(matches!(err, PathError::InvalidAddress { .. }));
        assert!(err.to_string().contains(&long));
        // as a directory the same id still fits
        assert!(codec.node_dir(&address).is_ok());

        let wide = "é".repeat(128);
        let collection = Address::collection(wide.as_str()).unwrap();
        assert!(codec.node_dir(&collection).is_err());
    }
}
