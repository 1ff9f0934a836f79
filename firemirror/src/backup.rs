//! Backup walker: database tree to mirror directory.
//!
//! The walk is top-down. A collection gets a directory, then each of its
//! documents is written as `<id>.json` followed by its sub-collections. Every
//! level hands its children to [`run_sequential`] with
//! [`ExecutionPolicy::FailFast`], so the first error stops the whole walk and
//! siblings after the failing node are never attempted. A failed backup is a
//! mirror truncated at the failure point.
//!
use futures::{FutureExt, future::BoxFuture};
use serde::Serialize;
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    Result,
    address::Address,
    artifact::{ArtifactFormat, to_artifact},
    codec::PathCodec,
    error::{
        ArtifactWriteSnafu, DatabaseReadSnafu, MirrorError, PathCreationSnafu, SerializationSnafu,
    },
    fs::MirrorFs,
    sequential::{ExecutionPolicy, Task, run_sequential, task},
    store::DocumentStore,
    value::FieldMap,
};

/// Options for a backup run.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Artifact layout on disk.
    pub format: ArtifactFormat,
    /// Back up only this root collection.
    pub collection: Option<String>,
}

impl BackupOptions {
    pub fn format(mut self, format: ArtifactFormat) -> Self {
        self.format = format;
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

/// Counts of nodes written by a completed backup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub collections: usize,
    pub documents: usize,
}

impl std::ops::Add for BackupReport {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            collections: self.collections + other.collections,
            documents: self.documents + other.documents,
        }
    }
}

impl std::iter::Sum for BackupReport {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |total, report| total + report)
    }
}

/// Writes every document reachable from the database root into a mirror.
pub struct BackupWalker<'a, S, F> {
    store: &'a S,
    fs: &'a F,
    codec: &'a PathCodec,
    options: BackupOptions,
}

impl<'a, S, F> BackupWalker<'a, S, F>
where
    S: DocumentStore,
    F: MirrorFs,
{
    pub fn new(store: &'a S, fs: &'a F, codec: &'a PathCodec, options: BackupOptions) -> Self {
        Self {
            store,
            fs,
            codec,
            options,
        }
    }

    /// Runs the backup. Stops at the first error.
    pub async fn run(&self) -> Result<BackupReport> {
        let root = self.codec.root();
        self.fs
            .create_dir_all(root)
            .await
            .with_context(|_| PathCreationSnafu { path: root.to_path_buf() })?;

        let mut ids = self
            .store
            .list_root_collections()
            .await
            .context(DatabaseReadSnafu { address: "/" })?;
        if let Some(only) = &self.options.collection {
            ids.retain(|id| id == only);
            if ids.is_empty() {
                warn!(collection = %only, "collection not found in the database, nothing to back up");
                return Ok(BackupReport::default());
            }
        }
        debug!(root = %root.display(), collections = ids.len(), "starting backup");

        let mut tasks: Vec<Task<'_, BackupReport, MirrorError>> = Vec::with_capacity(ids.len());
        for id in ids {
            let collection = Address::collection(id)?;
            tasks.push(task(move || self.backup_collection(collection)));
        }
        run_children(tasks).await
    }

    fn backup_collection(&self, collection: Address) -> BoxFuture<'_, Result<BackupReport>> {
        async move {
            info!("Backing up Collection '/{collection}'");
            let dir = self.codec.node_dir(&collection)?;
            self.fs
                .create_dir_all(&dir)
                .await
                .with_context(|_| PathCreationSnafu { path: dir.clone() })?;

            let documents = self
                .store
                .list_documents(&collection)
                .await
                .with_context(|_| DatabaseReadSnafu {
                    address: collection.to_string(),
                })?;

            let mut tasks: Vec<Task<'_, BackupReport, MirrorError>> =
                Vec::with_capacity(documents.len());
            for snapshot in documents {
                let document = collection.child_document(snapshot.id)?;
                let fields = snapshot.fields;
                tasks.push(task(move || self.backup_document(document, fields)));
            }
            let report = run_children(tasks).await?;
            Ok(report
                + BackupReport {
                    collections: 1,
                    documents: 0,
                })
        }
        .boxed()
    }

    fn backup_document(
        &self,
        document: Address,
        fields: FieldMap,
    ) -> BoxFuture<'_, Result<BackupReport>> {
        async move {
            info!("Backing up Document '/{document}'");
            let contents = to_artifact(&fields, self.options.format)
                .with_context(|_| SerializationSnafu {
                    address: document.clone(),
                })?;
            let path = self.codec.document_file(&document)?;
            self.fs
                .write_file(&path, &contents)
                .await
                .with_context(|_| ArtifactWriteSnafu { path: path.clone() })?;

            let subcollections = self
                .store
                .list_subcollections(&document)
                .await
                .with_context(|_| DatabaseReadSnafu {
                    address: document.to_string(),
                })?;

            let mut tasks: Vec<Task<'_, BackupReport, MirrorError>> =
                Vec::with_capacity(subcollections.len());
            for id in subcollections {
                let collection = document.child_collection(id)?;
                tasks.push(task(move || self.backup_collection(collection)));
            }
            let report = run_children(tasks).await?;
            Ok(report
                + BackupReport {
                    collections: 0,
                    documents: 1,
                })
        }
        .boxed()
    }
}

async fn run_children(tasks: Vec<Task<'_, BackupReport, MirrorError>>) -> Result<BackupReport> {
    let reports = run_sequential(tasks, ExecutionPolicy::FailFast)
        .await
        .into_result()?;
    Ok(reports.into_iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::LocalFs, memory::MemoryStore, value::field_map};

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        for (path, n) in [("A/d1", 1i64), ("A/d2", 2), ("A/d1/B/d3", 3), ("C/x", 4)] {
            store
                .insert(&Address::parse(path).unwrap(), field_map([("n", n)]))
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn counts_written_nodes() {
        let temp = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let codec = PathCodec::new(temp.path());
        let report = BackupWalker::new(&store, &LocalFs, &codec, BackupOptions::default())
            .run()
            .await
            .unwrap();
        assert_eq!(
            report,
            BackupReport {
                collections: 3,
                documents: 4
            }
        );
        assert!(temp.path().join("C/x.json").is_file());
    }

    #[tokio::test]
    async fn collection_filter_limits_the_walk() {
        let temp = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let codec = PathCodec::new(temp.path());
        let report = BackupWalker::new(
            &store,
            &LocalFs,
            &codec,
            BackupOptions::default().collection("C"),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(report.documents, 1);
        assert!(!temp.path().join("A").exists());
        assert!(temp.path().join("C/x.json").is_file());
    }

    #[tokio::test]
    async fn pretty_format_is_written() {
        let temp = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let codec = PathCodec::new(temp.path().join("nested/root"));
        BackupWalker::new(
            &store,
            &LocalFs,
            &codec,
            BackupOptions::default().format(ArtifactFormat::Pretty),
        )
        .run()
        .await
        .unwrap();
        let text = std::fs::read_to_string(temp.path().join("nested/root/A/d2.json")).unwrap();
        assert_eq!(text, "{\n  \"n\": 2\n}");
    }

    #[tokio::test]
    async fn unrepresentable_document_is_reported_with_its_address() {
        let temp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let mut deep = crate::value::FieldValue::Null;
        for _ in 0..=crate::MAX_NESTING_DEPTH {
            deep = crate::value::FieldValue::Array(vec![deep]);
        }
        store
            .insert(&Address::parse("A/bad").unwrap(), field_map([("deep", deep)]))
            .unwrap();
        let codec = PathCodec::new(temp.path());
        let err = BackupWalker::new(&store, &LocalFs, &codec, BackupOptions::default())
            .run()
            .await
            .unwrap_err();
        assert!(
            matches!(&err, MirrorError::Serialization { address, .. } if address.to_string() == "A/bad"),
            "{err}"
        );
        assert!(err.to_string().contains("deep"));
        assert!(!temp.path().join("A/bad.json").exists());
    }

    #[tokio::test]
    async fn missing_filtered_collection_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let codec = PathCodec::new(temp.path());
        let report = BackupWalker::new(
            &store,
            &LocalFs,
            &codec,
            BackupOptions::default().collection("Nope"),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(report, BackupReport::default());
        assert!(!temp.path().join("Nope").exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn json_suffixed_document_beside_its_namesake() {
        let temp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        for (path, n) in [("A/d1", 1i64), ("A/d1.json", 2), ("A/d1.json/B/x", 3)] {
            store
                .insert(&Address::parse(path).unwrap(), field_map([("n", n)]))
                .unwrap();
        }
        let codec = PathCodec::new(temp.path());
        let report = BackupWalker::new(&store, &LocalFs, &codec, BackupOptions::default())
            .run()
            .await
            .unwrap();
        assert_eq!(report.documents, 3);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("A/d1.json")).unwrap(),
            r#"{"n":1}"#
        );
        assert!(temp.path().join("A/d1%2Ejson.json").is_file());
        assert!(temp.path().join("A/d1%2Ejson/B/x.json").is_file());
    }

    #[tokio::test]
    async fn overlong_id_stops_the_backup() {
        let temp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let long = format!("A/{}", "z".repeat(300));
        store
            .insert(&Address::parse(&long).unwrap(), field_map([("n", 1i64)]))
            .unwrap();
        let codec = PathCodec::new(temp.path());
        let err = BackupWalker::new(&store, &LocalFs, &codec, BackupOptions::default())
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains(&"z".repeat(300)), "{err}");
    }
}
