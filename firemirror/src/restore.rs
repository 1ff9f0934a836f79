//! Restore walker: mirror directory to database.
//!
//! Restore runs in two phases. Discovery walks the mirror depth-first in file
//! name order, decodes each artifact's address from its position and reads its
//! fields, building a flat work list. Nothing is written to the database until
//! discovery has finished. The work list is then handed to [`run_sequential`]
//! with [`ExecutionPolicy::ContinueOnError`]: a failed write is logged and
//! recorded, and the remaining documents are still attempted.
//!
//! Only a failure to list the mirror root aborts a restore.
//!
use futures::{FutureExt, future::BoxFuture};
use serde::{Serialize, Serializer};
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::{
    Result,
    address::Address,
    artifact::from_artifact,
    codec::PathCodec,
    error::{
        ArtifactDecodeSnafu, ArtifactReadSnafu, DatabaseWriteSnafu, MirrorError, MirrorRootSnafu,
    },
    fs::{DirEntry, EntryKind, MirrorFs},
    sequential::{ExecutionPolicy, Task, run_sequential, task},
    store::DocumentStore,
    value::FieldMap,
};

/// Options for a restore run.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Restore only documents under this root collection.
    pub collection: Option<String>,
    /// Discover and decode the mirror without writing to the database.
    pub dry_run: bool,
}

impl RestoreOptions {
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// A document that could not be discovered or written.
#[derive(Debug, Serialize)]
pub struct RestoreFailure {
    /// Database address if it was decoded, otherwise the mirror path.
    pub target: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: MirrorError,
}

/// Outcome of a restore run.
#[derive(Debug, Default, Serialize)]
pub struct RestoreReport {
    /// Valid artifacts found in the mirror.
    pub discovered: usize,
    /// Documents written to the database.
    pub restored: usize,
    /// Artifacts outside the selected collection.
    pub skipped_by_filter: usize,
    pub failures: Vec<RestoreFailure>,
}

impl RestoreReport {
    /// True when nothing failed during discovery or writing.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn serialize_display<S: Serializer>(
    error: &MirrorError,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// One document waiting to be written.
#[derive(Debug)]
struct WorkItem {
    address: Address,
    fields: FieldMap,
}

#[derive(Debug, Default)]
struct Discovery {
    items: Vec<WorkItem>,
    skipped_by_filter: usize,
    failures: Vec<RestoreFailure>,
}

impl Discovery {
    fn fail(&mut self, target: String, error: MirrorError) {
        warn!(%target, "Skipping: {error}");
        self.failures.push(RestoreFailure { target, error });
    }
}

/// Replays every artifact in a mirror into a database.
pub struct RestoreWalker<'a, S, F> {
    store: &'a S,
    fs: &'a F,
    codec: &'a PathCodec,
    options: RestoreOptions,
}

impl<'a, S, F> RestoreWalker<'a, S, F>
where
    S: DocumentStore,
    F: MirrorFs,
{
    pub fn new(store: &'a S, fs: &'a F, codec: &'a PathCodec, options: RestoreOptions) -> Self {
        Self {
            store,
            fs,
            codec,
            options,
        }
    }

    /// Runs the restore, attempting every discovered document.
    pub async fn run(&self) -> Result<RestoreReport> {
        let root = self.codec.root();
        let entries = self
            .fs
            .read_dir(root)
            .await
            .with_context(|_| MirrorRootSnafu { path: root.to_path_buf() })?;

        let mut discovery = Discovery::default();
        self.discover(entries, &mut discovery).await;
        let Discovery {
            items,
            skipped_by_filter,
            failures,
        } = discovery;
        debug!(
            documents = items.len(),
            failures = failures.len(),
            skipped_by_filter,
            "discovery finished"
        );

        let mut report = RestoreReport {
            discovered: items.len(),
            restored: 0,
            skipped_by_filter,
            failures,
        };
        if self.options.dry_run {
            for item in &items {
                info!("Would restore Document '/{}'", item.address);
            }
            return Ok(report);
        }

        let targets: Vec<Address> = items.iter().map(|item| item.address.clone()).collect();
        let tasks: Vec<Task<'_, (), MirrorError>> = items
            .into_iter()
            .map(|item| task(move || self.restore_document(item)))
            .collect();
        let outcome = run_sequential(tasks, ExecutionPolicy::ContinueOnError).await;

        for (address, result) in targets.into_iter().zip(outcome.outcomes) {
            match result {
                Ok(()) => report.restored += 1,
                Err(err) => {
                    error!(
                        collection = %address.collection_path(),
                        document = address.id(),
                        "{err}"
                    );
                    report.failures.push(RestoreFailure {
                        target: address.to_string(),
                        error: err,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Walks `entries` depth-first, appending work items and failures.
    fn discover<'s>(
        &'s self,
        entries: Vec<DirEntry>,
        acc: &'s mut Discovery,
    ) -> BoxFuture<'s, ()> {
        async move {
            for entry in entries {
                match entry.kind {
                    EntryKind::Directory => match self.fs.read_dir(&entry.path).await {
                        Ok(children) => self.discover(children, &mut *acc).await,
                        Err(source) => acc.fail(
                            entry.path.display().to_string(),
                            MirrorError::DirectoryRead {
                                path: entry.path.clone(),
                                source,
                            },
                        ),
                    },
                    EntryKind::File => self.discover_file(entry, acc).await,
                    EntryKind::Other => {
                        warn!(path = %entry.path.display(), "Skipping entry that is neither file nor directory");
                    }
                }
            }
        }
        .boxed()
    }

    async fn discover_file(&self, entry: DirEntry, acc: &mut Discovery) {
        let target = entry.path.display().to_string();
        let address = match self.codec.decode(&entry.path) {
            Ok(address) => address,
            Err(err) => return acc.fail(target, err.into()),
        };
        if let Some(collection) = &self.options.collection {
            if address.root_collection_id() != collection {
                debug!("Skipping Document '/{address}' outside collection '{collection}'");
                acc.skipped_by_filter += 1;
                return;
            }
        }

        let contents = match self
            .fs
            .read_file(&entry.path)
            .await
            .with_context(|_| ArtifactReadSnafu { path: entry.path.clone() })
        {
            Ok(contents) => contents,
            Err(err) => return acc.fail(address.to_string(), err),
        };
        match from_artifact(&contents).with_context(|_| ArtifactDecodeSnafu { path: entry.path.clone() }) {
            Ok(fields) => {
                debug!("Discovered Document '/{address}'");
                acc.items.push(WorkItem { address, fields });
            }
            Err(err) => acc.fail(address.to_string(), err),
        }
    }

    async fn restore_document(&self, item: WorkItem) -> Result<()> {
        info!("Restoring Document '/{}'", item.address);
        self.store
            .set_document(&item.address, &item.fields)
            .await
            .with_context(|_| DatabaseWriteSnafu {
                address: item.address.clone(),
            })
    }
}
