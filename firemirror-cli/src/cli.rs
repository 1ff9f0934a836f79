use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use firemirror::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::{CliConfig, Settings};

#[derive(Parser, Debug)]
#[command(name = "firemirror")]
#[command(author, version, about = "Back up a Firestore database to JSON files, and restore it", long_about = None)]
pub struct Cli {
    /// Service-account key of the database to back up
    #[arg(short = 'a', long, env = "FIREMIRROR_ACCOUNT_CREDENTIALS")]
    pub account_credentials: Option<PathBuf>,

    /// Service-account key of the database to restore into
    #[arg(short = 'R', long, env = "FIREMIRROR_RESTORE_CREDENTIALS")]
    pub restore_account_credentials: Option<PathBuf>,

    /// Directory holding the backup
    #[arg(short = 'B', long, env = "FIREMIRROR_BACKUP_PATH")]
    pub backup_path: Option<PathBuf>,

    /// Write indented JSON artifacts
    #[arg(short = 'P', long)]
    pub pretty_print: bool,

    /// Only back up or restore this root collection
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Firestore emulator host:port
    #[arg(long, env = "FIRESTORE_EMULATOR_HOST")]
    pub emulator_host: Option<String>,

    /// Database id (default: "(default)")
    #[arg(long)]
    pub database: Option<String>,

    /// Read the backup and report what would be restored, without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Config file (default: <config_dir>/firemirror/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Color output for logs
    #[arg(long, value_enum, default_value_t = ColorArg::Auto)]
    pub color: ColorArg,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ColorArg {
    Auto,
    Always,
    Never,
}

/// What was done, printed at the end of a run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub backup_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreReport>,
}

impl RunSummary {
    fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(report) = &self.backup {
            lines.push(format!(
                "Backed up {} documents in {} collections to {}",
                report.documents,
                report.collections,
                self.backup_path.display()
            ));
        }
        if let Some(report) = &self.restore {
            lines.push(format!(
                "Restored {} of {} documents ({} failed, {} outside collection filter)",
                report.restored,
                report.discovered,
                report.failures.len(),
                report.skipped_by_filter
            ));
            for failure in &report.failures {
                lines.push(format!("  {}: {}", failure.target, failure.error));
            }
        }
        lines
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let file_config = CliConfig::load(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, &file_config)?;

    // all setup happens before the first read or write
    let source = settings
        .mode
        .source()
        .map(|path| connect(path, &settings))
        .transpose()?;
    let target = settings
        .mode
        .target()
        .map(|path| connect(path, &settings))
        .transpose()?;

    std::fs::create_dir_all(&settings.backup_path).with_context(|| {
        format!(
            "Unable to create backup path {}",
            settings.backup_path.display()
        )
    })?;
    let codec = PathCodec::new(&settings.backup_path);

    let mut summary = RunSummary {
        backup_path: settings.backup_path.clone(),
        ..RunSummary::default()
    };

    if let Some(store) = &source {
        info!(
            project = store.project_id(),
            database = store.database(),
            "backup started"
        );
        let mut options = BackupOptions::default().format(settings.format);
        if let Some(collection) = &settings.collection {
            options = options.collection(collection);
        }
        let report = BackupWalker::new(store, &LocalFs, &codec, options)
            .run()
            .await
            .context("backup failed")?;
        summary.backup = Some(report);
    }

    if let Some(store) = &target {
        info!(
            project = store.project_id(),
            database = store.database(),
            dry_run = settings.dry_run,
            "restore started"
        );
        let mut options = RestoreOptions::default().dry_run(settings.dry_run);
        if let Some(collection) = &settings.collection {
            options = options.collection(collection);
        }
        let report = RestoreWalker::new(store, &LocalFs, &codec, options)
            .run()
            .await
            .context("restore failed")?;
        summary.restore = Some(report);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in summary.lines() {
            println!("{line}");
        }
    }

    if let Some(report) = &summary.restore
        && !report.is_complete()
    {
        bail!("{} documents could not be restored", report.failures.len());
    }
    Ok(())
}

fn connect(credentials: &Path, settings: &Settings) -> Result<FirestoreClient> {
    let credentials = Credentials::from_file(credentials)
        .with_context(|| format!("loading credentials {}", credentials.display()))?;
    let client = FirestoreClient::new(&credentials, settings.firestore.clone())
        .context("connecting to Firestore")?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    #[test]
    fn parses_short_flags() {
        let cli = Cli::try_parse_from([
            "firemirror", "-a", "src.json", "-R", "dst.json", "-B", "/tmp/b", "-P", "-c", "Users",
        ])
        .unwrap();
        assert_eq!(cli.account_credentials, Some(PathBuf::from("src.json")));
        assert_eq!(cli.restore_account_credentials, Some(PathBuf::from("dst.json")));
        assert_eq!(cli.backup_path, Some(PathBuf::from("/tmp/b")));
        assert!(cli.pretty_print);
        assert_eq!(cli.collection.as_deref(), Some("Users"));
        assert_eq!(cli.color, ColorArg::Auto);
        assert!(!cli.dry_run);
    }

    #[test]
    fn parses_long_flags() {
        let cli = Cli::try_parse_from([
            "firemirror",
            "--restore-account-credentials",
            "dst.json",
            "--backup-path",
            "mirror",
            "--dry-run",
            "--json",
            "--database",
            "staging",
            "--color",
            "never",
            "-vv",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert!(cli.json);
        assert_eq!(cli.database.as_deref(), Some("staging"));
        assert_eq!(cli.color, ColorArg::Never);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["firemirror", "-q", "-v"]).is_err());
        assert!(Cli::try_parse_from(["firemirror", "-q"]).unwrap().quiet);
    }

    #[test]
    fn summary_lines_list_failures() {
        let summary = RunSummary {
            backup_path: PathBuf::from("/srv/mirror"),
            backup: Some(BackupReport {
                collections: 2,
                documents: 5,
            }),
            restore: Some(RestoreReport {
                discovered: 5,
                restored: 4,
                skipped_by_filter: 0,
                failures: vec![RestoreFailure {
                    target: "Users/u1".into(),
                    error: MirrorError::DatabaseWrite {
                        address: Address::parse("Users/u1").unwrap(),
                        source: StoreError::Other {
                            message: "quota".into(),
                        },
                    },
                }],
            }),
        };
        let lines = summary.lines();
        assert_eq!(lines[0], "Backed up 5 documents in 2 collections to /srv/mirror");
        assert_eq!(
            lines[1],
            "Restored 4 of 5 documents (1 failed, 0 outside collection filter)"
        );
        assert!(lines[2].starts_with("  Users/u1: "), "{}", lines[2]);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["backup"]["documents"], 5);
        assert_eq!(json["restore"]["failures"][0]["target"], "Users/u1");
    }

    #[tokio::test]
    async fn missing_credentials_file_fails_before_creating_backup_path() {
        let temp = tempfile::tempdir().unwrap();
        let backup = temp.path().join("mirror");
        let argv = |config: &str| -> Vec<OsString> {
            vec![
                "firemirror".into(),
                "-a".into(),
                temp.path().join("missing.json").into(),
                "-B".into(),
                backup.clone().into(),
                "--config".into(),
                temp.path().join(config).into(),
            ]
        };

        // an explicit config file must exist
        let cli = Cli::try_parse_from(argv("none.json")).unwrap();
        assert!(run(cli).await.is_err());
        assert!(!backup.exists());

        std::fs::write(temp.path().join("empty.json"), "{}").unwrap();
        let cli = Cli::try_parse_from(argv("empty.json")).unwrap();
        let err = run(cli).await.unwrap_err();
        assert!(format!("{err:#}").contains("missing.json"), "{err:#}");
        assert!(!backup.exists());
    }
}
