use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use firemirror::{
    artifact::ArtifactFormat,
    config::{DEFAULT_DATABASE, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE},
    firestore::FirestoreConfig,
};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// Defaults read from `<config_dir>/firemirror/config.json`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub backup_path: Option<PathBuf>,
    pub pretty_print: Option<bool>,
    pub emulator_host: Option<String>,
    pub database: Option<String>,
    pub page_size: Option<u32>,
    pub max_retries: Option<u32>,
}

impl CliConfig {
    pub fn path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("firemirror").join("config.json")
    }

    /// Loads `explicit`, which must exist, or the default file if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }
}

/// What a run does, decided by which credentials were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Backup { source: PathBuf },
    Restore { target: PathBuf },
    /// Back up the source, then restore the fresh mirror into the target.
    Copy { source: PathBuf, target: PathBuf },
}

impl Mode {
    pub fn source(&self) -> Option<&Path> {
        match self {
            Self::Backup { source } | Self::Copy { source, .. } => Some(source),
            Self::Restore { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&Path> {
        match self {
            Self::Restore { target } | Self::Copy { target, .. } => Some(target),
            Self::Backup { .. } => None,
        }
    }
}

/// Fully resolved settings: flag or env, then config file, then built-in default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub backup_path: PathBuf,
    pub format: ArtifactFormat,
    pub collection: Option<String>,
    pub dry_run: bool,
    pub firestore: FirestoreConfig,
}

impl Settings {
    pub fn resolve(cli: &Cli, file: &CliConfig) -> Result<Self> {
        let mode = match (
            cli.account_credentials.clone(),
            cli.restore_account_credentials.clone(),
        ) {
            (Some(source), Some(target)) => Mode::Copy { source, target },
            (Some(source), None) => Mode::Backup { source },
            (None, Some(target)) => Mode::Restore { target },
            (None, None) => bail!(
                "Missing credentials: pass --account-credentials to back up, \
                 --restore-account-credentials to restore, or both"
            ),
        };

        let Some(backup_path) = cli.backup_path.clone().or_else(|| file.backup_path.clone()) else {
            bail!("Missing: --backup-path - Path to store backup");
        };

        let pretty = cli.pretty_print || file.pretty_print.unwrap_or(false);
        let format = if pretty {
            ArtifactFormat::Pretty
        } else {
            ArtifactFormat::Compact
        };

        let firestore = FirestoreConfig::default()
            .emulator_host(
                cli.emulator_host
                    .clone()
                    .or_else(|| file.emulator_host.clone())
                    .filter(|host| !host.is_empty()),
            )
            .database(
                cli.database
                    .clone()
                    .or_else(|| file.database.clone())
                    .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            )
            .page_size(file.page_size.unwrap_or(DEFAULT_PAGE_SIZE))
            .max_retries(file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES));

        Ok(Self {
            mode,
            backup_path,
            format,
            collection: cli.collection.clone(),
            dry_run: cli.dry_run,
            firestore,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["firemirror"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn mode_follows_credentials() {
        let file = CliConfig::default();
        let settings = Settings::resolve(&cli(&["-a", "src.json", "-B", "out"]), &file).unwrap();
        assert_eq!(
            settings.mode,
            Mode::Backup {
                source: "src.json".into()
            }
        );
        let settings = Settings::resolve(&cli(&["-R", "dst.json", "-B", "out"]), &file).unwrap();
        assert_eq!(settings.mode.target(), Some(Path::new("dst.json")));
        assert!(settings.mode.source().is_none());
        let settings =
            Settings::resolve(&cli(&["-a", "src.json", "-R", "dst.json", "-B", "out"]), &file)
                .unwrap();
        assert!(matches!(settings.mode, Mode::Copy { .. }));
    }

    #[test]
    fn missing_credentials_or_path_is_an_error() {
        let file = CliConfig::default();
        let err = Settings::resolve(&cli(&["-B", "out"]), &file).unwrap_err();
        assert!(err.to_string().contains("Missing credentials"));
        let err = Settings::resolve(&cli(&["-a", "src.json"]), &file).unwrap_err();
        assert!(err.to_string().contains("--backup-path"));
    }

    #[test]
    fn flags_override_config_file() {
        let file = CliConfig {
            backup_path: Some("/from/file".into()),
            pretty_print: Some(true),
            emulator_host: Some("localhost:8080".into()),
            database: Some("filedb".into()),
            page_size: Some(50),
            max_retries: Some(9),
        };
        let settings = Settings::resolve(&cli(&["-a", "src.json"]), &file).unwrap();
        assert_eq!(settings.backup_path, PathBuf::from("/from/file"));
        assert_eq!(settings.format, ArtifactFormat::Pretty);
        assert_eq!(settings.firestore.database, "filedb");
        assert_eq!(settings.firestore.page_size, 50);
        assert_eq!(settings.firestore.max_retries, 9);

        let settings = Settings::resolve(
            &cli(&[
                "-a",
                "src.json",
                "-B",
                "/from/flag",
                "--database",
                "flagdb",
                "--emulator-host",
                "127.0.0.1:9090",
            ]),
            &file,
        )
        .unwrap();
        assert_eq!(settings.backup_path, PathBuf::from("/from/flag"));
        assert_eq!(settings.firestore.database, "flagdb");
        assert_eq!(
            settings.firestore.emulator_host.as_deref(),
            Some("127.0.0.1:9090")
        );
    }

    #[test]
    fn built_in_defaults() {
        let settings =
            Settings::resolve(&cli(&["-a", "src.json", "-B", "out"]), &CliConfig::default()).unwrap();
        assert_eq!(settings.format, ArtifactFormat::Compact);
        assert_eq!(settings.firestore.database, DEFAULT_DATABASE);
        assert_eq!(settings.firestore.page_size, DEFAULT_PAGE_SIZE);
        assert!(!settings.dry_run);
        assert!(settings.collection.is_none());
    }

    #[test]
    fn loads_config_files() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"backup_path": "/srv/mirror", "page_size": 25}"#).unwrap();
        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.backup_path, Some(PathBuf::from("/srv/mirror")));
        assert_eq!(config.page_size, Some(25));
        assert!(config.pretty_print.is_none());

        fs::write(&path, r#"{"backup_pth": "/typo"}"#).unwrap();
        assert!(CliConfig::load(Some(&path)).is_err());
        assert!(CliConfig::load(Some(&temp.path().join("missing.json"))).is_err());
    }
}
