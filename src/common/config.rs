//! # Configuration
//!
//! The candidate daemon is configured from command-line flags, optionally layered
//! on top of a TOML file given with `--config`. Flags always win over the file.
//!
//! ```toml
//! [store]
//! endpoints = ["10.0.0.1:4001", "10.0.0.2:4001"]
//! timeout_secs = 5
//!
//! [election]
//! key = "scheduler"
//! ttl_secs = 30
//! sleep_secs = 5
//!
//! [artifact]
//! source_file = "/kubernetes/kube-scheduler.manifest"
//! dest_file = "/manifests/kube-scheduler.manifest"
//! ```
//!
//! Missing required values are reported as a [`ConfigError`] before any store
//! or file operation takes place.

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TTL_SECS: u64 = 30;
pub const DEFAULT_SLEEP_SECS: u64 = 5;
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_STARTUP_JITTER_MS: u64 = 500;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let file: FileConfig = load_config("/etc/podmaster/scheduler.toml")?;
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Command-line arguments for the `podmaster` binary.
///
/// Every value is optional at parse time so that it can come from `--config`
/// instead; [`PodMasterConfig::resolve`] enforces what is actually required.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "podmaster",
    author,
    version,
    about = "Holds a lease-lock in a shared store and keeps a file present only while master",
    long_about = None
)]
pub struct CliArgs {
    /// Optional TOML file with the same settings; flags override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Comma-separated list of lease store endpoints (host:port)
    #[arg(long)]
    pub store_endpoints: Option<String>,

    /// Timeout for a single store call, in seconds
    #[arg(long)]
    pub store_timeout_secs: Option<u64>,

    /// The key to use for the lock
    #[arg(long)]
    pub key: Option<String>,

    /// The name to use for the reservation. If empty, the hostname is used
    #[arg(long)]
    pub whoami: Option<String>,

    /// The time to live for the lock, in seconds
    #[arg(long)]
    pub ttl_secs: Option<u64>,

    /// The length of time to sleep between checking the lock, in seconds
    #[arg(long)]
    pub sleep_secs: Option<u64>,

    /// Upper bound of the random delay before the first check, in milliseconds
    #[arg(long)]
    pub startup_jitter_ms: Option<u64>,

    /// The source file to copy from
    #[arg(long)]
    pub source_file: Option<PathBuf>,

    /// The destination file to copy to
    #[arg(long)]
    pub dest_file: Option<PathBuf>,
}

// ============================================================================
// FILE CONFIGURATION
// ============================================================================

/// Settings read from the optional TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub store: StoreSection,
    pub election: ElectionSection,
    pub artifact: ArtifactSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Lease store endpoints (host:port), tried in order
    pub endpoints: Vec<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSection {
    pub key: Option<String>,
    pub whoami: Option<String>,
    pub ttl_secs: Option<u64>,
    pub sleep_secs: Option<u64>,
    pub startup_jitter_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSection {
    pub source_file: Option<PathBuf>,
    pub dest_file: Option<PathBuf>,
}

// ============================================================================
// RESOLVED CONFIGURATION
// ============================================================================

/// Startup configuration problems. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--{flag}=<{hint}> is required")]
    Missing {
        flag: &'static str,
        hint: &'static str,
    },

    #[error("--{flag} must be greater than zero")]
    Zero { flag: &'static str },

    #[error("invalid store endpoint {0:?}, expected host:port")]
    BadEndpoint(String),

    #[error("--whoami is empty and the hostname could not be determined")]
    NoHostname,
}

/// Fully validated configuration of one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodMasterConfig {
    /// Store endpoints, in the order they are tried
    pub endpoints: Vec<String>,
    /// Bound on a single store call
    pub store_timeout: Duration,
    /// Election key shared by all candidates
    pub key: String,
    /// Name this candidate writes into the lease
    pub identity: String,
    /// Lease lifetime
    pub ttl: Duration,
    /// Pause between loop ticks
    pub interval: Duration,
    /// Upper bound of the random delay before the first tick
    pub startup_jitter: Duration,
    /// File copied into place while master
    pub source: PathBuf,
    /// Managed file, present only while master
    pub dest: PathBuf,
}

impl PodMasterConfig {
    /// Time allowed for one election round.
    ///
    /// A round makes up to two store calls, and a call may walk every endpoint
    /// with a connect and an exchange timeout each.
    pub fn round_timeout(&self) -> Duration {
        let endpoints = u32::try_from(self.endpoints.len()).unwrap_or(u32::MAX);
        self.store_timeout
            .saturating_mul(endpoints.saturating_add(1))
            .saturating_mul(2)
    }

    /// Merge flags over the file settings and validate the result.
    ///
    /// An empty `whoami` falls back to the local hostname.
    ///
    /// # Example
    /// ```ignore
    /// let args = CliArgs::parse();
    /// let file = match &args.config {
    ///     Some(path) => load_config(path)?,
    ///     None => FileConfig::default(),
    /// };
    /// let config = PodMasterConfig::resolve(&args, file)?;
    /// ```
    pub fn resolve(args: &CliArgs, file: FileConfig) -> Result<Self, ConfigError> {
        Self::resolve_with(args, file, hostname)
    }

    fn resolve_with(
        args: &CliArgs,
        file: FileConfig,
        hostname: impl FnOnce() -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let endpoints = match non_empty(args.store_endpoints.clone()) {
            Some(list) => parse_endpoints(list.split(','))?,
            None => parse_endpoints(file.store.endpoints.iter().map(String::as_str))?,
        };
        if endpoints.is_empty() {
            return Err(ConfigError::Missing {
                flag: "store-endpoints",
                hint: "server-list",
            });
        }

        let key = non_empty(args.key.clone().or(file.election.key)).ok_or(
            ConfigError::Missing {
                flag: "key",
                hint: "some-key",
            },
        )?;

        let source = non_empty_path(args.source_file.clone().or(file.artifact.source_file))
            .ok_or(ConfigError::Missing {
                flag: "source-file",
                hint: "some-file",
            })?;

        let dest = non_empty_path(args.dest_file.clone().or(file.artifact.dest_file)).ok_or(
            ConfigError::Missing {
                flag: "dest-file",
                hint: "some-file",
            },
        )?;

        let ttl_secs = positive(
            "ttl-secs",
            args.ttl_secs.or(file.election.ttl_secs),
            DEFAULT_TTL_SECS,
        )?;
        let sleep_secs = positive(
            "sleep-secs",
            args.sleep_secs.or(file.election.sleep_secs),
            DEFAULT_SLEEP_SECS,
        )?;
        let timeout_secs = positive(
            "store-timeout-secs",
            args.store_timeout_secs.or(file.store.timeout_secs),
            DEFAULT_STORE_TIMEOUT_SECS,
        )?;
        let jitter_ms = args
            .startup_jitter_ms
            .or(file.election.startup_jitter_ms)
            .unwrap_or(DEFAULT_STARTUP_JITTER_MS);

        let identity = match non_empty(args.whoami.clone().or(file.election.whoami)) {
            Some(name) => name,
            None => {
                let name = hostname().ok_or(ConfigError::NoHostname)?;
                info!("--whoami is empty, defaulting to {}", name);
                name
            }
        };

        if sleep_secs.saturating_mul(2) >= ttl_secs {
            warn!(
                "⚠️  Sleep of {}s is at least half the {}s TTL, the master may lose its lease between checks",
                sleep_secs, ttl_secs
            );
        }

        Ok(Self {
            endpoints,
            store_timeout: Duration::from_secs(timeout_secs),
            key,
            identity,
            ttl: Duration::from_secs(ttl_secs),
            interval: Duration::from_secs(sleep_secs),
            startup_jitter: Duration::from_millis(jitter_ms),
            source,
            dest,
        })
    }
}

/// Local hostname, used when no identity is configured.
pub fn hostname() -> Option<String> {
    sysinfo::System::host_name().filter(|name| !name.trim().is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_empty_path(value: Option<PathBuf>) -> Option<PathBuf> {
    value.filter(|p| !p.as_os_str().is_empty())
}

fn positive(flag: &'static str, value: Option<u64>, default: u64) -> Result<u64, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::Zero { flag }),
        v => Ok(v),
    }
}

fn parse_endpoints<'a>(raw: impl Iterator<Item = &'a str>) -> Result<Vec<String>, ConfigError> {
    let mut endpoints = Vec::new();
    for entry in raw.map(str::trim).filter(|e| !e.is_empty()) {
        match entry.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                endpoints.push(entry.to_string())
            }
            _ => return Err(ConfigError::BadEndpoint(entry.to_string())),
        }
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn full_args() -> CliArgs {
        CliArgs {
            store_endpoints: Some("127.0.0.1:4001, 127.0.0.1:4002".to_string()),
            key: Some("scheduler".to_string()),
            whoami: Some("node-a".to_string()),
            source_file: Some(PathBuf::from("/staging/scheduler.manifest")),
            dest_file: Some(PathBuf::from("/manifests/scheduler.manifest")),
            ..Default::default()
        }
    }

    fn no_hostname() -> Option<String> {
        None
    }

    #[test]
    fn test_flags_with_defaults() {
        let config =
            PodMasterConfig::resolve_with(&full_args(), FileConfig::default(), no_hostname)
                .unwrap();

        assert_eq!(config.endpoints, vec!["127.0.0.1:4001", "127.0.0.1:4002"]);
        assert_eq!(config.key, "scheduler");
        assert_eq!(config.identity, "node-a");
        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.startup_jitter, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let args = CliArgs {
            key: None,
            ..full_args()
        };
        let err = PodMasterConfig::resolve_with(&args, FileConfig::default(), no_hostname)
            .unwrap_err();

        assert!(matches!(err, ConfigError::Missing { flag: "key", .. }));
        assert_eq!(err.to_string(), "--key=<some-key> is required");
    }

    #[test]
    fn test_empty_values_count_as_missing() {
        let args = CliArgs {
            store_endpoints: Some(" , ".to_string()),
            ..full_args()
        };
        let err = PodMasterConfig::resolve_with(&args, FileConfig::default(), no_hostname)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                flag: "store-endpoints",
                ..
            }
        ));

        let args = CliArgs {
            dest_file: Some(PathBuf::new()),
            ..full_args()
        };
        let err = PodMasterConfig::resolve_with(&args, FileConfig::default(), no_hostname)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                flag: "dest-file",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let args = CliArgs {
            ttl_secs: Some(0),
            ..full_args()
        };
        let err = PodMasterConfig::resolve_with(&args, FileConfig::default(), no_hostname)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero { flag: "ttl-secs" }));
    }

    #[test]
    fn test_huge_sleep_resolves() {
        let args = CliArgs {
            sleep_secs: Some(u64::MAX),
            ..full_args()
        };
        let config = PodMasterConfig::resolve_with(&args, FileConfig::default(), no_hostname)
            .unwrap();
        assert_eq!(config.interval, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_round_timeout_covers_every_endpoint() {
        let config =
            PodMasterConfig::resolve_with(&full_args(), FileConfig::default(), no_hostname)
                .unwrap();

        // Two endpoints at 5s each: (2 + 1) * 2 calls' worth.
        assert_eq!(config.round_timeout(), Duration::from_secs(30));

        let args = CliArgs {
            store_timeout_secs: Some(u64::MAX),
            ..full_args()
        };
        let config = PodMasterConfig::resolve_with(&args, FileConfig::default(), no_hostname)
            .unwrap();
        assert_eq!(config.round_timeout(), Duration::MAX);
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let args = CliArgs {
            store_endpoints: Some("127.0.0.1".to_string()),
            ..full_args()
        };
        let err = PodMasterConfig::resolve_with(&args, FileConfig::default(), no_hostname)
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadEndpoint(_)));
    }

    #[test]
    fn test_whoami_falls_back_to_hostname() {
        let args = CliArgs {
            whoami: Some(String::new()),
            ..full_args()
        };
        let config = PodMasterConfig::resolve_with(&args, FileConfig::default(), || {
            Some("master-1".to_string())
        })
        .unwrap();
        assert_eq!(config.identity, "master-1");

        let err = PodMasterConfig::resolve_with(&args, FileConfig::default(), no_hostname)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoHostname));
    }

    #[test]
    fn test_file_settings_are_overridden_by_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[store]
endpoints = ["10.0.0.1:4001"]
timeout_secs = 2

[election]
key = "controller-manager"
whoami = "from-file"
ttl_secs = 60
sleep_secs = 10

[artifact]
source_file = "/staging/cm.manifest"
dest_file = "/manifests/cm.manifest"
"#
        )
        .unwrap();

        let loaded: FileConfig = load_config(file.path()).unwrap();
        let args = CliArgs {
            whoami: Some("from-flag".to_string()),
            ttl_secs: Some(20),
            ..Default::default()
        };
        let config = PodMasterConfig::resolve_with(&args, loaded, no_hostname).unwrap();

        assert_eq!(config.endpoints, vec!["10.0.0.1:4001"]);
        assert_eq!(config.key, "controller-manager");
        assert_eq!(config.identity, "from-flag");
        assert_eq!(config.ttl, Duration::from_secs(20));
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.store_timeout, Duration::from_secs(2));
        assert_eq!(config.dest, PathBuf::from("/manifests/cm.manifest"));
    }

    #[test]
    fn test_cli_parses_long_flag_names() {
        let args = CliArgs::try_parse_from([
            "podmaster",
            "--store-endpoints=127.0.0.1:4001",
            "--key=scheduler",
            "--source-file=/a",
            "--dest-file=/b",
            "--ttl-secs=12",
            "--sleep-secs=3",
        ])
        .unwrap();

        assert_eq!(args.key.as_deref(), Some("scheduler"));
        assert_eq!(args.ttl_secs, Some(12));
        assert_eq!(args.sleep_secs, Some(3));
    }
}
