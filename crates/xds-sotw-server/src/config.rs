//! Server configuration.

use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use xds_sotw_core::NackPolicy;
use xds_sotw_proto::DEFAULT_MAX_FRAME_BYTES;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listener configuration
    pub listen: ListenConfig,

    /// Identity served to nodes that send none, and the node a snapshot
    /// file applies to when it names no nodes
    pub node_id: String,

    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,

    /// Snapshot source configuration
    pub snapshot: SnapshotSourceConfig,

    /// What to do after a client rejects a response
    pub nack_policy: NackPolicy,

    /// How often hook counters are logged
    pub report_interval: Duration,
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Bind address
    pub bind: IpAddr,

    /// Listen port
    pub port: u16,

    /// Largest accepted frame
    pub max_frame_bytes: usize,
}

/// Snapshot source configuration.
#[derive(Debug, Clone)]
pub struct SnapshotSourceConfig {
    /// JSON snapshot document, if any
    pub path: Option<PathBuf>,

    /// How often the document is checked for changes
    pub reload_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig {
                bind: IpAddr::from([0, 0, 0, 0]),
                port: 18000,
                max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            },
            node_id: "test-node-id".to_string(),
            log_level: "info".to_string(),
            snapshot: SnapshotSourceConfig {
                path: None,
                reload_interval: Duration::from_secs(5),
            },
            nack_policy: NackPolicy::WaitForSnapshot,
            report_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `XDS_SOTW_PORT`: Listen port
    /// - `XDS_SOTW_BIND`: Bind address
    /// - `XDS_SOTW_NODE_ID`: Default node identity
    /// - `XDS_SOTW_LOG`: Log filter when `RUST_LOG` is unset
    /// - `XDS_SOTW_SNAPSHOT_PATH`: JSON snapshot document
    /// - `XDS_SOTW_RELOAD_INTERVAL_SECS`: Snapshot document poll interval
    /// - `XDS_SOTW_NACK_POLICY`: `wait` or `retry:<secs>`
    /// - `XDS_SOTW_REPORT_INTERVAL_SECS`: Hook counter report interval
    /// - `XDS_SOTW_MAX_FRAME_BYTES`: Largest accepted frame
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparseable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = lookup("XDS_SOTW_PORT") {
            config.listen.port = port.parse().context("Invalid XDS_SOTW_PORT")?;
        }

        if let Some(bind) = lookup("XDS_SOTW_BIND") {
            config.listen.bind = bind.parse().context("Invalid XDS_SOTW_BIND")?;
        }

        if let Some(node_id) = lookup("XDS_SOTW_NODE_ID") {
            config.node_id = node_id;
        }

        if let Some(level) = lookup("XDS_SOTW_LOG") {
            config.log_level = level;
        }

        if let Some(path) = lookup("XDS_SOTW_SNAPSHOT_PATH") {
            config.snapshot.path = Some(PathBuf::from(path));
        }

        if let Some(secs) = lookup("XDS_SOTW_RELOAD_INTERVAL_SECS") {
            let secs: u64 = secs.parse().context("Invalid XDS_SOTW_RELOAD_INTERVAL_SECS")?;
            config.snapshot.reload_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(policy) = lookup("XDS_SOTW_NACK_POLICY") {
            config.nack_policy = parse_nack_policy(&policy)?;
        }

        if let Some(secs) = lookup("XDS_SOTW_REPORT_INTERVAL_SECS") {
            let secs: u64 = secs.parse().context("Invalid XDS_SOTW_REPORT_INTERVAL_SECS")?;
            config.report_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(bytes) = lookup("XDS_SOTW_MAX_FRAME_BYTES") {
            config.listen.max_frame_bytes =
                bytes.parse().context("Invalid XDS_SOTW_MAX_FRAME_BYTES")?;
        }

        Ok(config)
    }
}

/// Parse `wait` or `retry:<secs>`.
fn parse_nack_policy(input: &str) -> Result<NackPolicy> {
    match input.split_once(':') {
        None if input == "wait" => Ok(NackPolicy::WaitForSnapshot),
        Some(("retry", secs)) => {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("Invalid retry delay in XDS_SOTW_NACK_POLICY: {secs}"))?;
            Ok(NackPolicy::RetryAfter(Duration::from_secs(secs)))
        }
        _ => bail!("Invalid XDS_SOTW_NACK_POLICY '{input}': expected 'wait' or 'retry:<secs>'"),
    }
}
