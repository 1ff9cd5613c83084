//! # Server Configuration
//!
//! Process flags for the listener, TLS, durability, eviction, and
//! clustering. Invalid combinations fail validation before anything
//! binds, so configuration errors exit non-zero without side effects.

use std::path::PathBuf;

use clap::Parser;

use ckv_engine::EvictionPolicy;

use crate::aof::SyncStrategy;

#[derive(Debug, Clone, Parser)]
#[command(name = "ckv-server", version, about = "CoralKV in-memory data store server")]
pub struct Config {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// TCP port.
    #[arg(long, default_value_t = 7878)]
    pub port: u16,

    /// Enable TLS termination.
    #[arg(long)]
    pub tls: bool,

    /// Server certificate (PEM), required with --tls.
    #[arg(long)]
    pub cert_file: Option<PathBuf>,

    /// Server private key (PEM), required with --tls.
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Client CA bundle (PEM); enables mTLS.
    #[arg(long)]
    pub client_ca_file: Option<PathBuf>,

    /// Directory for the preamble, append log, and snapshots.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Enable the append-only file.
    #[arg(long)]
    pub aof: bool,

    /// AOF fsync strategy: always, everysec, or no.
    #[arg(long, default_value = "everysec")]
    pub aof_sync: SyncStrategy,

    /// Enable periodic snapshots.
    #[arg(long)]
    pub snapshot: bool,

    /// Seconds between periodic snapshots.
    #[arg(long, default_value_t = 300)]
    pub snapshot_interval_secs: u64,

    /// Eviction policy applied at the key budget.
    #[arg(long, default_value = "noeviction")]
    pub eviction_policy: EvictionPolicy,

    /// Milliseconds between TTL reaper passes.
    #[arg(long, default_value_t = 100)]
    pub eviction_interval_ms: u64,

    /// Key budget before eviction; 0 disables the limit.
    #[arg(long, default_value_t = 0)]
    pub max_keys: usize,

    /// Enable cluster mode: synchronized writes go through the
    /// replicated log.
    #[arg(long)]
    pub cluster: bool,

    /// This node's identifier.
    #[arg(long, default_value = "node-1")]
    pub server_id: String,

    /// Raft peer address; repeat for each peer.
    #[arg(long = "peer")]
    pub peers: Vec<String>,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tls {
            anyhow::ensure!(self.cert_file.is_some(), "--tls requires --cert-file");
            anyhow::ensure!(self.key_file.is_some(), "--tls requires --key-file");
        }
        if self.client_ca_file.is_some() {
            anyhow::ensure!(self.tls, "--client-ca-file requires --tls");
        }
        if !self.peers.is_empty() {
            anyhow::ensure!(self.peers.iter().all(|peer| !peer.is_empty()), "empty --peer address");
            anyhow::ensure!(self.cluster, "--peer requires --cluster");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Config {
        Config::parse_from(std::iter::once("ckv-server").chain(argv.iter().copied()))
    }

    #[test]
    fn defaults_are_standalone_noeviction() {
        let config = parse(&[]);
        assert_eq!(config.listen_addr(), "127.0.0.1:7878");
        assert_eq!(config.eviction_policy, EvictionPolicy::NoEviction);
        assert_eq!(config.aof_sync, SyncStrategy::EverySec);
        assert!(!config.cluster);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flags_parse_into_typed_fields() {
        let config = parse(&[
            "--port",
            "9000",
            "--eviction-policy",
            "allkeys-lru",
            "--aof",
            "--aof-sync",
            "always",
            "--cluster",
            "--peer",
            "10.0.0.2:7878",
            "--peer",
            "10.0.0.3:7878",
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.eviction_policy, EvictionPolicy::AllkeysLru);
        assert_eq!(config.aof_sync, SyncStrategy::Always);
        assert_eq!(config.peers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tls_without_certificates_fails_validation() {
        let config = parse(&["--tls"]);
        assert!(config.validate().is_err());

        let config = parse(&["--peer", "10.0.0.2:7878"]);
        assert!(config.validate().is_err());
    }
}
