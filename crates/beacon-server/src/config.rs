//! Server configuration — parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use beacon_crypto::network_from_name;
use beacon_crypto::seed::parse_mnemonic;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Coordinator endpoint settings
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// Bitcoin network settings
    #[serde(default)]
    pub bitcoin: BitcoinSection,

    /// Participant endpoints, in subscription order
    pub participants: Vec<ParticipantSection>,

    /// Signing demo settings
    #[serde(default)]
    pub signing: SigningSection,
}

/// Coordinator endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_coordinator_name")]
    pub name: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_coordinator_port")]
    pub port: u16,

    /// Cohort target size; the cohort finalizes at this many opt-ins
    #[serde(default = "default_min_participants")]
    pub min_participants: usize,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            name: default_coordinator_name(),
            host: default_host(),
            port: default_coordinator_port(),
            min_participants: default_min_participants(),
            log_level: default_log_level(),
        }
    }
}

/// Bitcoin network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinSection {
    /// Bitcoin network: "mainnet", "testnet", "signet", "regtest"
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for BitcoinSection {
    fn default() -> Self {
        Self {
            network: default_network(),
        }
    }
}

/// One participant endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSection {
    pub name: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    /// BIP-39 mnemonic seeding this participant's beacon keys.
    /// Generated fresh on startup when absent.
    #[serde(default)]
    pub mnemonic: Option<String>,
}

/// Signing demo settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSection {
    /// Run a signing session after keygen completes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Request payloads, sent by participants in order (first payload from
    /// the first participant, and so on)
    #[serde(default = "default_requests")]
    pub requests: Vec<String>,
}

impl Default for SigningSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            requests: default_requests(),
        }
    }
}

fn default_coordinator_name() -> String {
    "Coordinator".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_coordinator_port() -> u16 {
    8767
}

fn default_min_participants() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_network() -> String {
    "signet".to_string()
}

fn default_true() -> bool {
    true
}

fn default_requests() -> Vec<String> {
    vec!["Hello, world!".to_string()]
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `BEACON_NETWORK`
    /// - `BEACON_LOG_LEVEL`
    /// - `BEACON_MIN_PARTICIPANTS`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BEACON_NETWORK") {
            self.bitcoin.network = v;
        }
        if let Ok(v) = std::env::var("BEACON_LOG_LEVEL") {
            self.coordinator.log_level = v;
        }
        if let Ok(v) = std::env::var("BEACON_MIN_PARTICIPANTS") {
            if let Ok(n) = v.parse::<usize>() {
                self.coordinator.min_participants = n;
            }
        }
    }

    /// Check the configuration is internally consistent.
    pub fn validate(&self) -> Result<()> {
        self.network()?;

        if self.coordinator.min_participants < 2 {
            anyhow::bail!(
                "min_participants must be at least 2, got {}",
                self.coordinator.min_participants
            );
        }
        if self.participants.len() < self.coordinator.min_participants {
            anyhow::bail!(
                "{} participant(s) configured but the cohort needs {}",
                self.participants.len(),
                self.coordinator.min_participants
            );
        }

        let mut names: Vec<&str> = self.participants.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.participants.len() {
            anyhow::bail!("participant names must be unique");
        }

        for participant in &self.participants {
            if let Some(mnemonic) = &participant.mnemonic {
                parse_mnemonic(mnemonic)
                    .with_context(|| format!("bad mnemonic for participant {}", participant.name))?;
            }
        }

        if self.signing.enabled && self.signing.requests.len() > self.participants.len() {
            anyhow::bail!(
                "{} signing request(s) configured but only {} participant(s)",
                self.signing.requests.len(),
                self.participants.len()
            );
        }

        Ok(())
    }

    /// The parsed Bitcoin network.
    pub fn network(&self) -> Result<bitcoin::Network> {
        network_from_name(&self.bitcoin.network)
            .with_context(|| format!("unknown network: {}", self.bitcoin.network))
    }
}
