//! Application configuration (ambient stack): a JSON file describing
//! the CAN interface, couplers, filters and logging, following the same
//! nested-struct-plus-`serde`-derive style used throughout this crate.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub can_interface: String,
    #[serde(default)]
    pub couplers: Vec<CouplerConfig>,
    #[serde(default)]
    pub filters: FilterSetConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub source_filter: SourceFilterConfig,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub trace: TraceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            can_interface: "can0".to_string(),
            couplers: Vec::new(),
            filters: FilterSetConfig::default(),
            publisher: PublisherConfig::default(),
            source_filter: SourceFilterConfig::default(),
            logging: LogConfig::default(),
            trace: TraceConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        serde_json::from_str(&contents).map_err(|e| Error::Config(format!("parsing config: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouplerKind {
    Can { interface: String },
    Tcp { address: String },
    Udp { local: String, remote: Option<String> },
    Serial { device: String, baud_rate: u32 },
    File { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplerConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: CouplerKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_soft_timeout_ms")]
    pub soft_timeout_ms: u64,
    #[serde(default)]
    pub trace: bool,
}

fn default_true() -> bool {
    true
}

fn default_soft_timeout_ms() -> u64 {
    2000
}

impl CouplerConfig {
    pub fn soft_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterSetConfig {
    #[serde(default)]
    pub nmea0183: Vec<Nmea0183FilterConfig>,
    #[serde(default)]
    pub nmea2000: Vec<Nmea2000FilterConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Discard,
    Select,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nmea0183FilterConfig {
    pub name: String,
    pub action: FilterAction,
    pub talker: Option<String>,
    pub formatter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nmea2000FilterConfig {
    pub name: String,
    pub action: FilterAction,
    #[serde(default)]
    pub pgns: Vec<u32>,
    pub source: Option<u8>,
    #[serde(default)]
    pub period_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    DropOldest,
    DropNewest,
    BlockBriefly,
}

impl Default for DropPolicy {
    fn default() -> Self {
        DropPolicy::DropOldest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default)]
    pub drop_policy: DropPolicy,
    #[serde(default = "default_quarantine_threshold")]
    pub sink_quarantine_threshold: u32,
}

fn default_queue_depth() -> usize {
    40
}

fn default_quarantine_threshold() -> u32 {
    5
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            drop_policy: DropPolicy::default(),
            sink_quarantine_threshold: default_quarantine_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceFilterConfig {
    #[serde(default)]
    pub pgn_source_map: HashMap<u32, u8>,
}

impl SourceFilterConfig {
    pub fn should_accept(&self, pgn: u32, source: u8) -> bool {
        match self.pgn_source_map.get(&pgn) {
            Some(&allowed) => source == allowed,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub directory: String,
    pub file_prefix: String,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: "./logs".to_string(),
            file_prefix: "nmea_router".to_string(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    pub enabled: bool,
    pub directory: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "./traces".to_string(),
        }
    }
}
