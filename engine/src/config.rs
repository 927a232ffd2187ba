//! Engine configuration: a TOML file on disk, overridable by CLI flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// All tunables named in the external-interface section plus the values
/// implied elsewhere in the design (`sample_rate`, `period_frames`,
/// `server_dir`, the restart/rolling-average windows).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub realtime: bool,

    #[serde(default = "default_rtpriority")]
    pub rtpriority: u8,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_client_timeout_msecs")]
    pub client_timeout_msecs: u32,

    #[serde(default = "default_port_max")]
    pub port_max: usize,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_period_frames")]
    pub period_frames: u32,

    #[serde(default = "default_server_dir")]
    pub server_dir: PathBuf,

    #[serde(default = "default_rolling_interval_ms")]
    pub rolling_interval_ms: u32,

    /// `WORK_SCALE` of spec.md §4.4: a cycle is "delayed" when
    /// `driver_delay_scale * spare_usecs <= delayed_usecs`.
    #[serde(default = "default_driver_delay_scale")]
    pub driver_delay_scale: f64,
}

fn default_true() -> bool {
    true
}
fn default_rtpriority() -> u8 {
    10
}
fn default_client_timeout_msecs() -> u32 {
    500
}
fn default_port_max() -> usize {
    128
}
fn default_sample_rate() -> u32 {
    48_000
}
fn default_period_frames() -> u32 {
    256
}
fn default_server_dir() -> PathBuf {
    PathBuf::from("/tmp/engine-server")
}
fn default_rolling_interval_ms() -> u32 {
    1_000
}
fn default_driver_delay_scale() -> f64 {
    1.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            realtime: default_true(),
            rtpriority: default_rtpriority(),
            verbose: false,
            client_timeout_msecs: default_client_timeout_msecs(),
            port_max: default_port_max(),
            sample_rate: default_sample_rate(),
            period_frames: default_period_frames(),
            server_dir: default_server_dir(),
            rolling_interval_ms: default_rolling_interval_ms(),
            driver_delay_scale: default_driver_delay_scale(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, returning `Default` if it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        Ok(cfg)
    }

    pub fn period_usecs(&self) -> u64 {
        (self.period_frames as u64) * 1_000_000 / (self.sample_rate as u64)
    }
}

/// CLI flags, layered over the config file (CLI wins on conflict).
#[derive(Debug, clap::Parser)]
#[command(name = "enginedc", about = "Audio graph engine daemon")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, default_value = "/etc/engine/enginedc.toml")]
    pub config: PathBuf,

    #[arg(long)]
    pub realtime: Option<bool>,

    #[arg(long)]
    pub rtpriority: Option<u8>,

    #[arg(long)]
    pub verbose: bool,

    #[arg(long)]
    pub port_max: Option<usize>,

    #[arg(long)]
    pub server_dir: Option<PathBuf>,
}

impl Cli {
    pub fn apply(self, mut cfg: EngineConfig) -> EngineConfig {
        if let Some(v) = self.realtime {
            cfg.realtime = v;
        }
        if let Some(v) = self.rtpriority {
            cfg.rtpriority = v;
        }
        if self.verbose {
            cfg.verbose = true;
        }
        if let Some(v) = self.port_max {
            cfg.port_max = v;
        }
        if let Some(v) = self.server_dir {
            cfg.server_dir = v;
        }
        cfg
    }
}
