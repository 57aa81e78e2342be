// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Settings gathered from defaults, a TOML file, the environment and the
//! command line, in increasing order of precedence.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use perfmesh::bandwidth::{
    BandwidthParams, DEFAULT_CLOCK_MHZ, DEFAULT_CONGESTION_THRESHOLD_PERCENT,
    DEFAULT_DRAM_BANDWIDTH_GBS, DEFAULT_PCIE_BANDWIDTH_GBS,
};
use serde::{Deserialize, Serialize};

/// Configuration file read when `--conf-file` is not given.
pub const DEFAULT_CONF_FILE: &str = "perfmesh.toml";

/// Prefix of the environment variables that override the configuration file.
pub const ENV_PREFIX: &str = "PERFMESH_";

/// Command-line arguments.
///
/// Every field is optional so that only the values the user gave override the
/// other sources.
#[derive(Parser, Debug, Default, Deserialize, Serialize)]
#[command(about = "Fuse profiler output into chip graphs and report link saturation")]
pub struct Settings {
    /// Level of log message to display.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Manifest listing the architecture, cluster and per-graph source files.
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(short, long)]
    #[serde(skip)]
    pub conf_file: Option<PathBuf>,

    /// Core clock in MHz.
    #[arg(long)]
    pub clock_mhz: Option<f64>,

    /// DRAM bandwidth in GB/s.
    #[arg(long)]
    pub dram_bandwidth_gbs: Option<f64>,

    /// PCIe bandwidth in GB/s.
    #[arg(long)]
    pub pcie_bandwidth_gbs: Option<f64>,

    /// Links at or above this saturation percentage are reported.
    #[arg(long)]
    pub saturation_threshold: Option<f64>,

    /// Replace the workload cycle count of every graph.
    #[arg(long)]
    pub workload_cycles: Option<u64>,
}

impl Settings {
    fn defaults() -> Self {
        Self {
            log_level: Some("info".to_string()),
            clock_mhz: Some(DEFAULT_CLOCK_MHZ),
            dram_bandwidth_gbs: Some(DEFAULT_DRAM_BANDWIDTH_GBS),
            pcie_bandwidth_gbs: Some(DEFAULT_PCIE_BANDWIDTH_GBS),
            saturation_threshold: Some(DEFAULT_CONGESTION_THRESHOLD_PERCENT),
            ..Default::default()
        }
    }

    pub fn parse_all_sources() -> Result<Self> {
        let cli = Self::parse();
        let conf_file = cli
            .conf_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONF_FILE));
        let config = Self::from_figment(&conf_file)?;
        Ok(config.merge(cli))
    }

    /// Defaults, then `conf_file` if it exists, then the environment.
    pub fn from_figment(conf_file: &Path) -> Result<Self> {
        let mut config: Self = Figment::new()
            .merge(Serialized::defaults(Self::defaults()))
            .merge(Toml::file(conf_file))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.conf_file = Some(conf_file.to_path_buf());
        Ok(config)
    }

    fn merge(mut self, cli: Settings) -> Self {
        if cli.log_level.is_some() {
            self.log_level = cli.log_level;
        }
        if cli.manifest.is_some() {
            self.manifest = cli.manifest;
        }
        if cli.conf_file.is_some() {
            self.conf_file = cli.conf_file;
        }
        if cli.clock_mhz.is_some() {
            self.clock_mhz = cli.clock_mhz;
        }
        if cli.dram_bandwidth_gbs.is_some() {
            self.dram_bandwidth_gbs = cli.dram_bandwidth_gbs;
        }
        if cli.pcie_bandwidth_gbs.is_some() {
            self.pcie_bandwidth_gbs = cli.pcie_bandwidth_gbs;
        }
        if cli.saturation_threshold.is_some() {
            self.saturation_threshold = cli.saturation_threshold;
        }
        if cli.workload_cycles.is_some() {
            self.workload_cycles = cli.workload_cycles;
        }
        self
    }

    #[must_use]
    pub fn bandwidth_params(&self) -> BandwidthParams {
        BandwidthParams {
            clock_mhz: self.clock_mhz.unwrap_or(DEFAULT_CLOCK_MHZ),
            dram_bandwidth_gbs: self.dram_bandwidth_gbs.unwrap_or(DEFAULT_DRAM_BANDWIDTH_GBS),
            pcie_bandwidth_gbs: self.pcie_bandwidth_gbs.unwrap_or(DEFAULT_PCIE_BANDWIDTH_GBS),
        }
    }

    #[must_use]
    pub fn saturation_threshold(&self) -> f64 {
        self.saturation_threshold.unwrap_or(DEFAULT_CONGESTION_THRESHOLD_PERCENT)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let config = Settings::from_figment(Path::new("/nonexistent/perfmesh.toml")).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert_eq!(config.bandwidth_params(), BandwidthParams::default());
        assert_eq!(config.saturation_threshold(), 75.0);
        assert!(config.workload_cycles.is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "clock_mhz = 1202.0\nworkload_cycles = 5000").unwrap();

        let config = Settings::from_figment(file.path()).unwrap();
        assert_eq!(config.clock_mhz, Some(1202.0));
        assert_eq!(config.dram_bandwidth_gbs, Some(21.5));
        assert_eq!(config.workload_cycles, Some(5000));
    }

    #[test]
    fn command_line_wins() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "dram_bandwidth_gbs = 10.0\nlog_level = \"warn\"").unwrap();
        let config = Settings::from_figment(file.path()).unwrap();

        let cli = Settings::parse_from(["perfmesh-inspect", "--dram-bandwidth-gbs", "20"]);
        let settings = config.merge(cli);
        assert_eq!(settings.dram_bandwidth_gbs, Some(20.0));
        assert_eq!(settings.log_level.as_deref(), Some("warn"));
    }
}
