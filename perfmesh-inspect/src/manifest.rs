// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The manifest names the profiler output files of a run.
//!
//! ```yaml
//! arch: wormhole
//! cluster: cluster_desc.yaml
//! graphs:
//!   - name: fwd_0_0
//!     chip_id: 0
//!     epoch: 0
//!     netlist: analyzer/fwd_0_0.yaml
//!     queues: queues/fwd_0_0.yaml
//!     core_perf: perf/fwd_0_0_cores.json
//!     op_perf: perf/op_perf.json
//! ```
//!
//! Relative paths are resolved against the directory of the manifest.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use perfmesh::fusion::{ChipRequest, ChipSources};
use perfmesh::sources::{ClusterDescriptor, from_json, from_yaml};
use perfmesh::types::FusionError;
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub arch: String,
    pub cluster: Option<PathBuf>,
    pub graphs: Vec<GraphEntry>,

    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct GraphEntry {
    pub name: String,
    pub chip_id: u32,
    pub epoch: u32,
    pub netlist: PathBuf,
    pub queues: Option<PathBuf>,
    pub core_perf: Option<PathBuf>,
    pub op_perf: Option<PathBuf>,
}

impl Manifest {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Unable to read manifest {}", path.display()))?;
        let mut manifest: Manifest = serde_yaml::from_str(&text)
            .with_context(|| format!("Unable to parse manifest {}", path.display()))?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(manifest)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Read and parse the sources of every graph, in manifest order.
    pub fn requests(&self) -> Result<Vec<ChipRequest>> {
        self.graphs
            .iter()
            .map(|entry| -> Result<ChipRequest> {
                let sources = ChipSources {
                    netlist: Some(self.parse(&entry.netlist)?),
                    queues: self.parse_optional(entry.queues.as_deref())?,
                    core_perf: self.parse_optional(entry.core_perf.as_deref())?,
                    op_perf: self.parse_optional(entry.op_perf.as_deref())?,
                };
                debug!("{}: sources parsed", entry.name);
                Ok(ChipRequest {
                    arch: self.arch.clone(),
                    chip_id: entry.chip_id,
                    epoch: entry.epoch,
                    sources,
                })
            })
            .collect()
    }

    pub fn cluster_descriptor(&self) -> Result<Option<ClusterDescriptor>> {
        self.parse_optional(self.cluster.as_deref())
    }

    fn parse_optional<T: DeserializeOwned>(&self, path: Option<&Path>) -> Result<Option<T>> {
        path.map(|path| self.parse(path)).transpose()
    }

    fn parse<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let path = self.resolve(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        parse_text(&path, &text).with_context(|| format!("Unable to parse {}", path.display()))
    }
}

/// JSON for `.json` files, YAML for anything else.
fn parse_text<T: DeserializeOwned>(path: &Path, text: &str) -> Result<T, FusionError> {
    let is_json = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    if is_json {
        from_json(text)
    } else {
        from_yaml(text)
    }
}
