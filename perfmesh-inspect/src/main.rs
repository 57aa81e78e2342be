// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Load the profiler output named by a manifest and report link saturation
//!
//! For example, run using:
//!   cargo run --bin perfmesh-inspect -- --manifest run/manifest.yaml
//! --clock-mhz 1202 --saturation-threshold 50

use std::io;
use std::str::FromStr;

use anyhow::{Result, bail};
use log::{LevelFilter, info};
use perfmesh::arch::Architecture;
use perfmesh::bandwidth::{
    ParamChange, epoch_normalized_cycles, recompute, recompute_normalized, set_workload_cycles,
};
use perfmesh::cluster::{Cluster, ClusterTopology};
use perfmesh::fusion::load_chips;
use simplelog::{ConfigBuilder, SimpleLogger};

use crate::config::Settings;
use crate::manifest::Manifest;
use crate::report::{write_graph, write_topology};

mod config;
mod manifest;
mod report;

/// Take the command-line string and convert it to a Level
fn choose_level(lvl: &str) -> LevelFilter {
    match LevelFilter::from_str(lvl) {
        Ok(level) => level,
        Err(_) => {
            let default = LevelFilter::Error;
            eprintln!("Unable to parse level string '{lvl}', defaulting to {default}");
            default
        }
    }
}

fn main() -> Result<()> {
    let settings = Settings::parse_all_sources()?;

    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_location_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    SimpleLogger::init(
        choose_level(settings.log_level.as_deref().unwrap_or("info")),
        config,
    )?;

    let Some(manifest_path) = &settings.manifest else {
        bail!("No manifest given, use --manifest or set manifest in the configuration file");
    };
    let manifest = Manifest::read(manifest_path)?;

    let requests = manifest.requests()?;
    let mut graphs = Vec::with_capacity(requests.len());
    for result in load_chips(&requests) {
        graphs.push(result?);
    }
    info!("Loaded {} graphs", graphs.len());

    let params = settings.bandwidth_params();
    match settings.workload_cycles {
        Some(cycles) => {
            for graph in &mut graphs {
                set_workload_cycles(graph, cycles, &params);
            }
        }
        None => recompute(graphs.iter_mut(), &params, ParamChange::Everything),
    }
    let normalized_cycles = epoch_normalized_cycles(&graphs);
    recompute_normalized(graphs.iter_mut(), &normalized_cycles);

    let mut out = io::stdout().lock();
    let threshold = settings.saturation_threshold();
    for (entry, graph) in manifest.graphs.iter().zip(&graphs) {
        write_graph(&mut out, &entry.name, graph, threshold)?;
    }

    if let Some(descriptor) = manifest.cluster_descriptor()? {
        let arch: Architecture = manifest.arch.parse()?;
        let cluster = Cluster::from_descriptor(&descriptor, arch)?;
        for epoch in normalized_cycles.keys() {
            let epoch_graphs = graphs.iter().filter(|graph| graph.epoch() == *epoch);
            let topology = ClusterTopology::assemble(*epoch, epoch_graphs, &cluster)?;
            write_topology(&mut out, &topology)?;
        }
    }
    Ok(())
}
