// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Link bandwidth and saturation.
//!
//! The figures are a pure function of the link's data volume, the graph's
//! workload cycle count and a [BandwidthParams]. Nothing is cached between
//! calls, so recomputing with the same inputs always writes the same values.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::ChipGraph;
use crate::entity::{Link, LinkKind};

/// Ethernet links run at a fixed rate independent of the core clock.
pub const ETHERNET_BANDWIDTH_BYTES_PER_CYCLE: f64 = 12.5;

pub const DEFAULT_CLOCK_MHZ: f64 = 1000.0;
pub const DEFAULT_DRAM_BANDWIDTH_GBS: f64 = 21.5;
pub const DEFAULT_PCIE_BANDWIDTH_GBS: f64 = 24.0;

/// Saturation above which a link is reported as congested.
pub const DEFAULT_CONGESTION_THRESHOLD_PERCENT: f64 = 75.0;

/// User-tunable inputs of the saturation figures.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BandwidthParams {
    pub clock_mhz: f64,
    pub dram_bandwidth_gbs: f64,
    pub pcie_bandwidth_gbs: f64,
}

impl Default for BandwidthParams {
    fn default() -> Self {
        Self {
            clock_mhz: DEFAULT_CLOCK_MHZ,
            dram_bandwidth_gbs: DEFAULT_DRAM_BANDWIDTH_GBS,
            pcie_bandwidth_gbs: DEFAULT_PCIE_BANDWIDTH_GBS,
        }
    }
}

impl BandwidthParams {
    /// Bytes per cycle that `link` can carry.
    #[must_use]
    pub fn max_bandwidth_per_cycle(&self, link: &Link) -> f64 {
        match link.kind {
            LinkKind::Ethernet => ETHERNET_BANDWIDTH_BYTES_PER_CYCLE,
            LinkKind::Dram => per_cycle(self.dram_bandwidth_gbs, self.clock_mhz),
            LinkKind::Pcie => per_cycle(self.pcie_bandwidth_gbs, self.clock_mhz),
            LinkKind::Noc0 | LinkKind::Noc1 => link.nominal_bandwidth,
        }
    }
}

/// The parameter that changed, which selects the links to recompute.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamChange {
    Clock,
    DramBandwidth,
    PcieBandwidth,
    WorkloadCycles,
    Everything,
}

impl ParamChange {
    #[must_use]
    pub fn link_kinds(&self) -> &'static [LinkKind] {
        match self {
            ParamChange::Clock => &[LinkKind::Dram, LinkKind::Pcie],
            ParamChange::DramBandwidth => &[LinkKind::Dram],
            ParamChange::PcieBandwidth => &[LinkKind::Pcie],
            ParamChange::WorkloadCycles | ParamChange::Everything => &LinkKind::ALL,
        }
    }
}

/// Convert GB/s at `clock_mhz` into bytes per cycle.
#[must_use]
pub fn per_cycle(bandwidth_gbs: f64, clock_mhz: f64) -> f64 {
    let bytes_per_second = bandwidth_gbs * 1e9;
    let clock_hz = clock_mhz * 1e6;
    finite_or_zero(bytes_per_second / clock_hz)
}

#[must_use]
pub fn bytes_per_cycle(total_data_bytes: u64, cycles: u64) -> f64 {
    if cycles == 0 {
        return 0.0;
    }
    finite_or_zero(total_data_bytes as f64 / cycles as f64)
}

#[must_use]
pub fn saturation_percent(bytes_per_cycle: f64, max_bandwidth_per_cycle: f64) -> f64 {
    finite_or_zero(bytes_per_cycle / max_bandwidth_per_cycle * 100.0)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Rewrite the derived figures of the links affected by `change`.
///
/// An empty iterator is a no-op.
pub fn recompute<'a>(
    graphs: impl IntoIterator<Item = &'a mut ChipGraph>,
    params: &BandwidthParams,
    change: ParamChange,
) {
    for graph in graphs {
        for kind in change.link_kinds() {
            recompute_kind(graph, params, *kind);
        }
        debug!(
            "Chip {} epoch {}: recomputed {change:?}",
            graph.chip_id(),
            graph.epoch()
        );
    }
}

fn recompute_kind(graph: &mut ChipGraph, params: &BandwidthParams, kind: LinkKind) {
    let cycles = graph.total_workload_cycles();
    graph.update_links(kind, |link| {
        let max_bandwidth = params.max_bandwidth_per_cycle(link);
        let needed = bytes_per_cycle(link.total_data_bytes, cycles);
        let saturation = saturation_percent(needed, max_bandwidth);
        link.set_derived(max_bandwidth, needed, saturation);
    });
}

/// Replace the workload cycle count of `graph` and recompute every link.
pub fn set_workload_cycles(graph: &mut ChipGraph, cycles: u64, params: &BandwidthParams) {
    graph.set_total_workload_cycles(cycles);
    recompute([graph], params, ParamChange::WorkloadCycles);
}

/// Cycle count of the slowest graph of each epoch, at least 1.
pub fn epoch_normalized_cycles<'a>(
    graphs: impl IntoIterator<Item = &'a ChipGraph>,
) -> BTreeMap<u32, u64> {
    let mut cycles: BTreeMap<u32, u64> = BTreeMap::new();
    for graph in graphs {
        let epoch_cycles = cycles.entry(graph.epoch()).or_insert(1);
        *epoch_cycles = (*epoch_cycles).max(graph.total_workload_cycles());
    }
    cycles
}

/// Saturate ethernet links against their epoch's normalized cycle count, so
/// chips that finish early are not reported as less loaded.
pub fn recompute_normalized<'a>(
    graphs: impl IntoIterator<Item = &'a mut ChipGraph>,
    normalized_cycles: &BTreeMap<u32, u64>,
) {
    for graph in graphs {
        let Some(&cycles) = normalized_cycles.get(&graph.epoch()) else {
            continue;
        };
        graph.update_links(LinkKind::Ethernet, |link| {
            let needed = bytes_per_cycle(link.total_data_bytes, cycles);
            link.set_normalized_saturation(saturation_percent(
                needed,
                ETHERNET_BANDWIDTH_BYTES_PER_CYCLE,
            ));
        });
    }
}

/// Links at or above `threshold_percent`, most saturated first.
#[must_use]
pub fn congested_links(graph: &ChipGraph, threshold_percent: f64) -> Vec<&Link> {
    let mut links: Vec<&Link> = graph
        .links()
        .filter(|link| link.saturation_percent() >= threshold_percent)
        .collect();
    links.sort_by(|a, b| {
        b.saturation_percent()
            .total_cmp(&a.saturation_percent())
            .then_with(|| a.id.cmp(&b.id))
    });
    links
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn dram_per_cycle() {
        assert_relative_eq!(per_cycle(20.0, 1202.0), 16.638935, epsilon = 1e-6);
        assert_relative_eq!(per_cycle(21.5, 1000.0), 21.5);
    }

    #[test]
    fn degenerate_inputs_are_zero() {
        assert_eq!(per_cycle(20.0, 0.0), 0.0);
        assert_eq!(bytes_per_cycle(1024, 0), 0.0);
        assert_eq!(saturation_percent(0.24, 0.0), 0.0);
        assert_eq!(saturation_percent(0.0, 0.0), 0.0);
        assert_eq!(saturation_percent(f64::NAN, 16.0), 0.0);
    }

    #[test]
    fn clock_changes_touch_dram_and_pcie() {
        assert_eq!(
            ParamChange::Clock.link_kinds(),
            &[LinkKind::Dram, LinkKind::Pcie]
        );
        assert_eq!(ParamChange::Everything.link_kinds().len(), 5);
    }
}
