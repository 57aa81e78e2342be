// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Hand-written profiler output for a small wormhole workload.

use crate::fusion::{ChipRequest, ChipSources};
use crate::sources::{ClusterDescriptor, from_json, from_yaml};
use crate::types::FusionError;

/// `matmul0` on cores 1-1 and 2-1 feeding `add0` on 1-2. Pipe 100 is
/// reported by both ends of the 1-1 to 2-1 wire, pipe 101 reads DRAM
/// channel 0, `P42` leaves through ethernet channel 0 and 200 goes to the
/// host.
pub const NETLIST_YAML: &str = "
arch: wormhole
slowest_op_cycles: 100000
bw_limited_op_cycles: 120000
nodes:
  - location: [1, 1]
    type: core
    op_name: matmul0
    op_cycles: 90000
    links:
      noc0_out_east:
        num_occupants: 1
        total_data_in_bytes: 2048
        mapped_pipes:
          '100': 2048
  - location: [2, 1]
    type: core
    op_name: matmul0
    op_cycles: 88000
    links:
      noc0_in_west:
        mapped_pipes:
          '100': 2048
  - location: [1, 2]
    type: core
    op_name: add0
    op_cycles: 40000
  - location: [0, 0]
    type: dram
    links:
      noc0_noc2axi:
        mapped_pipes:
          '101': 24000
  - location: [9, 0]
    type: eth
    links:
      to_ethernet:
        mapped_pipes:
          P42: 4096
  - location: [0, 3]
    type: pcie
    links:
      pcie_inout:
        mapped_pipes:
          '200': 512
dram_channels:
  - channel_id: 0
    subchannels:
      - noc1_noc2axi:
          mapped_pipes:
            '101': 24000
    dram0_inout:
      mapped_pipes:
        '101': 24000
operations:
  matmul0:
    type: matmul
    inputs:
      - name: input0
        type: queue
    outputs:
      - name: add0
        type: operation
  add0:
    type: add
    inputs:
      - name: matmul0
        type: operation
    outputs:
      - name: host_out
        type: queue
";

pub const QUEUES_YAML: &str = "
input0:
  location: LOCATION::DRAM
  allocation-info:
    - address: '0x3000_0000'
      channel: 0
      subchannel: 0
  entries: 4
  data-format: Float16_b
host_out:
  location: LOCATION::HOST
  entries: 1
";

pub const CORE_PERF_YAML: &str = "
worker-cores:
  1-1:
    binary-buffers:
      - buffer-name: kernels
        start-address: '0x0'
        reserved-size-bytes: '0x1_0000'
        consumed-size-bytes: '0x8000'
    data-buffers:
      - buffer-name: input0
        start-address: '0x2_0000'
        reserved-size-bytes: 32KiB
        consumed-size-bytes: 16KiB
    core-attributes:
      op-name: matmul0
core-measurements:
  1-1:
    kernel_total_runtime: 90000
    bw_limited_factor: 1.5
    slowest_operand: input-0
    input_pipe_bw_0: 12.0
    required_input_bw_0: 18.0
";

/// The same report written by the JSON flavour of the analyzer.
pub const OP_PERF_JSON: &str = r#"{
    "matmul0": {
        "op-measurements": {
            "kernel_total_runtime": 95000,
            "bw_limited_factor": 2.25,
            "slowest_operand": "output",
            "warnings": "slow input; check tiling",
            "output_pipe_bw_0": "6.5",
            "required_output_bw_0": "N/A"
        }
    },
    "matmul_on_another_chip": {
        "op-measurements": {
            "bw_limited_factor": 9.0
        }
    }
}"#;

/// Four chips on a 2x2 grid. Chip 0 reaches chip 1 on its right, chip 2
/// below it and chip 3 diagonally.
pub const CLUSTER_YAML: &str = "
chips:
  0: [0, 0, 0, 0]
  1: [1, 0, 0, 0]
  2: [0, 1, 0, 0]
  3: [1, 1, 0, 0]
ethernet_connections:
  - [{chip: 0, chan: 0}, {chip: 1, chan: 1}]
  - [{chip: 0, chan: 8}, {chip: 2, chan: 9}]
  - [{chip: 0, chan: 2}, {chip: 3, chan: 3}]
chips_with_mmio:
  - 0: 0
";

pub fn wormhole_sources() -> Result<ChipSources, FusionError> {
    Ok(ChipSources {
        netlist: Some(from_yaml(NETLIST_YAML)?),
        queues: Some(from_yaml(QUEUES_YAML)?),
        core_perf: Some(from_yaml(CORE_PERF_YAML)?),
        op_perf: Some(from_json(OP_PERF_JSON)?),
    })
}

pub fn wormhole_request(chip_id: u32, epoch: u32) -> Result<ChipRequest, FusionError> {
    Ok(ChipRequest {
        arch: "wormhole".to_string(),
        chip_id,
        epoch,
        sources: wormhole_sources()?,
    })
}

pub fn cluster_descriptor() -> Result<ClusterDescriptor, FusionError> {
    from_yaml(CLUSTER_YAML)
}
