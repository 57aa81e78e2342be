// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Buffer layout of a core's L1 memory.

use std::collections::BTreeMap;

use crate::malformed;
use crate::types::FusionResult;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryChunk {
    pub name: Option<String>,
    pub address: u64,
    pub size: u64,
    pub consumed: u64,
}

impl MemoryChunk {
    /// Last byte covered by the chunk.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.address + self.size - 1
    }

    #[must_use]
    pub fn percent_consumed(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.consumed as f64 / self.size as f64 * 100.0
    }
}

/// Chunks of one buffer class, keyed by start address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkList {
    chunks: BTreeMap<u64, MemoryChunk>,
}

impl ChunkList {
    fn insert(&mut self, chunk: MemoryChunk) -> FusionResult {
        let start = chunk.address;
        if chunk.size == 0 {
            return malformed!("Invalid chunk size 0 at {start:#x}");
        }
        let end = chunk.end();

        if let Some((_, prev)) = self.chunks.range(..=start).next_back()
            && prev.end() >= start
        {
            return malformed!("Chunk overlap at {start:#x}");
        }

        if let Some((_, next)) = self.chunks.range(start..).next()
            && next.address <= end
        {
            return malformed!("Chunk overlap at {end:#x}");
        }

        self.chunks.insert(start, chunk);
        Ok(())
    }

    /// Chunks in address order.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryChunk> {
        self.chunks.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn consumed(&self) -> u64 {
        self.chunks.values().map(|c| c.consumed).sum()
    }

    fn lookup(&self, addr: u64) -> Option<&MemoryChunk> {
        let (_, chunk) = self.chunks.range(..=addr).next_back()?;
        (addr <= chunk.end()).then_some(chunk)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct L1Layout {
    capacity: u64,
    binary: ChunkList,
    data: ChunkList,
}

impl L1Layout {
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            binary: ChunkList::default(),
            data: ChunkList::default(),
        }
    }

    pub fn insert_binary(&mut self, chunk: MemoryChunk) -> FusionResult {
        self.check_chunk(&chunk)?;
        self.binary.insert(chunk)
    }

    pub fn insert_data(&mut self, chunk: MemoryChunk) -> FusionResult {
        self.check_chunk(&chunk)?;
        self.data.insert(chunk)
    }

    fn check_chunk(&self, chunk: &MemoryChunk) -> FusionResult {
        if chunk.consumed > chunk.size {
            return malformed!(
                "Chunk at {:#x} consumes {} bytes of {}",
                chunk.address,
                chunk.consumed,
                chunk.size
            );
        }
        match chunk.address.checked_add(chunk.size) {
            Some(limit) if limit <= self.capacity => Ok(()),
            _ => malformed!(
                "Chunk at {:#x} of {} bytes exceeds L1 capacity {}",
                chunk.address,
                chunk.size,
                self.capacity
            ),
        }
    }

    /// Total consumed bytes must fit in the node's memory.
    pub fn check_capacity(&self) -> FusionResult {
        let consumed = self.consumed_bytes();
        if consumed > self.capacity {
            return malformed!(
                "Consumed size {consumed} exceeds L1 capacity {}",
                self.capacity
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[must_use]
    pub fn consumed_bytes(&self) -> u64 {
        self.binary.consumed() + self.data.consumed()
    }

    #[must_use]
    pub fn binary_buffers(&self) -> &ChunkList {
        &self.binary
    }

    #[must_use]
    pub fn data_buffers(&self) -> &ChunkList {
        &self.data
    }

    /// Find the chunk holding `addr`, binary buffers first.
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<&MemoryChunk> {
        self.binary.lookup(addr).or_else(|| self.data.lookup(addr))
    }
}
