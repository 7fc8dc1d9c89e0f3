// This file is part of chainscope.
// Copyright (C) 2025 Chainscope Authors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use indexer_common::domain::Network;
use serde::Serialize;

/// Deterministic height partitioning: partition `k` covers
/// `[k*P, (k+1)*P - 1]`. Partition boundaries never split a block; each
/// block belongs to exactly one partition. The partition containing the
/// chain head is additionally extended by the continuous worker.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    partition_size: u64,
}

impl Partitioner {
    pub fn new(network: Network) -> Self {
        Self {
            partition_size: network.partition_size(),
        }
    }

    #[cfg(test)]
    pub fn with_size(partition_size: u64) -> Self {
        Self { partition_size }
    }

    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    pub fn partition_of(&self, height: u64) -> u64 {
        height / self.partition_size
    }

    /// Inclusive height range of a partition.
    pub fn partition_range(&self, partition_id: u64) -> (u64, u64) {
        let start = partition_id * self.partition_size;
        (start, start + self.partition_size - 1)
    }
}

/// Counts over the indexed heights of one partition range.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeStats {
    pub block_count: u64,
    pub first_indexed_height: Option<u64>,
    pub last_indexed_height: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Completed,
    Incomplete,
    IncompleteWithGaps,
    NotStarted,
}

/// Progress report for one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionProgress {
    pub partition_id: u64,
    pub start_height: u64,
    pub end_height: u64,
    pub first_indexed_height: Option<u64>,
    pub last_indexed_height: Option<u64>,
    pub block_count: u64,
    pub expected_blocks: u64,
    pub has_gaps: bool,
    pub status: PartitionStatus,
    pub remaining_blocks: u64,
    pub remaining_ranges: Vec<String>,
}

impl PartitionProgress {
    /// Derive the progress report from the indexed-range stats. A partition
    /// is completed only once its full fixed range is indexed without gaps;
    /// the partition still co-owned by the chain head stays incomplete until
    /// the head passes its end.
    pub fn compute(
        partitioner: &Partitioner,
        partition_id: u64,
        chain_height: u64,
        stats: RangeStats,
    ) -> Self {
        let (start_height, end_height) = partitioner.partition_range(partition_id);
        let effective_end = end_height.min(chain_height);
        let expected_blocks = (effective_end + 1).saturating_sub(start_height);

        let has_gaps = match (stats.first_indexed_height, stats.last_indexed_height) {
            (Some(first), Some(last)) => stats.block_count < last - first + 1,
            _ => false,
        };

        let partition_blocks = end_height - start_height + 1;
        let status = if stats.block_count == 0 {
            PartitionStatus::NotStarted
        } else if has_gaps {
            PartitionStatus::IncompleteWithGaps
        } else if stats.last_indexed_height == Some(end_height)
            && stats.block_count == partition_blocks
        {
            PartitionStatus::Completed
        } else {
            PartitionStatus::Incomplete
        };

        let remaining_blocks = match stats.last_indexed_height {
            Some(last) => end_height.saturating_sub(last),
            None => partition_blocks,
        };

        let mut remaining_ranges = Vec::new();
        if has_gaps
            && let (Some(first), Some(last)) =
                (stats.first_indexed_height, stats.last_indexed_height)
        {
            let missing = (last - first + 1).saturating_sub(stats.block_count);
            remaining_ranges.push(format!(
                "approximately {missing} blocks missing in range {first}-{last}"
            ));
        }
        let resume_from = stats
            .last_indexed_height
            .map(|last| last + 1)
            .unwrap_or(start_height);
        if resume_from <= end_height {
            remaining_ranges.push(format!("{resume_from}-{end_height}"));
        }

        Self {
            partition_id,
            start_height,
            end_height,
            first_indexed_height: stats.first_indexed_height,
            last_indexed_height: stats.last_indexed_height,
            block_count: stats.block_count,
            expected_blocks,
            has_gaps,
            status,
            remaining_blocks,
            remaining_ranges,
        }
    }
}

/// Aggregate indexing status across all partitions up to the chain head.
#[derive(Debug, Clone, Serialize)]
pub struct IndexingStatus {
    pub network: String,
    pub latest_indexed_block: u64,
    pub current_chain_height: u64,
    pub gap: u64,
    pub all_historical_partitions_complete: bool,
    pub only_continuous_mode: bool,
    pub partitions: Vec<PartitionProgress>,
}

impl IndexingStatus {
    pub fn new(
        network: Network,
        partitioner: &Partitioner,
        latest_indexed_block: u64,
        current_chain_height: u64,
        partitions: Vec<PartitionProgress>,
    ) -> Self {
        let head_partition = partitioner.partition_of(current_chain_height);

        // The head partition is owned by the continuous worker and does not
        // count against historical completeness.
        let all_historical_partitions_complete = partitions
            .iter()
            .filter(|progress| progress.partition_id != head_partition)
            .all(|progress| progress.status == PartitionStatus::Completed);

        Self {
            network: network.as_str().to_owned(),
            latest_indexed_block,
            current_chain_height,
            gap: current_chain_height.saturating_sub(latest_indexed_block),
            all_historical_partitions_complete,
            only_continuous_mode: all_historical_partitions_complete,
            partitions,
        }
    }
}
