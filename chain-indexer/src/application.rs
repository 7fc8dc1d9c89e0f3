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

mod metrics;

use crate::{
    application::metrics::Metrics,
    domain::{IndexingStatus, PartitionProgress, Partitioner, storage::Storage},
};
use anyhow::Context;
use indexer_common::domain::{Network, node::Node};
use log::{info, warn};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Pause after a storage failure before retrying the batch.
const STORAGE_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub batch_size: u64,
    pub start_height: Option<u64>,
    pub end_height: Option<u64>,
    pub partition: Option<u64>,
    pub sleep_time: Duration,
}

/// Run one block-stream worker: either a backfill worker owning a single
/// partition, or the continuous worker extending the head partition. Blocks
/// are fetched from the node in batches and written to `block_stream` in
/// height order; the worker resumes from the last indexed height of its
/// range.
pub async fn run(
    config: Config,
    node: impl Node,
    storage: impl Storage,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let partitioner = Partitioner::new(config.network);
    let metrics = Metrics::new(config.network);

    let (mut current_height, end_height) = resolve_range(&config, &partitioner, &storage)
        .await
        .context("resolve worker height range")?;

    info!(
        network:% = config.network,
        current_height,
        end_height:?,
        partition:? = config.partition,
        batch_size = config.batch_size;
        "starting block stream worker"
    );

    while !cancel.is_cancelled() {
        let chain_height = match node.current_height().await {
            Ok(chain_height) => chain_height,
            Err(_) if cancel.is_cancelled() => break,
            Err(error) => {
                return Err(error).context("get current chain height");
            }
        };

        if let Some(end_height) = end_height
            && current_height > end_height
        {
            info!(end_height; "reached end height, stopping");
            break;
        }

        if current_height > chain_height {
            info!(
                current_height,
                chain_height;
                "waiting for new blocks"
            );
            if !sleep_cancellable(config.sleep_time, &cancel).await {
                break;
            }
            continue;
        }

        let batch_end = (current_height + config.batch_size - 1)
            .min(chain_height)
            .min(end_height.unwrap_or(u64::MAX));

        let started_at = Instant::now();
        let blocks = match node.blocks_by_range(current_height, batch_end).await {
            Ok(blocks) => blocks,
            Err(_) if cancel.is_cancelled() => break,
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("fetch blocks {current_height} to {batch_end} from node")
                });
            }
        };

        if blocks.is_empty() {
            warn!(
                current_height,
                batch_end;
                "no blocks returned for range"
            );
            if !sleep_cancellable(STORAGE_RETRY_DELAY, &cancel).await {
                break;
            }
            continue;
        }

        if cancel.is_cancelled() {
            break;
        }

        if let Err(error) = storage.save_blocks(&blocks).await {
            warn!(
                current_height,
                batch_end,
                error:%;
                "failed to save blocks, retrying batch"
            );
            metrics.storage_error();
            if !sleep_cancellable(STORAGE_RETRY_DELAY, &cancel).await {
                break;
            }
            continue;
        }

        metrics.batch_indexed(blocks.len(), batch_end, started_at.elapsed());
        info!(
            blocks_len = blocks.len(),
            current_height,
            batch_end,
            chain_height,
            partition = partitioner.partition_of(current_height);
            "indexed blocks"
        );

        current_height = batch_end + 1;
    }

    info!(network:% = config.network; "block stream worker stopped");
    Ok(())
}

/// Determine the worker's height range: an explicit range wins, a partition
/// worker resumes within its partition bounds, the continuous worker resumes
/// from the highest indexed block (starting at genesis on an empty store).
async fn resolve_range(
    config: &Config,
    partitioner: &Partitioner,
    storage: &impl Storage,
) -> anyhow::Result<(u64, Option<u64>)> {
    if let Some(partition) = config.partition {
        let (partition_start, partition_end) = partitioner.partition_range(partition);

        let mut start_height = config.start_height.unwrap_or(partition_start);
        if config.start_height.is_none() {
            let stats = storage
                .range_stats(partition_start, partition_end)
                .await
                .context("get partition range stats")?;

            if let Some(last_indexed) = stats.last_indexed_height {
                start_height = last_indexed + 1;
                info!(
                    partition,
                    last_indexed,
                    start_height;
                    "resuming partition"
                );
            } else {
                info!(partition, start_height; "starting partition from its beginning");
            }
        }

        let end_height = config.end_height.unwrap_or(partition_end);
        return Ok((start_height, Some(end_height)));
    }

    let start_height = match config.start_height {
        Some(start_height) => start_height,
        None => match storage.latest_height().await.context("get latest height")? {
            Some(latest) => latest + 1,
            // Fresh store: the continuous worker starts at genesis.
            None => 0,
        },
    };

    Ok((start_height, config.end_height))
}

/// Per-partition progress plus the aggregate report, computed from the store
/// and the chain head.
pub async fn indexing_status(
    network: Network,
    node: &impl Node,
    storage: &impl Storage,
) -> anyhow::Result<IndexingStatus> {
    let partitioner = Partitioner::new(network);

    let chain_height = node
        .current_height()
        .await
        .context("get current chain height")?;
    let latest_indexed = storage
        .latest_height()
        .await
        .context("get latest indexed height")?
        .unwrap_or(0);

    let head_partition = partitioner.partition_of(chain_height);
    let mut partitions = Vec::with_capacity(head_partition as usize + 1);
    for partition_id in 0..=head_partition {
        let (start_height, end_height) = partitioner.partition_range(partition_id);
        let stats = storage
            .range_stats(start_height, end_height)
            .await
            .with_context(|| format!("get range stats for partition {partition_id}"))?;

        partitions.push(PartitionProgress::compute(
            &partitioner,
            partition_id,
            chain_height,
            stats,
        ));
    }

    Ok(IndexingStatus::new(
        network,
        &partitioner,
        latest_indexed,
        chain_height,
        partitions,
    ))
}

/// Sleep in one-second increments, returning false when cancelled.
async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PartitionStatus, RangeStats};
    use indexer_common::domain::{CanonicalBlock, node::AccountBalances};
    use std::{
        collections::BTreeMap,
        convert::Infallible,
        sync::{Arc, Mutex},
    };

    #[derive(Clone)]
    struct MockNode {
        chain_height: u64,
    }

    impl Node for MockNode {
        type Error = Infallible;

        async fn current_height(&self) -> Result<u64, Self::Error> {
            Ok(self.chain_height)
        }

        async fn block_by_height(
            &self,
            height: u64,
        ) -> Result<Option<CanonicalBlock>, Self::Error> {
            Ok((height <= self.chain_height).then(|| block(height)))
        }

        async fn blocks_by_range(
            &self,
            start_height: u64,
            end_height: u64,
        ) -> Result<Vec<CanonicalBlock>, Self::Error> {
            Ok((start_height..=end_height.min(self.chain_height))
                .map(block)
                .collect())
        }

        async fn balances_at(
            &self,
            _block_hash: &str,
            _address: &str,
        ) -> Result<AccountBalances, Self::Error> {
            Ok(AccountBalances::default())
        }

        async fn token_decimals(&self) -> Result<u32, Self::Error> {
            Ok(18)
        }
    }

    #[derive(Clone, Default)]
    struct MockStorage {
        blocks: Arc<Mutex<BTreeMap<u64, CanonicalBlock>>>,
    }

    impl Storage for MockStorage {
        async fn save_blocks(
            &self,
            blocks: &[CanonicalBlock],
        ) -> Result<(), clickhouse::error::Error> {
            let mut stored = self.blocks.lock().unwrap();
            for block in blocks {
                stored.insert(block.height, block.clone());
            }
            Ok(())
        }

        async fn latest_height(&self) -> Result<Option<u64>, clickhouse::error::Error> {
            Ok(self.blocks.lock().unwrap().keys().next_back().copied())
        }

        async fn range_stats(
            &self,
            start_height: u64,
            end_height: u64,
        ) -> Result<RangeStats, clickhouse::error::Error> {
            let stored = self.blocks.lock().unwrap();
            let heights = stored
                .range(start_height..=end_height)
                .map(|(&height, _)| height)
                .collect::<Vec<_>>();

            Ok(RangeStats {
                block_count: heights.len() as u64,
                first_indexed_height: heights.first().copied(),
                last_indexed_height: heights.last().copied(),
            })
        }
    }

    fn block(height: u64) -> CanonicalBlock {
        CanonicalBlock {
            height,
            hash: format!("0x{height:064x}"),
            timestamp: height * 8_000,
            ..Default::default()
        }
    }

    fn config(network: Network) -> Config {
        Config {
            network,
            batch_size: 16,
            start_height: None,
            end_height: None,
            partition: None,
            sleep_time: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_bounded_backfill_indexes_genesis_onwards() {
        let node = MockNode { chain_height: 50 };
        let storage = MockStorage::default();
        let cancel = CancellationToken::new();

        let config = Config {
            end_height: Some(50),
            ..config(Network::Torus)
        };
        run(config, node, storage.clone(), cancel).await.unwrap();

        let stored = storage.blocks.lock().unwrap();
        assert_eq!(stored.len(), 51);
        assert!(stored.contains_key(&0));
        assert!(stored.contains_key(&50));
    }

    #[tokio::test]
    async fn test_partition_worker_resumes_after_last_indexed() {
        let node = MockNode { chain_height: 120 };
        let storage = MockStorage::default();
        for height in 0..=30 {
            storage
                .save_blocks(&[block(height)])
                .await
                .unwrap();
        }

        let partitioner = Partitioner::new(Network::Torus);
        let config = Config {
            partition: Some(0),
            ..config(Network::Torus)
        };
        let (start_height, end_height) = resolve_range(&config, &partitioner, &storage)
            .await
            .unwrap();

        assert_eq!(start_height, 31);
        assert_eq!(end_height, Some(323_999));
    }

    #[tokio::test]
    async fn test_indexing_status_fresh_partition() {
        let node = MockNode { chain_height: 50 };
        let storage = MockStorage::default();
        let cancel = CancellationToken::new();

        let config = Config {
            end_height: Some(50),
            ..config(Network::Torus)
        };
        run(config, node.clone(), storage.clone(), cancel)
            .await
            .unwrap();

        let status = indexing_status(Network::Torus, &node, &storage).await.unwrap();
        assert_eq!(status.current_chain_height, 50);
        assert_eq!(status.latest_indexed_block, 50);
        assert_eq!(status.gap, 0);
        assert_eq!(status.partitions.len(), 1);

        let partition = &status.partitions[0];
        assert_eq!(partition.block_count, 51);
        assert_eq!(partition.first_indexed_height, Some(0));
        assert_eq!(partition.last_indexed_height, Some(50));
        assert_eq!(partition.status, PartitionStatus::Incomplete);
        assert_eq!(partition.remaining_blocks, 323_949);
    }
}
