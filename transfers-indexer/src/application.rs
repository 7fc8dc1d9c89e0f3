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
    domain::{BlockContext, NetworkStrategy, extract_transfers, storage::Storage, strategy_for},
};
use anyhow::Context;
use indexer_common::domain::{BlockSource, Network};
use log::{info, warn};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Pause after a batch failure before retrying.
const ERROR_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub batch_size: u64,
    pub start_height: Option<u64>,
    pub sleep_time: Duration,
}

/// Run the balance-transfers consumer: pull canonical blocks from
/// `block_stream` in height order, extract transfer rows, and append them to
/// `balance_transfers`. Resumes from the highest recorded block height;
/// genesis is skipped.
pub async fn run(
    config: Config,
    block_source: impl BlockSource,
    storage: impl Storage,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let strategy = strategy_for(config.network);
    let metrics = Metrics::new(config.network);

    let mut current_height = match config.start_height {
        Some(start_height) => start_height.max(1),
        None => storage
            .latest_processed_height()
            .await
            .context("get latest processed height")?
            .map(|height| height + 1)
            .unwrap_or(1),
    };

    info!(
        network:% = config.network,
        current_height,
        batch_size = config.batch_size;
        "starting balance transfers consumer"
    );

    while !cancel.is_cancelled() {
        let latest_height = match block_source.latest_height().await {
            Ok(latest_height) => latest_height.unwrap_or(0),
            Err(error) => {
                warn!(error:%; "cannot read latest block_stream height, retrying");
                if !sleep_cancellable(ERROR_RETRY_DELAY, &cancel).await {
                    break;
                }
                continue;
            }
        };

        if current_height > latest_height {
            info!(
                current_height,
                latest_height;
                "waiting for new blocks"
            );
            if !sleep_cancellable(config.sleep_time, &cancel).await {
                break;
            }
            continue;
        }

        let batch_end = (current_height + config.batch_size - 1).min(latest_height);
        let started_at = Instant::now();

        let result = index_batch(
            &config,
            strategy,
            &block_source,
            &storage,
            current_height,
            batch_end,
        )
        .await;

        match result {
            Ok(transfers_len) => {
                metrics.batch_indexed(transfers_len, batch_end, started_at.elapsed());
                info!(
                    current_height,
                    batch_end,
                    transfers_len,
                    elapsed_ms = started_at.elapsed().as_millis() as u64;
                    "indexed balance transfers batch"
                );
                current_height = batch_end + 1;
            }

            Err(error) => {
                warn!(
                    current_height,
                    batch_end,
                    error:% = format!("{error:#}");
                    "batch failed, retrying"
                );
                metrics.batch_error();
                if !sleep_cancellable(ERROR_RETRY_DELAY, &cancel).await {
                    break;
                }
            }
        }
    }

    info!(network:% = config.network; "balance transfers consumer stopped");
    Ok(())
}

async fn index_batch(
    config: &Config,
    strategy: &'static dyn NetworkStrategy,
    block_source: &impl BlockSource,
    storage: &impl Storage,
    start_height: u64,
    end_height: u64,
) -> anyhow::Result<usize> {
    let blocks = block_source
        .blocks_by_range(start_height, end_height, false)
        .await
        .context("get blocks from block_stream")?;

    let mut transfers = Vec::new();
    for block in &blocks {
        // Genesis carries no extrinsics and is seeded elsewhere.
        if block.height == 0 {
            continue;
        }

        let context = BlockContext {
            network: config.network,
            block_height: block.height,
            block_timestamp: block.timestamp,
        };

        let extracted = extract_transfers(&context, block, strategy)
            .with_context(|| format!("extract transfers of block {}", block.height))?;
        transfers.extend(extracted);
    }

    storage
        .save_transfers(&transfers)
        .await
        .context("save balance transfers")?;

    Ok(transfers.len())
}

async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BalanceTransfer;
    use indexer_common::domain::{BlockRef, CanonicalBlock, EventRecord};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockBlockSource {
        blocks: Arc<Vec<CanonicalBlock>>,
    }

    impl BlockSource for MockBlockSource {
        async fn latest_height(&self) -> Result<Option<u64>, clickhouse::error::Error> {
            Ok(self.blocks.iter().map(|block| block.height).max())
        }

        async fn blocks_by_range(
            &self,
            start_height: u64,
            end_height: u64,
            _only_with_addresses: bool,
        ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error> {
            Ok(self
                .blocks
                .iter()
                .filter(|block| block.height >= start_height && block.height <= end_height)
                .cloned()
                .collect())
        }

        async fn blocks_by_timestamp_range(
            &self,
            start_timestamp: u64,
            end_timestamp: u64,
            _only_with_addresses: bool,
        ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error> {
            Ok(self
                .blocks
                .iter()
                .filter(|block| {
                    block.timestamp >= start_timestamp && block.timestamp < end_timestamp
                })
                .cloned()
                .collect())
        }

        async fn block_by_nearest_timestamp(
            &self,
            timestamp: u64,
        ) -> Result<Option<BlockRef>, clickhouse::error::Error> {
            Ok(self
                .blocks
                .iter()
                .filter(|block| block.timestamp <= timestamp)
                .max_by_key(|block| block.timestamp)
                .map(|block| BlockRef {
                    height: block.height,
                    hash: block.hash.clone(),
                    timestamp: block.timestamp,
                }))
        }

        async fn earliest_timestamp(&self) -> Result<Option<u64>, clickhouse::error::Error> {
            Ok(self
                .blocks
                .iter()
                .map(|block| block.timestamp)
                .filter(|&timestamp| timestamp > 0)
                .min())
        }
    }

    #[derive(Clone, Default)]
    struct MockStorage {
        transfers: Arc<Mutex<Vec<BalanceTransfer>>>,
    }

    impl Storage for MockStorage {
        async fn save_transfers(
            &self,
            transfers: &[BalanceTransfer],
        ) -> Result<(), clickhouse::error::Error> {
            self.transfers.lock().unwrap().extend_from_slice(transfers);
            Ok(())
        }

        async fn latest_processed_height(
            &self,
        ) -> Result<Option<u64>, clickhouse::error::Error> {
            Ok(self
                .transfers
                .lock()
                .unwrap()
                .iter()
                .map(|transfer| transfer.block_height)
                .max())
        }
    }

    fn transfer_block(height: u64) -> CanonicalBlock {
        CanonicalBlock {
            height,
            hash: format!("0x{height:x}"),
            timestamp: height * 8_000,
            events: vec![EventRecord {
                event_idx: format!("{height}-1"),
                extrinsic_id: format!("{height}-0"),
                module_id: "Balances".into(),
                event_id: "Transfer".into(),
                attributes: json!({
                    "from": "A",
                    "to": "B",
                    "amount": "1000000000000000000",
                }),
            }],
            addresses: vec!["A".into(), "B".into()],
            ..Default::default()
        }
    }

    async fn run_to_completion(source: MockBlockSource, storage: MockStorage) {
        let cancel = CancellationToken::new();
        let config = Config {
            network: Network::Torus,
            batch_size: 10,
            start_height: None,
            sleep_time: Duration::from_millis(10),
        };

        // Cancel once the consumer is caught up.
        let consumer = run(config, source, storage, cancel.clone());
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        };
        let (result, _) = tokio::join!(consumer, canceller);
        result.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_extracts_and_resumes() {
        let source = MockBlockSource {
            blocks: Arc::new(vec![transfer_block(1_000), transfer_block(1_001)]),
        };
        let storage = MockStorage::default();

        run_to_completion(source.clone(), storage.clone()).await;

        let transfers = storage.transfers.lock().unwrap().clone();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].extrinsic_id, "1000-0");
        assert_eq!(transfers[0].event_idx, "1000-1");
        assert_eq!(transfers[0].amount.to_string(), "1.000000000000000000");
        assert_eq!(transfers[0].version, 1_000);
        assert_eq!(
            storage.latest_processed_height().await.unwrap(),
            Some(1_001)
        );
    }

    #[tokio::test]
    async fn test_replay_produces_identical_rows() {
        let source = MockBlockSource {
            blocks: Arc::new(vec![transfer_block(1_000)]),
        };

        let first = MockStorage::default();
        run_to_completion(source.clone(), first.clone()).await;

        let second = MockStorage::default();
        run_to_completion(source, second.clone()).await;

        assert_eq!(
            *first.transfers.lock().unwrap(),
            *second.transfers.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn test_genesis_is_skipped() {
        let source = MockBlockSource {
            blocks: Arc::new(vec![transfer_block(0), transfer_block(1)]),
        };
        let storage = MockStorage::default();

        run_to_completion(source, storage.clone()).await;

        let transfers = storage.transfers.lock().unwrap().clone();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].block_height, 1);
    }
}
