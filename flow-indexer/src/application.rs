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
    domain::{NetworkGraphStrategy, block_mutations, graph::GraphStore, strategy_for},
};
use anyhow::Context;
use indexer_common::{
    domain::{AssetStore, BlockSource, CanonicalBlock, Network},
    retry,
};
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
    pub sleep_time: Duration,
}

/// Run the money-flow consumer, the single writer of the graph store. Blocks
/// are pulled from `block_stream`, folded into Address nodes and TO edges,
/// and every `4h / block_time` blocks the periodic analytics (community
/// detection, community PageRank, embedding refresh) run as retried,
/// cancellation-aware steps.
pub async fn run(
    config: Config,
    block_source: impl BlockSource,
    graph: impl GraphStore,
    assets: impl AssetStore,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let strategy = strategy_for(config.network);
    let metrics = Metrics::new(config.network);
    let analytics_interval = 4 * 3_600 / config.network.block_time_secs();

    graph.ensure_indexes().await.context("ensure graph indexes")?;
    assets
        .init_native_asset()
        .await
        .context("initialize native asset")?;

    let mut current_height = graph
        .last_block_height()
        .await
        .context("get last indexed graph height")?
        .map(|height| height + 1)
        .unwrap_or(1);

    info!(
        network:% = config.network,
        current_height,
        batch_size = config.batch_size,
        analytics_interval;
        "starting money flow consumer"
    );

    'outer: while !cancel.is_cancelled() {
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

        let blocks = match block_source
            .blocks_by_range(current_height, batch_end, true)
            .await
        {
            Ok(blocks) => blocks,
            Err(error) => {
                warn!(
                    current_height,
                    batch_end,
                    error:%;
                    "cannot fetch blocks, retrying"
                );
                if !sleep_cancellable(ERROR_RETRY_DELAY, &cancel).await {
                    break;
                }
                continue;
            }
        };

        if blocks.is_empty() {
            // No address interactions in this range; only the marker moves.
            if let Err(retry::Cancelled(_)) =
                retry::forever("update_global_state", &cancel, retry::LOG_EVERY_N, || {
                    graph.update_global_state(batch_end)
                })
                .await
            {
                break;
            }
            current_height = batch_end + 1;
            continue;
        }

        for block in &blocks {
            if cancel.is_cancelled() {
                break 'outer;
            }

            match process_block(&config, strategy, block, &graph, &assets, &cancel, &metrics).await
            {
                Ok(()) => {}
                Err(ProcessBlockError::Cancelled) => break 'outer,
                Err(ProcessBlockError::Other(error)) => {
                    return Err(error)
                        .with_context(|| format!("process block {}", block.height));
                }
            }

            if block.height % analytics_interval == 0 {
                match run_analytics(&graph, &cancel, &metrics).await {
                    Ok(()) => {}
                    Err(retry::Cancelled(_)) => break 'outer,
                }
            }
        }

        current_height = batch_end + 1;
    }

    info!(network:% = config.network; "money flow consumer stopped");
    Ok(())
}

enum ProcessBlockError {
    Cancelled,
    Other(anyhow::Error),
}

async fn process_block(
    config: &Config,
    strategy: &'static dyn NetworkGraphStrategy,
    block: &CanonicalBlock,
    graph: &impl GraphStore,
    assets: &impl AssetStore,
    cancel: &CancellationToken,
    metrics: &Metrics,
) -> Result<(), ProcessBlockError> {
    // Genesis carries no events; all projections but the block stream skip
    // it.
    if block.height == 0 {
        return Ok(());
    }

    let started_at = Instant::now();
    let (mutations, new_assets) = block_mutations(config.network, block, strategy);

    // Referential integrity: every non-native asset must exist in the
    // dictionary before the graph is touched; a failure is fatal.
    for asset in new_assets {
        assets
            .ensure_asset_exists(asset.clone())
            .await
            .map_err(|error| {
                ProcessBlockError::Other(
                    anyhow::Error::new(error)
                        .context(format!("ensure asset {} exists", asset.contract)),
                )
            })?;
    }

    let mutations_len = mutations.len();
    let indexed = retry::forever("index_block", cancel, retry::LOG_EVERY_N, || {
        graph.index_block(block.height, block.timestamp, &mutations)
    })
    .await
    .map_err(|_| ProcessBlockError::Cancelled)?;

    if indexed {
        metrics.block_indexed(mutations_len, block.height, started_at.elapsed());
    } else {
        metrics.block_skipped();
    }

    Ok(())
}

/// The periodic graph analytics, in order, each retried independently:
/// community detection, community-scoped PageRank, calculated-property
/// refresh, embedding refresh.
async fn run_analytics(
    graph: &impl GraphStore,
    cancel: &CancellationToken,
    metrics: &Metrics,
) -> Result<(), retry::Cancelled> {
    let started_at = Instant::now();
    info!("running graph analytics");

    retry::forever("community_detection", cancel, retry::LOG_EVERY_N, || {
        graph.community_detection()
    })
    .await?;

    retry::forever("community_page_rank", cancel, retry::LOG_EVERY_N, || {
        graph.community_page_rank(cancel)
    })
    .await?;

    retry::forever(
        "update_calculated_properties",
        cancel,
        retry::LOG_EVERY_N,
        || graph.update_calculated_properties(),
    )
    .await?;

    retry::forever("update_embeddings", cancel, retry::LOG_EVERY_N, || {
        graph.update_embeddings()
    })
    .await?;

    metrics.analytics_run(started_at.elapsed());
    info!(
        elapsed_ms = started_at.elapsed().as_millis() as u64;
        "graph analytics completed"
    );

    Ok(())
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
    use crate::domain::GraphMutation;
    use indexer_common::domain::{
        Asset, AssetVerification, BlockRef, EventRecord, NewAsset,
    };
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
            only_with_addresses: bool,
        ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error> {
            Ok(self
                .blocks
                .iter()
                .filter(|block| {
                    block.height >= start_height
                        && block.height <= end_height
                        && (!only_with_addresses || !block.addresses.is_empty())
                })
                .cloned()
                .collect())
        }

        async fn blocks_by_timestamp_range(
            &self,
            _start_timestamp: u64,
            _end_timestamp: u64,
            _only_with_addresses: bool,
        ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error> {
            Ok(Vec::new())
        }

        async fn block_by_nearest_timestamp(
            &self,
            _timestamp: u64,
        ) -> Result<Option<BlockRef>, clickhouse::error::Error> {
            Ok(None)
        }

        async fn earliest_timestamp(&self) -> Result<Option<u64>, clickhouse::error::Error> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct GraphState {
        last_height: Option<u64>,
        mutations: Vec<(u64, GraphMutation)>,
        analytics_runs: usize,
        page_rank_runs: usize,
        embedding_runs: usize,
    }

    #[derive(Clone, Default)]
    struct MockGraph {
        state: Arc<Mutex<GraphState>>,
    }

    impl GraphStore for MockGraph {
        async fn ensure_indexes(&self) -> Result<(), neo4rs::Error> {
            Ok(())
        }

        async fn last_block_height(&self) -> Result<Option<u64>, neo4rs::Error> {
            Ok(self.state.lock().unwrap().last_height)
        }

        async fn update_global_state(&self, block_height: u64) -> Result<(), neo4rs::Error> {
            self.state.lock().unwrap().last_height = Some(block_height);
            Ok(())
        }

        async fn index_block(
            &self,
            block_height: u64,
            _timestamp: u64,
            mutations: &[GraphMutation],
        ) -> Result<bool, neo4rs::Error> {
            let mut state = self.state.lock().unwrap();
            if state.last_height.is_some_and(|last| block_height <= last) {
                return Ok(false);
            }

            state.last_height = Some(block_height);
            state
                .mutations
                .extend(mutations.iter().map(|mutation| (block_height, mutation.clone())));
            Ok(true)
        }

        async fn community_detection(&self) -> Result<(), neo4rs::Error> {
            self.state.lock().unwrap().analytics_runs += 1;
            Ok(())
        }

        async fn community_page_rank(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<(), neo4rs::Error> {
            self.state.lock().unwrap().page_rank_runs += 1;
            Ok(())
        }

        async fn update_calculated_properties(&self) -> Result<(), neo4rs::Error> {
            Ok(())
        }

        async fn update_embeddings(&self) -> Result<(), neo4rs::Error> {
            self.state.lock().unwrap().embedding_runs += 1;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MockAssets {
        ensured: Arc<Mutex<Vec<String>>>,
    }

    impl AssetStore for MockAssets {
        async fn init_native_asset(&self) -> Result<(), clickhouse::error::Error> {
            Ok(())
        }

        async fn ensure_asset_exists(
            &self,
            asset: NewAsset,
        ) -> Result<bool, clickhouse::error::Error> {
            self.ensured.lock().unwrap().push(asset.contract);
            Ok(true)
        }

        async fn asset_info(
            &self,
            _contract: &str,
        ) -> Result<Option<Asset>, clickhouse::error::Error> {
            Ok(None)
        }

        async fn update_verification(
            &self,
            _contract: &str,
            _verification: AssetVerification,
            _updated_by: &str,
            _notes: Option<&str>,
        ) -> Result<(), clickhouse::error::Error> {
            Ok(())
        }

        fn clear_cache(&self) {}
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

    fn token_block(height: u64) -> CanonicalBlock {
        CanonicalBlock {
            height,
            hash: format!("0x{height:x}"),
            timestamp: height * 8_000,
            events: vec![EventRecord {
                event_idx: format!("{height}-1"),
                extrinsic_id: format!("{height}-0"),
                module_id: "Assets".into(),
                event_id: "Transferred".into(),
                attributes: json!({
                    "asset_id": 7,
                    "from": "A",
                    "to": "B",
                    "amount": "1000000000000000000",
                }),
            }],
            addresses: vec!["A".into(), "B".into()],
            ..Default::default()
        }
    }

    async fn run_to_completion(
        source: MockBlockSource,
        graph: MockGraph,
        assets: MockAssets,
        batch_size: u64,
    ) {
        let cancel = CancellationToken::new();
        let config = Config {
            network: Network::Torus,
            batch_size,
            sleep_time: Duration::from_millis(10),
        };

        let consumer = run(config, source, graph, assets, cancel.clone());
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        };
        let (result, _) = tokio::join!(consumer, canceller);
        result.unwrap();
    }

    #[tokio::test]
    async fn test_transfers_update_graph_and_marker() {
        let source = MockBlockSource {
            blocks: Arc::new(vec![transfer_block(10), transfer_block(11)]),
        };
        let graph = MockGraph::default();
        let assets = MockAssets::default();

        run_to_completion(source, graph.clone(), assets, 16).await;

        let state = graph.state.lock().unwrap();
        assert_eq!(state.mutations.len(), 2);
        assert_eq!(state.last_height, Some(11));
        match &state.mutations[0].1 {
            GraphMutation::UpsertTransfer { edge_id, amount, .. } => {
                assert_eq!(edge_id, "A-B-TOR-native");
                assert_eq!(*amount, 1.0);
            }
            other => panic!("unexpected mutation {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blocks_at_or_below_marker_are_skipped() {
        let source = MockBlockSource {
            blocks: Arc::new(vec![transfer_block(450), transfer_block(501)]),
        };
        let graph = MockGraph::default();
        graph.state.lock().unwrap().last_height = Some(500);
        let assets = MockAssets::default();

        run_to_completion(source, graph.clone(), assets, 16).await;

        let state = graph.state.lock().unwrap();
        // Only block 501 was applied; 450 never reached the graph.
        assert_eq!(state.mutations.len(), 1);
        assert_eq!(state.mutations[0].0, 501);
        assert_eq!(state.last_height, Some(501));
    }

    #[tokio::test]
    async fn test_analytics_cadence_every_1800_blocks_on_torus() {
        let source = MockBlockSource {
            blocks: Arc::new(vec![
                transfer_block(1_799),
                transfer_block(1_800),
                transfer_block(1_801),
            ]),
        };
        let graph = MockGraph::default();
        let assets = MockAssets::default();

        run_to_completion(source, graph.clone(), assets, 1_000).await;

        let state = graph.state.lock().unwrap();
        assert_eq!(state.analytics_runs, 1);
        assert_eq!(state.page_rank_runs, 1);
        assert_eq!(state.embedding_runs, 1);
        assert_eq!(state.last_height, Some(1_801));
    }

    #[tokio::test]
    async fn test_token_assets_are_ensured_before_graph_writes() {
        let source = MockBlockSource {
            blocks: Arc::new(vec![token_block(20)]),
        };
        let graph = MockGraph::default();
        let assets = MockAssets::default();

        run_to_completion(source, graph.clone(), assets.clone(), 16).await;

        assert_eq!(*assets.ensured.lock().unwrap(), vec!["7".to_owned()]);
        let state = graph.state.lock().unwrap();
        assert_eq!(state.mutations.len(), 1);
    }
}
