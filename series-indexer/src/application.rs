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
    domain::{BalanceSnapshot, GenesisBalanceSource, Period, PeriodGrid, storage::Storage},
};
use anyhow::Context;
use indexer_common::domain::{BlockSource, Network, node::Node};
use log::{info, warn};
use std::{
    collections::BTreeSet,
    path::PathBuf,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Pause after a period failure before retrying.
const ERROR_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Wake-up interval while waiting for a period to end.
const WAIT_INCREMENT: Duration = Duration::from_secs(10);

/// Genesis snapshots are inserted in chunks of this size.
const GENESIS_CHUNK_SIZE: usize = 1_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub period_hours: u64,
    pub sleep_time: Duration,
    pub genesis_file: Option<PathBuf>,
}

/// Run the balance-series consumer: for every completed period of the
/// epoch-aligned grid, snapshot the chain balances of all addresses touched
/// within the period at the period-end block, with deltas against the
/// preceding snapshots. Torus networks are seeded from the genesis
/// allocation on first run.
pub async fn run(
    config: Config,
    block_source: impl BlockSource,
    node: impl Node,
    storage: impl Storage,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let grid = PeriodGrid::new(config.period_hours);
    let metrics = Metrics::new(config.network);

    let genesis = GenesisBalanceSource::for_network(config.network, config.genesis_file.clone());
    seed_genesis(&config, &genesis, &storage, &cancel)
        .await
        .context("seed genesis balances")?;

    let Some(mut period) = resolve_first_period(&grid, &block_source, &storage, &config, &cancel)
        .await
        .context("resolve first period")?
    else {
        info!("cancelled before the first period was available");
        return Ok(());
    };

    info!(
        network:% = config.network,
        period_start = period.start,
        period_end = period.end,
        period_hours = config.period_hours;
        "starting balance series consumer"
    );

    while !cancel.is_cancelled() {
        let now = now_millis();

        if period.end > now {
            let remaining = Duration::from_millis(period.end - now);
            info!(
                period_start = period.start,
                period_end = period.end,
                remaining_secs = remaining.as_secs();
                "waiting for period to end"
            );
            if !sleep_cancellable(remaining.min(WAIT_INCREMENT), &cancel).await {
                break;
            }
            continue;
        }

        let started_at = Instant::now();
        match process_period(&config, period, &block_source, &node, &storage, &cancel).await {
            Ok(Some(snapshots_len)) => {
                metrics.period_processed(snapshots_len, period.end, started_at.elapsed());
                info!(
                    period_start = period.start,
                    period_end = period.end,
                    snapshots_len;
                    "processed period"
                );
                period = grid.next(period);
            }

            // Interrupted by cancellation; do not advance.
            Ok(None) => break,

            Err(error) => {
                warn!(
                    period_start = period.start,
                    period_end = period.end,
                    error:% = format!("{error:#}");
                    "period failed, retrying"
                );
                metrics.period_error();
                if !sleep_cancellable(ERROR_RETRY_DELAY, &cancel).await {
                    break;
                }
            }
        }
    }

    info!(network:% = config.network; "balance series consumer stopped");
    Ok(())
}

/// The first period to process: after the latest processed period, or the
/// period containing the earliest indexed block. Waits for the block stream
/// to hold at least one block; `None` when cancelled while waiting.
async fn resolve_first_period(
    grid: &PeriodGrid,
    block_source: &impl BlockSource,
    storage: &impl Storage,
    config: &Config,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<Period>> {
    if let Some(period_end) = storage
        .latest_period_end()
        .await
        .context("get latest processed period")?
    {
        return Ok(Some(grid.period_starting_at(period_end)));
    }

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        if let Some(timestamp) = block_source
            .earliest_timestamp()
            .await
            .context("get earliest block timestamp")?
        {
            return Ok(Some(grid.period_containing(timestamp)));
        }

        info!("block stream is empty, waiting for first block");
        if !sleep_cancellable(config.sleep_time, cancel).await {
            return Ok(None);
        }
    }
}

/// Process one completed period. Returns the number of written snapshots,
/// or `None` when interrupted by cancellation mid-period.
pub(crate) async fn process_period(
    config: &Config,
    period: Period,
    block_source: &impl BlockSource,
    node: &impl Node,
    storage: &impl Storage,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<usize>> {
    let end_block = block_source
        .block_by_nearest_timestamp(period.end)
        .await
        .context("find period end block")?
        .with_context(|| format!("no block at or before period end {}", period.end))?;

    let period_blocks = block_source
        .blocks_by_timestamp_range(period.start, period.end, true)
        .await
        .context("get period blocks")?;

    if period_blocks.is_empty() {
        info!(
            period_start = period.start,
            period_end = period.end;
            "no blocks with address interactions in period"
        );
        return Ok(Some(0));
    }

    let affected_addresses = period_blocks
        .iter()
        .flat_map(|block| block.addresses.iter())
        .filter(|address| !address.is_empty())
        .cloned()
        .collect::<BTreeSet<_>>();

    info!(
        period_start = period.start,
        period_end = period.end,
        end_block_height = end_block.height,
        blocks_len = period_blocks.len(),
        addresses_len = affected_addresses.len();
        "processing period"
    );

    let asset = config.network.native_symbol();
    let decimals = config.network.native_decimals();
    let version = now_millis();

    let mut snapshots = Vec::with_capacity(affected_addresses.len());
    for address in affected_addresses {
        if cancel.is_cancelled() {
            info!(address; "cancellation requested during balance queries");
            return Ok(None);
        }

        let balances = node
            .balances_at(&end_block.hash, &address)
            .await
            .map_err(|error| anyhow::anyhow!(error))
            .with_context(|| format!("query balances of {address}"))?;

        let snapshot = BalanceSnapshot::from_raw(
            period,
            end_block.height,
            &address,
            asset,
            decimals,
            balances.free,
            balances.reserved,
            balances.staked,
            balances.total(),
            version,
        )
        .with_context(|| format!("build snapshot for {address}"))?;

        let previous = storage
            .previous_snapshot(&address, asset, period.start)
            .await
            .with_context(|| format!("get previous snapshot of {address}"))?;

        snapshots.push(snapshot.with_deltas(previous.as_ref()));
    }

    let snapshots_len = snapshots.len();
    storage
        .save_snapshots(&snapshots)
        .await
        .context("save snapshots")?;

    Ok(Some(snapshots_len))
}

/// One-shot genesis seeding: when the network ships a genesis allocation and
/// no height-0 snapshots exist yet, insert free-only snapshots at height 0.
async fn seed_genesis(
    config: &Config,
    genesis: &GenesisBalanceSource,
    storage: &impl Storage,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    if !genesis.has_genesis_balances() {
        return Ok(());
    }

    let asset = config.network.native_symbol();
    if storage
        .has_genesis_snapshots(asset)
        .await
        .context("check for existing genesis snapshots")?
    {
        info!(asset; "genesis snapshots already exist, skipping seeding");
        return Ok(());
    }

    let balances = genesis.load().context("load genesis balances")?;
    let decimals = config.network.native_decimals();
    let version = now_millis();
    let genesis_period = Period { start: 0, end: 0 };

    let mut snapshots = Vec::with_capacity(balances.len());
    for (address, amount) in balances {
        let snapshot = BalanceSnapshot::from_raw(
            genesis_period,
            0,
            &address,
            asset,
            decimals,
            amount,
            0,
            0,
            amount,
            version,
        )
        .with_context(|| format!("build genesis snapshot for {address}"))?;
        snapshots.push(snapshot);
    }

    let snapshots_len = snapshots.len();
    for chunk in snapshots.chunks(GENESIS_CHUNK_SIZE) {
        if cancel.is_cancelled() {
            anyhow::bail!("cancelled during genesis seeding");
        }
        storage
            .save_snapshots(chunk)
            .await
            .context("save genesis snapshots")?;
    }

    info!(snapshots_len, asset; "genesis balances seeded");
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
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
    use indexer_common::domain::{
        BlockRef, CanonicalBlock,
        node::{AccountBalances, Node},
    };
    use rust_decimal::Decimal;
    use std::{
        collections::HashMap,
        convert::Infallible,
        io::Write,
        sync::{Arc, Mutex},
    };

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
            only_with_addresses: bool,
        ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error> {
            Ok(self
                .blocks
                .iter()
                .filter(|block| {
                    block.timestamp >= start_timestamp
                        && block.timestamp < end_timestamp
                        && (!only_with_addresses || !block.addresses.is_empty())
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
    struct MockNode {
        balances: Arc<HashMap<(String, String), AccountBalances>>,
    }

    impl Node for MockNode {
        type Error = Infallible;

        async fn current_height(&self) -> Result<u64, Self::Error> {
            Ok(0)
        }

        async fn block_by_height(
            &self,
            _height: u64,
        ) -> Result<Option<CanonicalBlock>, Self::Error> {
            Ok(None)
        }

        async fn blocks_by_range(
            &self,
            _start_height: u64,
            _end_height: u64,
        ) -> Result<Vec<CanonicalBlock>, Self::Error> {
            Ok(Vec::new())
        }

        async fn balances_at(
            &self,
            block_hash: &str,
            address: &str,
        ) -> Result<AccountBalances, Self::Error> {
            Ok(self
                .balances
                .get(&(block_hash.to_owned(), address.to_owned()))
                .copied()
                .unwrap_or_default())
        }

        async fn token_decimals(&self) -> Result<u32, Self::Error> {
            Ok(18)
        }
    }

    #[derive(Clone, Default)]
    struct MockStorage {
        snapshots: Arc<Mutex<Vec<BalanceSnapshot>>>,
    }

    impl Storage for MockStorage {
        async fn save_snapshots(
            &self,
            snapshots: &[BalanceSnapshot],
        ) -> Result<(), clickhouse::error::Error> {
            self.snapshots.lock().unwrap().extend_from_slice(snapshots);
            Ok(())
        }

        async fn latest_period_end(&self) -> Result<Option<u64>, clickhouse::error::Error> {
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .map(|snapshot| snapshot.period_end)
                .filter(|&period_end| period_end > 0)
                .max())
        }

        async fn previous_snapshot(
            &self,
            address: &str,
            asset: &str,
            before_period_start: u64,
        ) -> Result<Option<BalanceSnapshot>, clickhouse::error::Error> {
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .filter(|snapshot| {
                    snapshot.address == address
                        && snapshot.asset == asset
                        && snapshot.period_start < before_period_start
                })
                .max_by_key(|snapshot| snapshot.period_start)
                .cloned())
        }

        async fn has_genesis_snapshots(
            &self,
            asset: &str,
        ) -> Result<bool, clickhouse::error::Error> {
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .any(|snapshot| snapshot.block_height == 0 && snapshot.asset == asset))
        }
    }

    fn block(height: u64, timestamp: u64, addresses: Vec<String>) -> CanonicalBlock {
        CanonicalBlock {
            height,
            hash: format!("0x{height:x}"),
            timestamp,
            addresses,
            ..Default::default()
        }
    }

    fn config() -> Config {
        Config {
            network: Network::Torus,
            period_hours: 4,
            sleep_time: Duration::from_millis(10),
            genesis_file: None,
        }
    }

    fn tor(units: u128) -> u128 {
        units * 1_000_000_000_000_000_000
    }

    #[tokio::test]
    async fn test_delta_correctness_across_periods() {
        let grid = PeriodGrid::new(4);
        let period_one = grid.period_containing(1_700_000_000_000);
        let period_two = grid.next(period_one);

        let blocks = vec![
            block(100, period_one.start + 1_000, vec!["A".into()]),
            block(200, period_two.start + 1_000, vec!["A".into()]),
        ];
        let balances = HashMap::from([
            (
                ("0x64".to_owned(), "A".to_owned()),
                AccountBalances { free: tor(5), reserved: 0, staked: 0 },
            ),
            (
                ("0xc8".to_owned(), "A".to_owned()),
                AccountBalances { free: tor(3), reserved: 0, staked: 0 },
            ),
        ]);

        let source = MockBlockSource { blocks: Arc::new(blocks) };
        let node = MockNode { balances: Arc::new(balances) };
        let storage = MockStorage::default();
        let cancel = CancellationToken::new();

        let written = process_period(&config(), period_one, &source, &node, &storage, &cancel)
            .await
            .unwrap();
        assert_eq!(written, Some(1));

        let written = process_period(&config(), period_two, &source, &node, &storage, &cancel)
            .await
            .unwrap();
        assert_eq!(written, Some(1));

        let snapshots = storage.snapshots.lock().unwrap().clone();
        assert_eq!(snapshots.len(), 2);

        let first = &snapshots[0];
        assert_eq!(first.total, Decimal::from(5));
        assert_eq!(first.total_change, None);

        let second = &snapshots[1];
        assert_eq!(second.total, Decimal::from(3));
        assert_eq!(second.total_change, Some(Decimal::from(-2)));
        assert_eq!(second.total_percent_change, Some(-40.0));
        assert_eq!(second.block_height, 200);
    }

    #[tokio::test]
    async fn test_empty_period_advances_without_rows() {
        let grid = PeriodGrid::new(4);
        let period_one = grid.period_containing(1_700_000_000_000);
        let period_two = grid.next(period_one);

        let source = MockBlockSource {
            blocks: Arc::new(vec![block(100, period_one.start + 1_000, vec!["A".into()])]),
        };
        let node = MockNode::default();
        let storage = MockStorage::default();
        let cancel = CancellationToken::new();

        let written = process_period(&config(), period_two, &source, &node, &storage, &cancel)
            .await
            .unwrap();
        assert_eq!(written, Some(0));
        assert!(storage.snapshots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_genesis_seeding_is_gated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[["G1", "2000000000000000000"], ["G2", "3"]]"#).unwrap();

        let config = Config {
            genesis_file: Some(file.path().to_owned()),
            ..config()
        };
        let genesis =
            GenesisBalanceSource::for_network(config.network, config.genesis_file.clone());
        let storage = MockStorage::default();
        let cancel = CancellationToken::new();

        seed_genesis(&config, &genesis, &storage, &cancel).await.unwrap();
        assert_eq!(storage.snapshots.lock().unwrap().len(), 2);

        let snapshots = storage.snapshots.lock().unwrap().clone();
        assert_eq!(snapshots[0].block_height, 0);
        assert_eq!(snapshots[0].free, Decimal::from(2));
        assert_eq!(snapshots[0].reserved, Decimal::ZERO);

        // A second run must not duplicate the seed rows.
        seed_genesis(&config, &genesis, &storage, &cancel).await.unwrap();
        assert_eq!(storage.snapshots.lock().unwrap().len(), 2);
    }
}
