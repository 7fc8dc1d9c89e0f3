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

use crate::domain::{self, BalanceSnapshot};
use clickhouse::{Client, Row};
use fastrace::trace;
use indoc::indoc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const SCHEMA: &str = indoc! {"
    CREATE TABLE IF NOT EXISTS balance_series (
        period_start_timestamp UInt64,
        period_end_timestamp UInt64,
        block_height UInt64,
        address String,
        asset String,
        free_balance String,
        reserved_balance String,
        staked_balance String,
        total_balance String,
        free_balance_change Nullable(String),
        reserved_balance_change Nullable(String),
        staked_balance_change Nullable(String),
        total_balance_change Nullable(String),
        total_percent_change Nullable(Float64),
        _version UInt64
    )
    ENGINE = ReplacingMergeTree(_version)
    ORDER BY (period_start_timestamp, address, asset)
"};

/// [domain::storage::Storage] implementation on the analytics store.
/// Balances are stored as decimal strings; `_version` is a wall-clock
/// integer so a recomputed period wins over earlier runs.
#[derive(Clone)]
pub struct Storage {
    client: Client,
}

impl Storage {
    pub async fn new(client: Client) -> Result<Self, clickhouse::error::Error> {
        client.query(SCHEMA).execute().await?;
        Ok(Self { client })
    }
}

impl domain::storage::Storage for Storage {
    #[trace]
    async fn save_snapshots(
        &self,
        snapshots: &[BalanceSnapshot],
    ) -> Result<(), clickhouse::error::Error> {
        if snapshots.is_empty() {
            return Ok(());
        }

        let mut insert = self.client.insert("balance_series")?;
        for snapshot in snapshots {
            insert.write(&BalanceSeriesRow::from(snapshot)).await?;
        }
        insert.end().await
    }

    #[trace]
    async fn latest_period_end(&self) -> Result<Option<u64>, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT max(period_end_timestamp) AS period_end, count() AS snapshots
            FROM balance_series
            WHERE period_end_timestamp > 0
        "};

        let row = self
            .client
            .query(query)
            .fetch_one::<MaxPeriodRow>()
            .await?;
        Ok((row.snapshots > 0).then_some(row.period_end))
    }

    #[trace]
    async fn previous_snapshot(
        &self,
        address: &str,
        asset: &str,
        before_period_start: u64,
    ) -> Result<Option<BalanceSnapshot>, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT
                period_start_timestamp,
                period_end_timestamp,
                block_height,
                address,
                asset,
                free_balance,
                reserved_balance,
                staked_balance,
                total_balance,
                free_balance_change,
                reserved_balance_change,
                staked_balance_change,
                total_balance_change,
                total_percent_change,
                _version
            FROM balance_series FINAL
            WHERE address = ? AND asset = ? AND period_start_timestamp < ?
            ORDER BY period_start_timestamp DESC
            LIMIT 1
        "};

        let row = self
            .client
            .query(query)
            .bind(address)
            .bind(asset)
            .bind(before_period_start)
            .fetch_optional::<BalanceSeriesRow>()
            .await?;

        Ok(row.map(BalanceSnapshot::from))
    }

    #[trace]
    async fn has_genesis_snapshots(&self, asset: &str) -> Result<bool, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT count() AS snapshots
            FROM balance_series FINAL
            WHERE block_height = 0 AND asset = ?
        "};

        let row = self
            .client
            .query(query)
            .bind(asset)
            .fetch_one::<CountRow>()
            .await?;
        Ok(row.snapshots > 0)
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct MaxPeriodRow {
    period_end: u64,
    snapshots: u64,
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct CountRow {
    snapshots: u64,
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct BalanceSeriesRow {
    period_start_timestamp: u64,
    period_end_timestamp: u64,
    block_height: u64,
    address: String,
    asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    free_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    reserved_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    staked_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    total_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    free_balance_change: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    reserved_balance_change: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    staked_balance_change: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    total_balance_change: Option<Decimal>,
    total_percent_change: Option<f64>,
    _version: u64,
}

impl From<&BalanceSnapshot> for BalanceSeriesRow {
    fn from(snapshot: &BalanceSnapshot) -> Self {
        Self {
            period_start_timestamp: snapshot.period_start,
            period_end_timestamp: snapshot.period_end,
            block_height: snapshot.block_height,
            address: snapshot.address.clone(),
            asset: snapshot.asset.clone(),
            free_balance: snapshot.free,
            reserved_balance: snapshot.reserved,
            staked_balance: snapshot.staked,
            total_balance: snapshot.total,
            free_balance_change: snapshot.free_change,
            reserved_balance_change: snapshot.reserved_change,
            staked_balance_change: snapshot.staked_change,
            total_balance_change: snapshot.total_change,
            total_percent_change: snapshot.total_percent_change,
            _version: snapshot.version,
        }
    }
}

impl From<BalanceSeriesRow> for BalanceSnapshot {
    fn from(row: BalanceSeriesRow) -> Self {
        Self {
            period_start: row.period_start_timestamp,
            period_end: row.period_end_timestamp,
            block_height: row.block_height,
            address: row.address,
            asset: row.asset,
            free: row.free_balance,
            reserved: row.reserved_balance,
            staked: row.staked_balance,
            total: row.total_balance,
            free_change: row.free_balance_change,
            reserved_change: row.reserved_balance_change,
            staked_change: row.staked_balance_change,
            total_change: row.total_balance_change,
            total_percent_change: row.total_percent_change,
            version: row._version,
        }
    }
}
