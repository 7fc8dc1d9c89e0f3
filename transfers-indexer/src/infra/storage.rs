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

use crate::domain::{self, BalanceTransfer};
use clickhouse::{Client, Row};
use fastrace::trace;
use indoc::indoc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// [domain::storage::Storage] implementation on the analytics store.
/// Amounts and fees are stored as decimal strings; `_version` is the block
/// height so replays merge-collapse to the same logical rows.
#[derive(Clone)]
pub struct Storage {
    client: Client,
}

impl Storage {
    /// Create the storage and make sure the `balance_transfers` table
    /// exists, partitioned by the network's partition size.
    pub async fn new(
        client: Client,
        partition_size: u64,
    ) -> Result<Self, clickhouse::error::Error> {
        let schema = format!(
            indoc! {"
                CREATE TABLE IF NOT EXISTS balance_transfers (
                    extrinsic_id String,
                    event_idx String,
                    block_height UInt64,
                    block_timestamp UInt64,
                    from_address String,
                    to_address String,
                    asset String,
                    amount String,
                    fee String,
                    _version UInt64
                )
                ENGINE = ReplacingMergeTree(_version)
                PARTITION BY intDiv(block_height, {})
                ORDER BY (extrinsic_id, event_idx)
            "},
            partition_size
        );

        client.query(&schema).execute().await?;

        Ok(Self { client })
    }
}

impl domain::storage::Storage for Storage {
    #[trace]
    async fn save_transfers(
        &self,
        transfers: &[BalanceTransfer],
    ) -> Result<(), clickhouse::error::Error> {
        if transfers.is_empty() {
            return Ok(());
        }

        let mut insert = self.client.insert("balance_transfers")?;
        for transfer in transfers {
            insert.write(&BalanceTransferRow::from(transfer)).await?;
        }
        insert.end().await
    }

    #[trace]
    async fn latest_processed_height(&self) -> Result<Option<u64>, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT max(block_height) AS height, count() AS transfers
            FROM balance_transfers
        "};

        let row = self.client.query(query).fetch_one::<MaxHeightRow>().await?;
        Ok((row.transfers > 0).then_some(row.height))
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct MaxHeightRow {
    height: u64,
    transfers: u64,
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct BalanceTransferRow {
    extrinsic_id: String,
    event_idx: String,
    block_height: u64,
    block_timestamp: u64,
    from_address: String,
    to_address: String,
    asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    fee: Decimal,
    _version: u64,
}

impl From<&BalanceTransfer> for BalanceTransferRow {
    fn from(transfer: &BalanceTransfer) -> Self {
        Self {
            extrinsic_id: transfer.extrinsic_id.clone(),
            event_idx: transfer.event_idx.clone(),
            block_height: transfer.block_height,
            block_timestamp: transfer.block_timestamp,
            from_address: transfer.from_address.clone(),
            to_address: transfer.to_address.clone(),
            asset: transfer.asset.clone(),
            amount: transfer.amount,
            fee: transfer.fee,
            _version: transfer.version,
        }
    }
}
