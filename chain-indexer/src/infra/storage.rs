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

use crate::domain::{self, RangeStats};
use clickhouse::{Client, Row};
use fastrace::trace;
use indexer_common::domain::CanonicalBlock;
use indoc::indoc;
use serde::{Deserialize, Serialize};

/// [domain::storage::Storage] implementation on the analytics store. Rows
/// carry `_version = block_height`; the replacing merge keeps exactly one
/// logical row per height.
#[derive(Clone)]
pub struct Storage {
    client: Client,
}

impl Storage {
    /// Create the storage and make sure the `block_stream` table exists,
    /// partitioned by the network's partition size.
    pub async fn new(
        client: Client,
        partition_size: u64,
    ) -> Result<Self, clickhouse::error::Error> {
        let schema = format!(
            indoc! {"
                CREATE TABLE IF NOT EXISTS block_stream (
                    block_height UInt64,
                    block_hash String,
                    block_timestamp UInt64,
                    `transactions.extrinsic_id` Array(String),
                    `transactions.extrinsic_hash` Array(String),
                    `transactions.signer` Array(String),
                    `transactions.call_module` Array(String),
                    `transactions.call_function` Array(String),
                    `transactions.status` Array(String),
                    addresses Array(String),
                    `events.event_idx` Array(String),
                    `events.extrinsic_id` Array(String),
                    `events.module_id` Array(String),
                    `events.event_id` Array(String),
                    `events.attributes` Array(String),
                    _version UInt64
                )
                ENGINE = ReplacingMergeTree(_version)
                PARTITION BY intDiv(block_height, {})
                ORDER BY block_height
            "},
            partition_size
        );

        client.query(&schema).execute().await?;

        Ok(Self { client })
    }
}

impl domain::storage::Storage for Storage {
    #[trace]
    async fn save_blocks(&self, blocks: &[CanonicalBlock]) -> Result<(), clickhouse::error::Error> {
        if blocks.is_empty() {
            return Ok(());
        }

        let mut insert = self.client.insert("block_stream")?;
        for block in blocks {
            insert.write(&BlockStreamInsertRow::from(block)).await?;
        }
        insert.end().await
    }

    #[trace]
    async fn latest_height(&self) -> Result<Option<u64>, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT max(block_height) AS height, count() AS blocks
            FROM block_stream
        "};

        let row = self.client.query(query).fetch_one::<MaxHeightRow>().await?;
        Ok((row.blocks > 0).then_some(row.height))
    }

    #[trace(properties = { "start_height": "{start_height}", "end_height": "{end_height}" })]
    async fn range_stats(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<RangeStats, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT
                count() AS block_count,
                min(block_height) AS first_indexed_height,
                max(block_height) AS last_indexed_height
            FROM block_stream FINAL
            WHERE block_height >= ? AND block_height <= ?
        "};

        let row = self
            .client
            .query(query)
            .bind(start_height)
            .bind(end_height)
            .fetch_one::<RangeStatsRow>()
            .await?;

        Ok(RangeStats {
            block_count: row.block_count,
            first_indexed_height: (row.block_count > 0).then_some(row.first_indexed_height),
            last_indexed_height: (row.block_count > 0).then_some(row.last_indexed_height),
        })
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct MaxHeightRow {
    height: u64,
    blocks: u64,
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct RangeStatsRow {
    block_count: u64,
    first_indexed_height: u64,
    last_indexed_height: u64,
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct BlockStreamInsertRow {
    block_height: u64,
    block_hash: String,
    block_timestamp: u64,
    #[serde(rename = "transactions.extrinsic_id")]
    transaction_extrinsic_ids: Vec<String>,
    #[serde(rename = "transactions.extrinsic_hash")]
    transaction_extrinsic_hashes: Vec<String>,
    #[serde(rename = "transactions.signer")]
    transaction_signers: Vec<String>,
    #[serde(rename = "transactions.call_module")]
    transaction_call_modules: Vec<String>,
    #[serde(rename = "transactions.call_function")]
    transaction_call_functions: Vec<String>,
    #[serde(rename = "transactions.status")]
    transaction_statuses: Vec<String>,
    addresses: Vec<String>,
    #[serde(rename = "events.event_idx")]
    event_idxs: Vec<String>,
    #[serde(rename = "events.extrinsic_id")]
    event_extrinsic_ids: Vec<String>,
    #[serde(rename = "events.module_id")]
    event_module_ids: Vec<String>,
    #[serde(rename = "events.event_id")]
    event_event_ids: Vec<String>,
    #[serde(rename = "events.attributes")]
    event_attributes: Vec<String>,
    _version: u64,
}

impl From<&CanonicalBlock> for BlockStreamInsertRow {
    fn from(block: &CanonicalBlock) -> Self {
        Self {
            block_height: block.height,
            block_hash: block.hash.clone(),
            block_timestamp: block.timestamp,
            transaction_extrinsic_ids: block
                .transactions
                .iter()
                .map(|transaction| transaction.extrinsic_id.clone())
                .collect(),
            transaction_extrinsic_hashes: block
                .transactions
                .iter()
                .map(|transaction| transaction.extrinsic_hash.clone())
                .collect(),
            transaction_signers: block
                .transactions
                .iter()
                .map(|transaction| transaction.signer.clone())
                .collect(),
            transaction_call_modules: block
                .transactions
                .iter()
                .map(|transaction| transaction.call_module.clone())
                .collect(),
            transaction_call_functions: block
                .transactions
                .iter()
                .map(|transaction| transaction.call_function.clone())
                .collect(),
            transaction_statuses: block
                .transactions
                .iter()
                .map(|transaction| transaction.status.clone())
                .collect(),
            addresses: block.addresses.clone(),
            event_idxs: block
                .events
                .iter()
                .map(|event| event.event_idx.clone())
                .collect(),
            event_extrinsic_ids: block
                .events
                .iter()
                .map(|event| event.extrinsic_id.clone())
                .collect(),
            event_module_ids: block
                .events
                .iter()
                .map(|event| event.module_id.clone())
                .collect(),
            event_event_ids: block
                .events
                .iter()
                .map(|event| event.event_id.clone())
                .collect(),
            event_attributes: block
                .events
                .iter()
                .map(|event| event.attributes.to_string())
                .collect(),
            _version: block.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_common::domain::{EventRecord, TransactionRecord};

    #[test]
    fn test_insert_row_shape() {
        let block = CanonicalBlock {
            height: 1_000,
            hash: "0xabc".to_owned(),
            timestamp: 1_700_000_000_000,
            transactions: vec![TransactionRecord {
                extrinsic_id: "1000-0".into(),
                extrinsic_hash: "0x01".into(),
                signer: "alice".into(),
                call_module: "Balances".into(),
                call_function: "transfer".into(),
                status: "success".into(),
            }],
            events: vec![EventRecord {
                event_idx: "1000-1".into(),
                extrinsic_id: "1000-0".into(),
                module_id: "Balances".into(),
                event_id: "Transfer".into(),
                attributes: serde_json::json!({ "from": "alice" }),
            }],
            addresses: vec!["alice".into()],
        };

        let row = BlockStreamInsertRow::from(&block);
        assert_eq!(row._version, 1_000);
        assert_eq!(row.transaction_extrinsic_ids, vec!["1000-0".to_owned()]);
        assert_eq!(row.event_attributes, vec![r#"{"from":"alice"}"#.to_owned()]);
    }
}
