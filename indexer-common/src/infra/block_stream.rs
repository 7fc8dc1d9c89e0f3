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

use crate::domain::{self, BlockRef, CanonicalBlock, EventRecord, TransactionRecord};
use clickhouse::{Client, Row};
use fastrace::trace;
use indoc::indoc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// [domain::BlockSource] implementation reading the canonical `block_stream`
/// table. Reads use FINAL so replayed heights merge-collapse to their latest
/// version.
#[derive(Clone)]
pub struct BlockStream {
    client: Client,
}

impl BlockStream {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl domain::BlockSource for BlockStream {
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
    async fn blocks_by_range(
        &self,
        start_height: u64,
        end_height: u64,
        only_with_addresses: bool,
    ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error> {
        let address_filter = if only_with_addresses {
            "AND arrayExists(x -> x != '', addresses)"
        } else {
            ""
        };

        let query = format!(
            indoc! {"
                SELECT
                    block_height,
                    block_hash,
                    block_timestamp,
                    `transactions.extrinsic_id`,
                    `transactions.extrinsic_hash`,
                    `transactions.signer`,
                    `transactions.call_module`,
                    `transactions.call_function`,
                    `transactions.status`,
                    addresses,
                    `events.event_idx`,
                    `events.extrinsic_id`,
                    `events.module_id`,
                    `events.event_id`,
                    `events.attributes`
                FROM block_stream FINAL
                WHERE block_height >= ? AND block_height <= ? {}
                ORDER BY block_height
            "},
            address_filter
        );

        let rows = self
            .client
            .query(&query)
            .bind(start_height)
            .bind(end_height)
            .fetch_all::<BlockStreamRow>()
            .await?;

        Ok(rows.into_iter().map(CanonicalBlock::from).collect())
    }

    #[trace(properties = { "start_timestamp": "{start_timestamp}", "end_timestamp": "{end_timestamp}" })]
    async fn blocks_by_timestamp_range(
        &self,
        start_timestamp: u64,
        end_timestamp: u64,
        only_with_addresses: bool,
    ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error> {
        let address_filter = if only_with_addresses {
            "AND arrayExists(x -> x != '', addresses)"
        } else {
            ""
        };

        let query = format!(
            indoc! {"
                SELECT
                    block_height,
                    block_hash,
                    block_timestamp,
                    `transactions.extrinsic_id`,
                    `transactions.extrinsic_hash`,
                    `transactions.signer`,
                    `transactions.call_module`,
                    `transactions.call_function`,
                    `transactions.status`,
                    addresses,
                    `events.event_idx`,
                    `events.extrinsic_id`,
                    `events.module_id`,
                    `events.event_id`,
                    `events.attributes`
                FROM block_stream FINAL
                WHERE block_timestamp >= ? AND block_timestamp < ? {}
                ORDER BY block_height
            "},
            address_filter
        );

        let rows = self
            .client
            .query(&query)
            .bind(start_timestamp)
            .bind(end_timestamp)
            .fetch_all::<BlockStreamRow>()
            .await?;

        Ok(rows.into_iter().map(CanonicalBlock::from).collect())
    }

    #[trace]
    async fn block_by_nearest_timestamp(
        &self,
        timestamp: u64,
    ) -> Result<Option<BlockRef>, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT block_height, block_hash, block_timestamp
            FROM block_stream FINAL
            WHERE block_timestamp <= ?
            ORDER BY block_timestamp DESC
            LIMIT 1
        "};

        let row = self
            .client
            .query(query)
            .bind(timestamp)
            .fetch_optional::<BlockRefRow>()
            .await?;

        Ok(row.map(|row| BlockRef {
            height: row.block_height,
            hash: row.block_hash,
            timestamp: row.block_timestamp,
        }))
    }

    #[trace]
    async fn earliest_timestamp(&self) -> Result<Option<u64>, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT min(block_timestamp) AS timestamp, count() AS blocks
            FROM block_stream
            WHERE block_timestamp > 0
        "};

        let row = self
            .client
            .query(query)
            .fetch_one::<MinTimestampRow>()
            .await?;
        Ok((row.blocks > 0).then_some(row.timestamp))
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct MinTimestampRow {
    timestamp: u64,
    blocks: u64,
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct MaxHeightRow {
    height: u64,
    blocks: u64,
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct BlockRefRow {
    block_height: u64,
    block_hash: String,
    block_timestamp: u64,
}

/// Columnar shape of one `block_stream` row; nested columns are flattened
/// into parallel arrays.
#[derive(Debug, Row, Serialize, Deserialize)]
pub struct BlockStreamRow {
    pub block_height: u64,
    pub block_hash: String,
    pub block_timestamp: u64,
    #[serde(rename = "transactions.extrinsic_id")]
    pub transaction_extrinsic_ids: Vec<String>,
    #[serde(rename = "transactions.extrinsic_hash")]
    pub transaction_extrinsic_hashes: Vec<String>,
    #[serde(rename = "transactions.signer")]
    pub transaction_signers: Vec<String>,
    #[serde(rename = "transactions.call_module")]
    pub transaction_call_modules: Vec<String>,
    #[serde(rename = "transactions.call_function")]
    pub transaction_call_functions: Vec<String>,
    #[serde(rename = "transactions.status")]
    pub transaction_statuses: Vec<String>,
    pub addresses: Vec<String>,
    #[serde(rename = "events.event_idx")]
    pub event_idxs: Vec<String>,
    #[serde(rename = "events.extrinsic_id")]
    pub event_extrinsic_ids: Vec<String>,
    #[serde(rename = "events.module_id")]
    pub event_module_ids: Vec<String>,
    #[serde(rename = "events.event_id")]
    pub event_event_ids: Vec<String>,
    #[serde(rename = "events.attributes")]
    pub event_attributes: Vec<String>,
}

impl From<BlockStreamRow> for CanonicalBlock {
    fn from(row: BlockStreamRow) -> Self {
        let mut transactions = Vec::with_capacity(row.transaction_extrinsic_ids.len());
        let mut seen_extrinsics = HashSet::new();
        for (index, extrinsic_id) in row.transaction_extrinsic_ids.iter().enumerate() {
            if !seen_extrinsics.insert(extrinsic_id.clone()) {
                continue;
            }

            transactions.push(TransactionRecord {
                extrinsic_id: extrinsic_id.clone(),
                extrinsic_hash: column(&row.transaction_extrinsic_hashes, index),
                signer: column(&row.transaction_signers, index),
                call_module: column(&row.transaction_call_modules, index),
                call_function: column(&row.transaction_call_functions, index),
                status: column(&row.transaction_statuses, index),
            });
        }

        let mut events = Vec::with_capacity(row.event_idxs.len());
        let mut seen_events = HashSet::new();
        for (index, event_idx) in row.event_idxs.iter().enumerate() {
            if !seen_events.insert(event_idx.clone()) {
                continue;
            }

            let attributes = row
                .event_attributes
                .get(index)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(serde_json::Value::Null);

            events.push(EventRecord {
                event_idx: event_idx.clone(),
                extrinsic_id: column(&row.event_extrinsic_ids, index),
                module_id: column(&row.event_module_ids, index),
                event_id: column(&row.event_event_ids, index),
                attributes,
            });
        }

        CanonicalBlock {
            height: row.block_height,
            hash: row.block_hash,
            timestamp: row.block_timestamp,
            transactions,
            events,
            addresses: row.addresses,
        }
    }
}

fn column(values: &[String], index: usize) -> String {
    values.get(index).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruction_dedups_nested_rows() {
        let row = BlockStreamRow {
            block_height: 1_000,
            block_hash: "0xabc".to_owned(),
            block_timestamp: 1_700_000_000_000,
            transaction_extrinsic_ids: vec!["1000-0".into(), "1000-0".into(), "1000-1".into()],
            transaction_extrinsic_hashes: vec!["0x01".into(), "0x01".into(), "0x02".into()],
            transaction_signers: vec!["alice".into(), "alice".into(), String::new()],
            transaction_call_modules: vec!["Balances".into(), "Balances".into(), "Timestamp".into()],
            transaction_call_functions: vec!["transfer".into(), "transfer".into(), "set".into()],
            transaction_statuses: vec!["success".into(), "success".into(), "success".into()],
            addresses: vec!["alice".into(), "bob".into()],
            event_idxs: vec!["1000-1".into(), "1000-1".into()],
            event_extrinsic_ids: vec!["1000-0".into(), "1000-0".into()],
            event_module_ids: vec!["Balances".into(), "Balances".into()],
            event_event_ids: vec!["Transfer".into(), "Transfer".into()],
            event_attributes: vec![
                r#"{"from":"alice","to":"bob","amount":"10"}"#.into(),
                r#"{"from":"alice","to":"bob","amount":"10"}"#.into(),
            ],
        };

        let block = CanonicalBlock::from(row);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.events.len(), 1);
        assert_eq!(block.events[0].attr_str("from"), Some("alice"));
    }
}
