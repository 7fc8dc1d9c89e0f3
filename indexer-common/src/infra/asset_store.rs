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

use crate::domain::{
    self, Asset, AssetType, AssetVerification, NATIVE_CONTRACT, Network, NewAsset,
};
use clickhouse::{Client, Row};
use fastrace::trace;
use indoc::indoc;
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

const SCHEMA: &str = indoc! {"
    CREATE TABLE IF NOT EXISTS assets (
        network String,
        asset_symbol String,
        asset_contract String,
        asset_verified String,
        asset_name String,
        asset_type String,
        decimals UInt32,
        first_seen_block UInt64,
        first_seen_timestamp UInt64,
        updated_by String,
        notes String,
        last_updated UInt64
    )
    ENGINE = ReplacingMergeTree(last_updated)
    ORDER BY (network, asset_contract)
"};

/// [domain::AssetStore] implementation on the analytics store, with an
/// in-memory cache keyed by (network, contract).
#[derive(Clone)]
pub struct AssetStore {
    network: Network,
    client: Client,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    symbol: String,
    verified: AssetVerification,
}

impl AssetStore {
    /// Create the store and make sure the `assets` table exists.
    pub async fn new(network: Network, client: Client) -> Result<Self, clickhouse::error::Error> {
        client.query(SCHEMA).execute().await?;

        Ok(Self {
            network,
            client,
            cache: Default::default(),
        })
    }

    fn cache_key(&self, contract: &str) -> String {
        format!("{}:{contract}", self.network)
    }

    async fn fetch_row(
        &self,
        contract: &str,
    ) -> Result<Option<AssetRow>, clickhouse::error::Error> {
        let query = indoc! {"
            SELECT
                network,
                asset_symbol,
                asset_contract,
                asset_verified,
                asset_name,
                asset_type,
                decimals,
                first_seen_block,
                first_seen_timestamp,
                updated_by,
                notes,
                last_updated
            FROM assets FINAL
            WHERE network = ? AND asset_contract = ?
            LIMIT 1
        "};

        self.client
            .query(query)
            .bind(self.network.as_str())
            .bind(contract)
            .fetch_optional::<AssetRow>()
            .await
    }
}

impl domain::AssetStore for AssetStore {
    #[trace]
    async fn init_native_asset(&self) -> Result<(), clickhouse::error::Error> {
        if self.fetch_row(NATIVE_CONTRACT).await?.is_some() {
            debug!(network:% = self.network; "native asset already present");
            return Ok(());
        }

        let row = AssetRow {
            network: self.network.as_str().to_owned(),
            asset_symbol: self.network.native_symbol().to_owned(),
            asset_contract: NATIVE_CONTRACT.to_owned(),
            asset_verified: AssetVerification::Verified.as_str().to_owned(),
            asset_name: self.network.native_name().to_owned(),
            asset_type: AssetType::Native.as_str().to_owned(),
            decimals: self.network.native_decimals(),
            first_seen_block: 0,
            first_seen_timestamp: now_millis(),
            updated_by: "system".to_owned(),
            notes: String::new(),
            last_updated: now_millis(),
        };

        let mut insert = self.client.insert("assets")?;
        insert.write(&row).await?;
        insert.end().await?;

        self.cache.lock().insert(
            self.cache_key(NATIVE_CONTRACT),
            CacheEntry {
                symbol: row.asset_symbol.clone(),
                verified: AssetVerification::Verified,
            },
        );

        info!(
            network:% = self.network,
            symbol = row.asset_symbol;
            "native asset initialized"
        );

        Ok(())
    }

    #[trace]
    async fn ensure_asset_exists(&self, asset: NewAsset) -> Result<bool, clickhouse::error::Error> {
        // The native asset is created once at init and never as a token row.
        if asset.contract.is_empty() || asset.contract == NATIVE_CONTRACT {
            return Ok(false);
        }

        let cache_key = self.cache_key(&asset.contract);
        if self.cache.lock().contains_key(&cache_key) {
            return Ok(false);
        }

        if let Some(row) = self.fetch_row(&asset.contract).await? {
            self.cache.lock().insert(
                cache_key,
                CacheEntry {
                    symbol: row.asset_symbol,
                    verified: row.asset_verified.parse().unwrap_or(AssetVerification::Unknown),
                },
            );
            return Ok(false);
        }

        let row = AssetRow {
            network: self.network.as_str().to_owned(),
            asset_symbol: asset.symbol.clone(),
            asset_contract: asset.contract.clone(),
            asset_verified: AssetVerification::Unknown.as_str().to_owned(),
            asset_name: asset.name.unwrap_or_else(|| asset.symbol.clone()),
            asset_type: asset.asset_type.as_str().to_owned(),
            decimals: asset.decimals,
            first_seen_block: asset.first_seen_block,
            first_seen_timestamp: asset.first_seen_timestamp,
            updated_by: "indexer".to_owned(),
            notes: asset.notes.unwrap_or_default(),
            last_updated: now_millis(),
        };

        let mut insert = self.client.insert("assets")?;
        insert.write(&row).await?;
        insert.end().await?;

        self.cache.lock().insert(
            cache_key,
            CacheEntry {
                symbol: asset.symbol.clone(),
                verified: AssetVerification::Unknown,
            },
        );

        info!(
            network:% = self.network,
            symbol = asset.symbol,
            contract = asset.contract;
            "asset created"
        );

        Ok(true)
    }

    #[trace]
    async fn asset_info(&self, contract: &str) -> Result<Option<Asset>, clickhouse::error::Error> {
        let Some(row) = self.fetch_row(contract).await? else {
            return Ok(None);
        };

        self.cache.lock().insert(
            self.cache_key(contract),
            CacheEntry {
                symbol: row.asset_symbol.clone(),
                verified: row.asset_verified.parse().unwrap_or(AssetVerification::Unknown),
            },
        );

        row.try_into().map(Some)
    }

    #[trace]
    async fn update_verification(
        &self,
        contract: &str,
        verification: AssetVerification,
        updated_by: &str,
        notes: Option<&str>,
    ) -> Result<(), clickhouse::error::Error> {
        let query = match notes {
            Some(_) => indoc! {"
                ALTER TABLE assets
                UPDATE asset_verified = ?, updated_by = ?, last_updated = ?, notes = ?
                WHERE network = ? AND asset_contract = ?
            "},
            None => indoc! {"
                ALTER TABLE assets
                UPDATE asset_verified = ?, updated_by = ?, last_updated = ?
                WHERE network = ? AND asset_contract = ?
            "},
        };

        let mut query = self
            .client
            .query(query)
            .bind(verification.as_str())
            .bind(updated_by)
            .bind(now_millis());
        if let Some(notes) = notes {
            query = query.bind(notes);
        }
        query
            .bind(self.network.as_str())
            .bind(contract)
            .execute()
            .await?;

        if let Some(entry) = self.cache.lock().get_mut(&self.cache_key(contract)) {
            entry.verified = verification;
        }

        info!(
            network:% = self.network,
            contract,
            verification:%,
            updated_by;
            "asset verification updated"
        );

        Ok(())
    }

    fn clear_cache(&self) {
        self.cache.lock().clear();
        info!(network:% = self.network; "asset cache cleared");
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct AssetRow {
    network: String,
    asset_symbol: String,
    asset_contract: String,
    asset_verified: String,
    asset_name: String,
    asset_type: String,
    decimals: u32,
    first_seen_block: u64,
    first_seen_timestamp: u64,
    updated_by: String,
    notes: String,
    last_updated: u64,
}

impl TryFrom<AssetRow> for Asset {
    type Error = clickhouse::error::Error;

    fn try_from(row: AssetRow) -> Result<Self, Self::Error> {
        let verified = row
            .asset_verified
            .parse()
            .map_err(|error| clickhouse::error::Error::Custom(format!("{error}")))?;
        let asset_type = row
            .asset_type
            .parse()
            .map_err(|error| clickhouse::error::Error::Custom(format!("{error}")))?;

        Ok(Asset {
            network: row.network,
            symbol: row.asset_symbol,
            contract: row.asset_contract,
            verified,
            name: row.asset_name,
            asset_type,
            decimals: row.decimals,
            first_seen_block: row.first_seen_block,
            first_seen_timestamp: row.first_seen_timestamp,
            updated_by: row.updated_by,
            notes: row.notes,
            last_updated: row.last_updated,
        })
    }
}
