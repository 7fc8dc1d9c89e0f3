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

use crate::{
    domain::{
        self, CanonicalBlock, EventRecord, Network, STATUS_FAILED, STATUS_SUCCESS,
        TransactionRecord, node::AccountBalances,
    },
    error::BoxError,
    retry,
};
use fastrace::trace;
use log::{debug, info, warn};
use serde::Deserialize;
use std::{collections::BTreeSet, str::FromStr, sync::Arc, time::Duration};
use subxt::{
    OnlineClient, SubstrateConfig,
    backend::{
        legacy::LegacyRpcMethods,
        rpc::reconnecting_rpc_client::{ExponentialBackoff, RpcClient},
    },
    events::Phase,
    ext::scale_value::{At, Composite, Primitive, Value as ScaleValue, ValueDef},
    utils::{AccountId32, H256},
};
use thiserror::Error;
use tokio::{sync::RwLock, time::sleep};
use tokio_util::sync::CancellationToken;

/// Delay between closing old connections and opening new ones.
const RESET_DELAY: Duration = Duration::from_secs(1);

/// Stagger between opening the block-data and events connections.
const STAGGER_DELAY: Duration = Duration::from_millis(500);

/// Events whose address attributes feed the per-block `addresses` union.
const TRANSFER_LIKE_EVENTS: [&str; 11] = [
    "Balances.Transfer",
    "Balances.Endowed",
    "Staking.Reward",
    "Staking.Rewarded",
    "Treasury.Awarded",
    "SubtensorModule.StakeAdded",
    "SubtensorModule.StakeRemoved",
    "SubtensorModule.EmissionReceived",
    "Crowdloan.Contributed",
    "Auctions.BidAccepted",
    "Assets.Transferred",
];

/// Address-bearing attribute names of transfer-like events.
const ADDRESS_ATTRIBUTES: [&str; 8] = [
    "from", "to", "account", "who", "stash", "hotkey", "coldkey", "bidder",
];

/// Config for the node connection.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub url: String,

    #[serde(with = "humantime_serde", default = "default_reconnect_max_delay")]
    pub reconnect_max_delay: Duration,

    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: usize,
}

impl Config {
    pub fn new(url: String) -> Self {
        Self {
            url,
            reconnect_max_delay: default_reconnect_max_delay(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

fn default_reconnect_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_reconnect_max_attempts() -> usize {
    10
}

/// A [domain::node::Node] implementation based on subxt. Owns two
/// independent connections, one for block data and one for events, so both
/// parts of a block are fetched concurrently. Every operation retries
/// forever with constant backoff, resetting both connections between
/// attempts, until it succeeds, hits a fatal per-block error, or the
/// cancellation token fires.
#[derive(Clone)]
pub struct SubxtNode {
    network: Network,
    config: Config,
    cancel: CancellationToken,
    connections: Arc<RwLock<Arc<Connections>>>,
}

struct Connections {
    block_data: OnlineClient<SubstrateConfig>,
    events: OnlineClient<SubstrateConfig>,
    rpc: LegacyRpcMethods<SubstrateConfig>,
}

impl SubxtNode {
    /// Create a new [SubxtNode]; fails fast when the endpoint cannot be
    /// reached at startup.
    pub async fn new(
        network: Network,
        config: Config,
        cancel: CancellationToken,
    ) -> Result<Self, NodeError> {
        let connections = connect(&config).await?;
        info!(network:%, url = config.url; "node connections established");

        Ok(Self {
            network,
            config,
            cancel,
            connections: Arc::new(RwLock::new(Arc::new(connections))),
        })
    }

    async fn connections(&self) -> Arc<Connections> {
        self.connections.read().await.clone()
    }

    /// Constant-backoff recovery step between retries: throttled logging,
    /// cancellation-aware sleep, then the connection reset protocol.
    async fn recover(
        &self,
        operation: &'static str,
        retries: &mut u32,
        error: NodeError,
    ) -> Result<(), NodeError> {
        *retries += 1;
        if *retries % retry::LOG_EVERY_N == 1 {
            warn!(
                operation,
                retries = *retries,
                url = self.config.url,
                error:%;
                "node operation failed, resetting connections"
            );
        }

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(NodeError::Cancelled),
            _ = sleep(retry::BACKOFF) => {}
        }

        self.reset().await
    }

    /// Close both connections, wait briefly, open new ones staggered by
    /// 500ms, and re-initialize runtime metadata on each. Retries forever.
    async fn reset(&self) -> Result<(), NodeError> {
        let mut retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            // Wait briefly before opening replacement connections.
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(NodeError::Cancelled),
                _ = sleep(RESET_DELAY) => {}
            }

            match connect(&self.config).await {
                Ok(connections) => {
                    *self.connections.write().await = Arc::new(connections);
                    info!(url = self.config.url; "node connections reinitialized");
                    return Ok(());
                }

                Err(error) => {
                    retries += 1;
                    if retries % retry::LOG_EVERY_N == 1 {
                        warn!(
                            retries,
                            url = self.config.url,
                            error:%;
                            "reconnect failed, retrying"
                        );
                    }

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(NodeError::Cancelled),
                        _ = sleep(retry::BACKOFF) => {}
                    }
                }
            }
        }
    }

    async fn try_current_height(&self, connections: &Connections) -> Result<u64, NodeError> {
        let header = connections
            .rpc
            .chain_get_header(None)
            .await
            .map_err(NodeError::Rpc)?
            .ok_or(NodeError::MissingHead)?;

        Ok(header.number as u64)
    }

    async fn try_block_by_height(
        &self,
        connections: &Connections,
        height: u64,
    ) -> Result<Option<CanonicalBlock>, NodeError> {
        let Some(hash) = connections
            .rpc
            .chain_get_block_hash(Some(height.into()))
            .await
            .map_err(NodeError::Rpc)?
        else {
            return Ok(None);
        };

        // Block body and events are fetched concurrently, each over its own
        // connection; both complete or neither does.
        let (extrinsics, events) = tokio::try_join!(
            async {
                connections
                    .block_data
                    .blocks()
                    .at(hash)
                    .await
                    .map_err(|error| NodeError::FetchBlock(hash, error.into()))?
                    .extrinsics()
                    .await
                    .map_err(|error| NodeError::GetExtrinsics(error.into()))
            },
            async {
                connections
                    .events
                    .blocks()
                    .at(hash)
                    .await
                    .map_err(|error| NodeError::FetchBlock(hash, error.into()))?
                    .events()
                    .await
                    .map_err(|error| NodeError::GetEvents(error.into()))
            },
        )?;

        let mut timestamp = None;
        let mut transactions = Vec::new();

        for extrinsic in extrinsics.iter() {
            let index = extrinsic.index();
            let pallet = extrinsic
                .pallet_name()
                .map_err(|error| NodeError::DecodeExtrinsic(error.into()))?
                .to_owned();
            let call = extrinsic
                .variant_name()
                .map_err(|error| NodeError::DecodeExtrinsic(error.into()))?
                .to_owned();

            if pallet == "Timestamp" && call == "set" {
                let fields = extrinsic
                    .field_values()
                    .map_err(|error| NodeError::DecodeExtrinsic(error.into()))?;
                timestamp = composite_u128(&fields, "now").map(|now| now as u64);
            }

            let signer = extrinsic
                .address_bytes()
                .and_then(account_from_address_bytes)
                .map(|account| account.to_string())
                .unwrap_or_default();

            transactions.push(TransactionRecord {
                extrinsic_id: format!("{height}-{index}"),
                extrinsic_hash: const_hex::encode_prefixed(extrinsic.hash().0),
                signer,
                call_module: pallet,
                call_function: call,
                status: STATUS_SUCCESS.to_owned(),
            });
        }

        // The timestamp inherent is mandatory; a block without it cannot be
        // attributed to a point in time and is rejected.
        let Some(timestamp) = timestamp else {
            return Err(NodeError::MissingTimestamp(height));
        };

        let mut event_records = Vec::new();
        let mut failed_extrinsics = BTreeSet::new();

        for event in events.iter() {
            let event = event.map_err(|error| NodeError::GetNextEvent(error.into()))?;
            let event_index = event.index();

            let extrinsic_index = match event.phase() {
                Phase::ApplyExtrinsic(index) => Some(index as u64),
                _ => None,
            };

            let module_id = event.pallet_name().to_owned();
            let event_id = event.variant_name().to_owned();

            if let Some(index) = extrinsic_index
                && module_id == "System"
                && event_id == "ExtrinsicFailed"
            {
                failed_extrinsics.insert(index);
            }

            let attributes = event
                .field_values()
                .map(|fields| composite_to_json(&fields))
                .unwrap_or(serde_json::Value::Null);

            event_records.push(EventRecord {
                event_idx: format!("{height}-{event_index}"),
                extrinsic_id: extrinsic_index
                    .map(|index| format!("{height}-{index}"))
                    .unwrap_or_default(),
                module_id,
                event_id,
                attributes,
            });
        }

        for transaction in &mut transactions {
            let failed = transaction
                .extrinsic_id
                .split_once('-')
                .and_then(|(_, index)| index.parse::<u64>().ok())
                .is_some_and(|index| failed_extrinsics.contains(&index));
            if failed {
                transaction.status = STATUS_FAILED.to_owned();
            }
        }

        let addresses = extract_addresses(&transactions, &event_records);

        debug!(
            height,
            hash:% = hash,
            transactions_len = transactions.len(),
            events_len = event_records.len();
            "block fetched"
        );

        Ok(Some(CanonicalBlock {
            height,
            hash: const_hex::encode_prefixed(hash.0),
            timestamp,
            transactions,
            events: event_records,
            addresses,
        }))
    }

    async fn try_balances_at(
        &self,
        connections: &Connections,
        block_hash: H256,
        account: &AccountId32,
    ) -> Result<AccountBalances, NodeError> {
        let account_info = fetch_storage(
            connections,
            block_hash,
            "System",
            "Account",
            vec![subxt::dynamic::Value::from_bytes(account.0)],
        )
        .await?;

        let (free, reserved) = match account_info {
            Some(value) => (
                lookup_u128(&value, &["data", "free"]).unwrap_or_default(),
                lookup_u128(&value, &["data", "reserved"]).unwrap_or_default(),
            ),
            None => (0, 0),
        };

        // On Torus networks the staked balance lives in the Torus0 staking
        // map and is the sum of all stake entries of the address.
        let staked = if self.network.is_torus() {
            let staking_query = subxt::dynamic::storage(
                "Torus0",
                "StakingTo",
                vec![subxt::dynamic::Value::from_bytes(account.0)],
            );

            let mut entries = connections
                .block_data
                .storage()
                .at(block_hash)
                .iter(staking_query)
                .await
                .map_err(|error| NodeError::Storage(Box::new(error.into())))?;

            let mut staked = 0u128;
            while let Some(entry) = entries.next().await {
                let entry = entry.map_err(|error| NodeError::Storage(Box::new(error.into())))?;
                let value = entry
                    .value
                    .to_value()
                    .map_err(|error| NodeError::Storage(Box::new(error.into())))?;
                staked = staked.saturating_add(scale_u128(&value).unwrap_or_default());
            }
            staked
        } else {
            0
        };

        Ok(AccountBalances {
            free,
            reserved,
            staked,
        })
    }

    /// Raw storage query at a block hash with infinite retry, e.g.
    /// System.Account or Torus0.StakingTo entries.
    pub async fn storage_at(
        &self,
        block_hash: &str,
        pallet: &str,
        entry: &str,
        keys: Vec<subxt::dynamic::Value>,
    ) -> Result<Option<ScaleValue<u32>>, NodeError> {
        let block_hash = parse_block_hash(block_hash)?;
        let mut retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let connections = self.connections().await;
            match fetch_storage(&connections, block_hash, pallet, entry, keys.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => self.recover("storage_at", &mut retries, error).await?,
            }
        }
    }

    async fn try_token_decimals(&self, connections: &Connections) -> Result<u32, NodeError> {
        let properties = connections
            .rpc
            .system_properties()
            .await
            .map_err(NodeError::Rpc)?;

        if let Some(decimals) = properties.get("tokenDecimals") {
            let decimals = decimals
                .as_u64()
                .or_else(|| decimals.as_array()?.first()?.as_u64());
            if let Some(decimals) = decimals {
                return Ok(decimals as u32);
            }
        }

        // Fallback: infer from the scale type of the total issuance.
        let issuance_query = subxt::dynamic::storage("Balances", "TotalIssuance", vec![]);
        let issuance = connections
            .block_data
            .storage()
            .at_latest()
            .await
            .map_err(|error| NodeError::Storage(Box::new(error.into())))?
            .fetch(&issuance_query)
            .await
            .map_err(|error| NodeError::Storage(Box::new(error.into())))?
            .ok_or(NodeError::MissingTokenDecimals)?
            .to_value()
            .map_err(|error| NodeError::Storage(Box::new(error.into())))?;

        match issuance.value {
            ValueDef::Primitive(Primitive::U128(_)) => Ok(12),
            ValueDef::Primitive(Primitive::U256(_)) => Ok(18),
            _ => Err(NodeError::MissingTokenDecimals),
        }
    }
}

impl domain::node::Node for SubxtNode {
    type Error = NodeError;

    async fn current_height(&self) -> Result<u64, NodeError> {
        let mut retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let connections = self.connections().await;
            match self.try_current_height(&connections).await {
                Ok(height) => return Ok(height),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => self.recover("current_height", &mut retries, error).await?,
            }
        }
    }

    #[trace(properties = { "height": "{height}" })]
    async fn block_by_height(&self, height: u64) -> Result<Option<CanonicalBlock>, NodeError> {
        let mut retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let connections = self.connections().await;
            match self.try_block_by_height(&connections, height).await {
                Ok(block) => return Ok(block),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => self.recover("block_by_height", &mut retries, error).await?,
            }
        }
    }

    async fn blocks_by_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<Vec<CanonicalBlock>, NodeError> {
        let mut blocks = Vec::with_capacity((end_height.saturating_sub(start_height) + 1) as usize);

        for height in start_height..=end_height {
            if self.cancel.is_cancelled() {
                info!(
                    height,
                    start_height,
                    end_height,
                    blocks_fetched = blocks.len();
                    "block range fetch cancelled"
                );
                break;
            }

            match self.block_by_height(height).await? {
                Some(block) => blocks.push(block),
                None => return Err(NodeError::BlockNotFound(height)),
            }
        }

        Ok(blocks)
    }

    async fn balances_at(
        &self,
        block_hash: &str,
        address: &str,
    ) -> Result<AccountBalances, NodeError> {
        let block_hash = parse_block_hash(block_hash)?;
        let account = AccountId32::from_str(address)
            .map_err(|_| NodeError::InvalidAddress(address.to_owned()))?;

        let mut retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let connections = self.connections().await;
            match self.try_balances_at(&connections, block_hash, &account).await {
                Ok(balances) => return Ok(balances),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => self.recover("balances_at", &mut retries, error).await?,
            }
        }
    }

    async fn token_decimals(&self) -> Result<u32, NodeError> {
        let mut retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let connections = self.connections().await;
            match self.try_token_decimals(&connections).await {
                Ok(decimals) => return Ok(decimals),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => self.recover("token_decimals", &mut retries, error).await?,
            }
        }
    }
}

async fn connect(config: &Config) -> Result<Connections, NodeError> {
    let retry_policy = ExponentialBackoff::from_millis(10)
        .max_delay(config.reconnect_max_delay)
        .take(config.reconnect_max_attempts);

    let block_data_rpc = RpcClient::builder()
        .retry_policy(retry_policy.clone())
        .build(&config.url)
        .await
        .map_err(|error| NodeError::Connect(error.into()))?;

    sleep(STAGGER_DELAY).await;

    let events_rpc = RpcClient::builder()
        .retry_policy(retry_policy)
        .build(&config.url)
        .await
        .map_err(|error| NodeError::Connect(error.into()))?;

    // Building the online clients fetches genesis hash, runtime version and
    // metadata, i.e. runtime metadata is re-initialized here.
    let block_data = OnlineClient::<SubstrateConfig>::from_rpc_client(block_data_rpc.clone())
        .await
        .map_err(|error| NodeError::Connect(error.into()))?;
    let events = OnlineClient::<SubstrateConfig>::from_rpc_client(events_rpc)
        .await
        .map_err(|error| NodeError::Connect(error.into()))?;

    let rpc = LegacyRpcMethods::<SubstrateConfig>::new(block_data_rpc.into());

    Ok(Connections {
        block_data,
        events,
        rpc,
    })
}

async fn fetch_storage(
    connections: &Connections,
    block_hash: H256,
    pallet: &str,
    entry: &str,
    keys: Vec<subxt::dynamic::Value>,
) -> Result<Option<ScaleValue<u32>>, NodeError> {
    let query = subxt::dynamic::storage(pallet, entry, keys);

    let value = connections
        .block_data
        .storage()
        .at(block_hash)
        .fetch(&query)
        .await
        .map_err(|error| NodeError::Storage(Box::new(error.into())))?;

    value
        .map(|value| {
            value
                .to_value()
                .map_err(|error| NodeError::Storage(Box::new(error.into())))
        })
        .transpose()
}

fn parse_block_hash(block_hash: &str) -> Result<H256, NodeError> {
    let bytes = const_hex::decode(block_hash)
        .map_err(|_| NodeError::InvalidBlockHash(block_hash.to_owned()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NodeError::InvalidBlockHash(block_hash.to_owned()))?;
    Ok(H256(bytes))
}

/// The signer of a MultiAddress-encoded extrinsic address, when it is a
/// plain account id.
fn account_from_address_bytes(bytes: &[u8]) -> Option<AccountId32> {
    match bytes {
        [0, account @ ..] if account.len() == 32 => {
            let account: [u8; 32] = account.try_into().ok()?;
            Some(AccountId32(account))
        }
        _ => None,
    }
}

fn extract_addresses(
    transactions: &[TransactionRecord],
    events: &[EventRecord],
) -> Vec<String> {
    let mut addresses = BTreeSet::new();

    for transaction in transactions {
        if !transaction.signer.is_empty() {
            addresses.insert(transaction.signer.clone());
        }
    }

    for event in events {
        if !TRANSFER_LIKE_EVENTS.iter().any(|key| event.is(key)) {
            continue;
        }

        for attribute in ADDRESS_ATTRIBUTES {
            if let Some(address) = event.attr_str(attribute)
                && !address.is_empty()
            {
                addresses.insert(address.to_owned());
            }
        }
    }

    addresses.into_iter().collect()
}

/// A named u128 field of a decoded composite.
fn composite_u128<T>(fields: &Composite<T>, name: &str) -> Option<u128> {
    match fields {
        Composite::Named(fields) => fields
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| scale_u128(value)),
        Composite::Unnamed(_) => None,
    }
}

/// A nested u128, e.g. `data.free` of a System.Account value.
fn lookup_u128<T>(value: &ScaleValue<T>, path: &[&str]) -> Option<u128> {
    let mut current = value;
    for key in path {
        current = current.at(*key)?;
    }
    scale_u128(current)
}

fn scale_u128<T>(value: &ScaleValue<T>) -> Option<u128> {
    match &value.value {
        ValueDef::Primitive(Primitive::U128(n)) => Some(*n),
        ValueDef::Composite(Composite::Unnamed(values)) if values.len() == 1 => {
            scale_u128(&values[0])
        }
        _ => None,
    }
}

/// Render decoded event fields as JSON, the shape stored in the `attributes`
/// column: named composites become objects, account ids become SS58 strings,
/// other byte blobs become 0x-hex, big integers stay numbers.
pub fn composite_to_json<T>(fields: &Composite<T>) -> serde_json::Value {
    match fields {
        Composite::Named(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), scale_to_json(value)))
                .collect(),
        ),
        Composite::Unnamed(values) => match values.len() {
            // Single-field events collapse to their payload.
            1 => scale_to_json(&values[0]),
            _ => serde_json::Value::Array(values.iter().map(scale_to_json).collect()),
        },
    }
}

fn scale_to_json<T>(value: &ScaleValue<T>) -> serde_json::Value {
    match &value.value {
        ValueDef::Primitive(primitive) => match primitive {
            Primitive::Bool(b) => serde_json::Value::Bool(*b),
            Primitive::Char(c) => serde_json::Value::String(c.to_string()),
            Primitive::String(s) => serde_json::Value::String(s.clone()),
            Primitive::U128(n) => serde_json::Number::from_u128(*n)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(n.to_string())),
            Primitive::I128(n) => serde_json::Number::from_i128(*n)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(n.to_string())),
            Primitive::U256(bytes) | Primitive::I256(bytes) => {
                serde_json::Value::String(const_hex::encode_prefixed(bytes))
            }
        },

        ValueDef::Composite(composite) => {
            if let Some(bytes) = byte_array(composite) {
                if bytes.len() == 32 {
                    let account: [u8; 32] = bytes.as_slice().try_into().expect("length checked");
                    return serde_json::Value::String(AccountId32(account).to_string());
                }
                if bytes.len() >= 16 {
                    return serde_json::Value::String(const_hex::encode_prefixed(&bytes));
                }
            }

            match composite {
                // Newtype wrappers collapse to their inner value.
                Composite::Unnamed(values) if values.len() == 1 => scale_to_json(&values[0]),
                _ => composite_to_json(composite),
            }
        }

        ValueDef::Variant(variant) => {
            if variant.values.is_empty() {
                serde_json::Value::String(variant.name.clone())
            } else {
                let mut object = serde_json::Map::new();
                object.insert(variant.name.clone(), composite_to_json(&variant.values));
                serde_json::Value::Object(object)
            }
        }

        ValueDef::BitSequence(_) => serde_json::Value::Null,
    }
}

/// The bytes of an unnamed composite of u8 values, flattening one level of
/// newtype wrapping (account ids decode as a struct around `[u8; 32]`).
fn byte_array<T>(composite: &Composite<T>) -> Option<Vec<u8>> {
    let values = match composite {
        Composite::Unnamed(values) => values,
        Composite::Named(_) => return None,
    };

    if values.len() == 1 {
        if let ValueDef::Composite(inner) = &values[0].value {
            return byte_array(inner);
        }
    }

    values
        .iter()
        .map(|value| match &value.value {
            ValueDef::Primitive(Primitive::U128(n)) if *n <= u8::MAX as u128 => Some(*n as u8),
            _ => None,
        })
        .collect()
}

/// Error possibly returned by [SubxtNode] operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("cannot connect to node")]
    Connect(#[source] BoxError),

    #[error("node RPC call failed")]
    Rpc(#[source] subxt::ext::subxt_rpcs::Error),

    #[error("node has no head block")]
    MissingHead,

    #[error("cannot fetch block at hash {0}")]
    FetchBlock(H256, #[source] Box<subxt::Error>),

    #[error("cannot get extrinsics")]
    GetExtrinsics(#[source] Box<subxt::Error>),

    #[error("cannot get events")]
    GetEvents(#[source] Box<subxt::Error>),

    #[error("cannot get next event")]
    GetNextEvent(#[source] Box<subxt::Error>),

    #[error("cannot decode extrinsic")]
    DecodeExtrinsic(#[source] Box<subxt::Error>),

    #[error("cannot query storage")]
    Storage(#[source] Box<subxt::Error>),

    #[error("no timestamp extrinsic in block at height {0}")]
    MissingTimestamp(u64),

    #[error("no block at height {0}")]
    BlockNotFound(u64),

    #[error("invalid block hash {0}")]
    InvalidBlockHash(String),

    #[error("invalid SS58 address {0}")]
    InvalidAddress(String),

    #[error("cannot determine token decimals")]
    MissingTokenDecimals,

    #[error("operation cancelled")]
    Cancelled,
}

impl NodeError {
    /// Fatal errors are not retried: the input is at fault, not the
    /// connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NodeError::MissingTimestamp(_)
                | NodeError::InvalidBlockHash(_)
                | NodeError::InvalidAddress(_)
                | NodeError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subxt::ext::scale_value::Value;

    #[test]
    fn test_composite_to_json_named_fields() {
        let fields = Composite::Named(vec![
            ("amount".to_owned(), Value::u128(1_000_000_000_000_000_000)),
            ("memo".to_owned(), Value::string("hi")),
        ]);

        let json = composite_to_json(&fields);
        assert_eq!(json["amount"].to_string(), "1000000000000000000");
        assert_eq!(json["memo"], "hi");
    }

    #[test]
    fn test_account_ids_render_as_ss58() {
        let account_bytes = [7u8; 32];
        let inner = Value::unnamed_composite(
            account_bytes.iter().map(|&b| Value::u128(b as u128)),
        );
        let account = Value::unnamed_composite([inner]);
        let fields = Composite::Named(vec![("who".to_owned(), account)]);

        let json = composite_to_json(&fields);
        let rendered = json["who"].as_str().unwrap();
        assert_eq!(rendered, AccountId32(account_bytes).to_string());
    }

    #[test]
    fn test_signer_from_multi_address() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&[9u8; 32]);
        assert_eq!(
            account_from_address_bytes(&bytes),
            Some(AccountId32([9u8; 32]))
        );
        assert_eq!(account_from_address_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn test_address_extraction() {
        let transactions = vec![TransactionRecord {
            extrinsic_id: "5-0".into(),
            signer: "alice".into(),
            ..Default::default()
        }];
        let events = vec![
            EventRecord {
                event_idx: "5-0".into(),
                extrinsic_id: "5-0".into(),
                module_id: "Balances".into(),
                event_id: "Transfer".into(),
                attributes: serde_json::json!({ "from": "alice", "to": "bob", "amount": "1" }),
            },
            EventRecord {
                event_idx: "5-1".into(),
                extrinsic_id: "5-0".into(),
                module_id: "System".into(),
                event_id: "ExtrinsicSuccess".into(),
                attributes: serde_json::json!({ "who": "charlie" }),
            },
        ];

        // Signers and transfer participants count; non-transfer events do not.
        let addresses = extract_addresses(&transactions, &events);
        assert_eq!(addresses, vec!["alice".to_owned(), "bob".to_owned()]);
    }
}
