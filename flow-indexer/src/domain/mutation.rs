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

use crate::domain::NetworkGraphStrategy;
use indexer_common::domain::{
    AssetType, CanonicalBlock, EventRecord, NATIVE_CONTRACT, Network, NewAsset,
    group_events_by_key, to_decimal_units,
};
use log::warn;
use rust_decimal::prelude::ToPrimitive;

/// Asset attribution of one event: native for plain balance events, the
/// token identity for asset-pallet transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub symbol: String,
    pub contract: String,
}

impl AssetInfo {
    pub fn native(network: Network) -> Self {
        Self {
            symbol: network.native_symbol().to_owned(),
            contract: NATIVE_CONTRACT.to_owned(),
        }
    }

    pub fn token(asset_id: &str) -> Self {
        Self {
            symbol: format!("TOKEN_{asset_id}"),
            contract: asset_id.to_owned(),
        }
    }

    pub fn is_native(&self) -> bool {
        self.contract == NATIVE_CONTRACT
    }
}

/// One idempotent graph mutation, executed inside the per-block
/// transaction. All upserts are MERGE-on-key in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphMutation {
    /// `Balances.Endowed`: create the Address node with its first activity.
    UpsertEndowed { account: String },

    /// A transfer: both Address nodes with activity updates and the `TO`
    /// edge keyed by `"<from>-<to>-<asset>-<contract>"`.
    UpsertTransfer {
        from: String,
        to: String,
        amount: f64,
        asset: AssetInfo,
        edge_id: String,
    },

    /// Torus `Torus0.AgentRegistered`: label the Address as agent.
    LabelAgent { address: String },

    /// Bittensor `SubtensorModule.NeuronRegistered`: label the owner, keep
    /// the Neuron node and the OWNS relationship.
    UpsertNeuron {
        network_id: String,
        neuron_id: String,
        owner: String,
    },

    /// Bittensor `SubtensorModule.NetworkAdded`: keep the Subnet node and,
    /// when the registering signer is known, the creator labeling.
    UpsertSubnet {
        network_id: String,
        creator: Option<String>,
    },
}

/// All mutations of one canonical block, in handler order (endowed before
/// transfers before network specifics), plus the token assets that must
/// exist in the dictionary before the graph is touched. Unknown or
/// malformed events are logged and ignored.
pub fn block_mutations(
    network: Network,
    block: &CanonicalBlock,
    strategy: &dyn NetworkGraphStrategy,
) -> (Vec<GraphMutation>, Vec<NewAsset>) {
    let events_by_key = group_events_by_key(&block.events);
    let mut mutations = Vec::new();
    let mut assets = Vec::new();

    for event in events_of(&events_by_key, "Balances.Endowed") {
        match event.attr_str("account") {
            Some(account) => mutations.push(GraphMutation::UpsertEndowed {
                account: account.to_owned(),
            }),
            None => warn!(event_idx = event.event_idx; "Balances.Endowed without account"),
        }
    }

    for event in events_of(&events_by_key, "Balances.Transfer") {
        match native_transfer(network, event) {
            Some(mutation) => mutations.push(mutation),
            None => warn!(event_idx = event.event_idx; "malformed Balances.Transfer"),
        }
    }

    for event in events_of(&events_by_key, "Assets.Transferred") {
        match token_transfer(block, event) {
            Some((mutation, asset)) => {
                assets.push(asset);
                mutations.push(mutation);
            }
            None => warn!(event_idx = event.event_idx; "malformed Assets.Transferred"),
        }
    }

    mutations.extend(strategy.extract(block, &events_by_key));

    (mutations, assets)
}

fn events_of<'a>(
    events_by_key: &'a std::collections::HashMap<String, Vec<&'a EventRecord>>,
    key: &str,
) -> impl Iterator<Item = &'a EventRecord> {
    events_by_key
        .get(key)
        .into_iter()
        .flatten()
        .copied()
}

fn native_transfer(network: Network, event: &EventRecord) -> Option<GraphMutation> {
    let from = event.attr_str("from")?.to_owned();
    let to = event.attr_str("to")?.to_owned();
    let amount = graph_amount(event.attr_u128("amount")?, network.native_decimals())?;
    let asset = AssetInfo::native(network);
    let edge_id = edge_id(&from, &to, &asset);

    Some(GraphMutation::UpsertTransfer {
        from,
        to,
        amount,
        asset,
        edge_id,
    })
}

/// Tokens default to 18 decimals until the asset dictionary knows better.
const TOKEN_DECIMALS: u32 = 18;

fn token_transfer(
    block: &CanonicalBlock,
    event: &EventRecord,
) -> Option<(GraphMutation, NewAsset)> {
    let asset_id = event.attr_display("asset_id")?;
    let from = event.attr_str("from")?.to_owned();
    let to = event.attr_str("to")?.to_owned();
    let amount = graph_amount(event.attr_u128("amount")?, TOKEN_DECIMALS)?;
    let asset = AssetInfo::token(&asset_id);
    let edge_id = edge_id(&from, &to, &asset);

    let new_asset = NewAsset {
        symbol: asset.symbol.clone(),
        contract: asset.contract.clone(),
        asset_type: AssetType::Token,
        decimals: TOKEN_DECIMALS,
        first_seen_block: block.height,
        first_seen_timestamp: block.timestamp,
        name: None,
        notes: None,
    };

    Some((
        GraphMutation::UpsertTransfer {
            from,
            to,
            amount,
            asset,
            edge_id,
        },
        new_asset,
    ))
}

pub fn edge_id(from: &str, to: &str, asset: &AssetInfo) -> String {
    format!("{from}-{to}-{}-{}", asset.symbol, asset.contract)
}

fn graph_amount(raw: u128, decimals: u32) -> Option<f64> {
    to_decimal_units(raw, decimals).ok()?.to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy_for;
    use serde_json::json;

    fn event(
        event_idx: &str,
        extrinsic_id: &str,
        key: &str,
        attributes: serde_json::Value,
    ) -> EventRecord {
        let (module_id, event_id) = key.split_once('.').unwrap();
        EventRecord {
            event_idx: event_idx.to_owned(),
            extrinsic_id: extrinsic_id.to_owned(),
            module_id: module_id.to_owned(),
            event_id: event_id.to_owned(),
            attributes,
        }
    }

    fn block(height: u64, events: Vec<EventRecord>) -> CanonicalBlock {
        CanonicalBlock {
            height,
            hash: format!("0x{height:x}"),
            timestamp: height * 8_000,
            events,
            ..Default::default()
        }
    }

    #[test]
    fn test_native_transfer_mutation() {
        let block = block(
            1_000,
            vec![event(
                "1000-1",
                "1000-0",
                "Balances.Transfer",
                json!({ "from": "A", "to": "B", "amount": "1000000000000000000" }),
            )],
        );

        let (mutations, assets) =
            block_mutations(Network::Torus, &block, strategy_for(Network::Torus));

        assert!(assets.is_empty());
        assert_eq!(mutations.len(), 1);
        assert_eq!(
            mutations[0],
            GraphMutation::UpsertTransfer {
                from: "A".into(),
                to: "B".into(),
                amount: 1.0,
                asset: AssetInfo::native(Network::Torus),
                edge_id: "A-B-TOR-native".into(),
            }
        );
    }

    #[test]
    fn test_token_transfer_requires_asset_row() {
        let block = block(
            2_000,
            vec![event(
                "2000-1",
                "2000-0",
                "Assets.Transferred",
                json!({ "asset_id": 7, "from": "A", "to": "B", "amount": "1000000000000000000" }),
            )],
        );

        let (mutations, assets) =
            block_mutations(Network::Polkadot, &block, strategy_for(Network::Polkadot));

        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].symbol, "TOKEN_7");
        assert_eq!(assets[0].contract, "7");
        assert_eq!(assets[0].first_seen_block, 2_000);

        assert_eq!(mutations.len(), 1);
        match &mutations[0] {
            GraphMutation::UpsertTransfer { asset, edge_id, .. } => {
                assert!(!asset.is_native());
                assert_eq!(edge_id, "A-B-TOKEN_7-7");
            }
            other => panic!("unexpected mutation {other:?}"),
        }
    }

    #[test]
    fn test_endowed_and_malformed_events() {
        let block = block(
            3_000,
            vec![
                event(
                    "3000-0",
                    "3000-0",
                    "Balances.Endowed",
                    json!({ "account": "A", "free_balance": "5" }),
                ),
                event("3000-1", "3000-0", "Balances.Transfer", json!({ "from": "A" })),
            ],
        );

        let (mutations, _) =
            block_mutations(Network::Torus, &block, strategy_for(Network::Torus));

        assert_eq!(
            mutations,
            vec![GraphMutation::UpsertEndowed { account: "A".into() }]
        );
    }
}
