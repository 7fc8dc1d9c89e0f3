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

use crate::domain::GraphMutation;
use indexer_common::domain::{CanonicalBlock, EventRecord, Network};
use log::warn;
use std::collections::HashMap;

/// Per-network graph handling of events the common path does not know,
/// applied after the common endowed/transfer handlers.
pub trait NetworkGraphStrategy: Send + Sync {
    fn extract(
        &self,
        block: &CanonicalBlock,
        events_by_key: &HashMap<String, Vec<&EventRecord>>,
    ) -> Vec<GraphMutation>;
}

pub fn strategy_for(network: Network) -> &'static dyn NetworkGraphStrategy {
    match network {
        Network::Torus | Network::TorusTestnet => &TorusStrategy,
        Network::Bittensor | Network::BittensorTestnet => &BittensorStrategy,
        Network::Polkadot => &PolkadotStrategy,
    }
}

struct TorusStrategy;

impl NetworkGraphStrategy for TorusStrategy {
    fn extract(
        &self,
        _block: &CanonicalBlock,
        events_by_key: &HashMap<String, Vec<&EventRecord>>,
    ) -> Vec<GraphMutation> {
        let mut mutations = Vec::new();

        for event in events_of(events_by_key, "Torus0.AgentRegistered") {
            // The event payload is either the bare agent address or an
            // object carrying it.
            let address = event
                .attributes
                .as_str()
                .map(str::to_owned)
                .or_else(|| event.attr_str("agent").map(str::to_owned));

            match address {
                Some(address) => mutations.push(GraphMutation::LabelAgent { address }),
                None => warn!(event_idx = event.event_idx; "AgentRegistered without agent address"),
            }
        }

        mutations
    }
}

struct BittensorStrategy;

impl NetworkGraphStrategy for BittensorStrategy {
    fn extract(
        &self,
        block: &CanonicalBlock,
        events_by_key: &HashMap<String, Vec<&EventRecord>>,
    ) -> Vec<GraphMutation> {
        let mut mutations = Vec::new();

        for event in events_of(events_by_key, "SubtensorModule.NeuronRegistered") {
            // Named attributes on newer runtimes, positional on older ones.
            let network_id = event
                .attr_display("netuid")
                .or_else(|| event.attr_display_at(0));
            let neuron_id = event
                .attr_display("uid")
                .or_else(|| event.attr_display_at(1));
            let owner = event
                .attr_str("hotkey")
                .map(str::to_owned)
                .or_else(|| event.attr_str_at(2).map(str::to_owned));

            match (network_id, neuron_id, owner) {
                (Some(network_id), Some(neuron_id), Some(owner)) => {
                    mutations.push(GraphMutation::UpsertNeuron {
                        network_id,
                        neuron_id,
                        owner,
                    });
                }
                _ => warn!(event_idx = event.event_idx; "malformed NeuronRegistered"),
            }
        }

        for event in events_of(events_by_key, "SubtensorModule.NetworkAdded") {
            let network_id = event
                .attr_display("netuid")
                .or_else(|| event.attr_display_at(0));

            let Some(network_id) = network_id else {
                warn!(event_idx = event.event_idx; "malformed NetworkAdded");
                continue;
            };

            // The creator is the signer of the registering extrinsic; skip
            // the labeling when the event is not tied to a signed one.
            let creator = block
                .transactions
                .iter()
                .find(|transaction| transaction.extrinsic_id == event.extrinsic_id)
                .map(|transaction| transaction.signer.clone())
                .filter(|signer| !signer.is_empty());

            mutations.push(GraphMutation::UpsertSubnet {
                network_id,
                creator,
            });
        }

        mutations
    }
}

struct PolkadotStrategy;

impl NetworkGraphStrategy for PolkadotStrategy {
    fn extract(
        &self,
        _block: &CanonicalBlock,
        _events_by_key: &HashMap<String, Vec<&EventRecord>>,
    ) -> Vec<GraphMutation> {
        Vec::new()
    }
}

fn events_of<'a>(
    events_by_key: &'a HashMap<String, Vec<&'a EventRecord>>,
    key: &str,
) -> impl Iterator<Item = &'a EventRecord> {
    events_by_key.get(key).into_iter().flatten().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_common::domain::{TransactionRecord, group_events_by_key};
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

    #[test]
    fn test_torus_agent_label_from_bare_payload() {
        let events = vec![event(
            "5-0",
            "5-0",
            "Torus0.AgentRegistered",
            json!("agent-address"),
        )];
        let block = CanonicalBlock {
            height: 5,
            events: events.clone(),
            ..Default::default()
        };

        let mutations = strategy_for(Network::Torus).extract(&block, &group_events_by_key(&events));
        assert_eq!(
            mutations,
            vec![GraphMutation::LabelAgent {
                address: "agent-address".into()
            }]
        );
    }

    #[test]
    fn test_bittensor_neuron_registration_positional() {
        let events = vec![event(
            "6-0",
            "6-1",
            "SubtensorModule.NeuronRegistered",
            json!([12, 345, "owner-addr"]),
        )];
        let block = CanonicalBlock {
            height: 6,
            events: events.clone(),
            ..Default::default()
        };

        let mutations =
            strategy_for(Network::Bittensor).extract(&block, &group_events_by_key(&events));
        assert_eq!(
            mutations,
            vec![GraphMutation::UpsertNeuron {
                network_id: "12".into(),
                neuron_id: "345".into(),
                owner: "owner-addr".into(),
            }]
        );
    }

    #[test]
    fn test_bittensor_subnet_creator_from_signer() {
        let events = vec![event(
            "7-0",
            "7-2",
            "SubtensorModule.NetworkAdded",
            json!([3, 3]),
        )];
        let block = CanonicalBlock {
            height: 7,
            transactions: vec![TransactionRecord {
                extrinsic_id: "7-2".into(),
                signer: "creator-addr".into(),
                ..Default::default()
            }],
            events: events.clone(),
            ..Default::default()
        };

        let mutations =
            strategy_for(Network::Bittensor).extract(&block, &group_events_by_key(&events));
        assert_eq!(
            mutations,
            vec![GraphMutation::UpsertSubnet {
                network_id: "3".into(),
                creator: Some("creator-addr".into()),
            }]
        );
    }

    #[test]
    fn test_subnet_without_signer_skips_creator() {
        let events = vec![event(
            "8-0",
            "",
            "SubtensorModule.NetworkAdded",
            json!([4, 4]),
        )];
        let block = CanonicalBlock {
            height: 8,
            events: events.clone(),
            ..Default::default()
        };

        let mutations =
            strategy_for(Network::Bittensor).extract(&block, &group_events_by_key(&events));
        assert_eq!(
            mutations,
            vec![GraphMutation::UpsertSubnet {
                network_id: "4".into(),
                creator: None,
            }]
        );
    }
}
