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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Extrinsic status as stored in the canonical block stream.
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

/// Event key of the failure marker that voids all transfers of an extrinsic.
pub const EXTRINSIC_FAILED: &str = "System.ExtrinsicFailed";

/// A canonical block as stored in and read back from `block_stream`. This is
/// the single shape all projections consume; it can be rebuilt from the
/// columnar store alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalBlock {
    pub height: u64,
    pub hash: String,
    /// Milliseconds since Unix epoch, from the `now` argument of the block's
    /// timestamp extrinsic.
    pub timestamp: u64,
    pub transactions: Vec<TransactionRecord>,
    pub events: Vec<EventRecord>,
    /// Union of all signers and addresses referenced by transfer-like events.
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// `"<height>-<index-within-block>"`, unpadded.
    pub extrinsic_id: String,
    pub extrinsic_hash: String,
    /// SS58 signer address, empty for unsigned extrinsics.
    pub signer: String,
    pub call_module: String,
    pub call_function: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// `"<height>-<event-index>"`.
    pub event_idx: String,
    /// `"<height>-<extrinsic-index>"`, empty when the event is not tied to an
    /// extrinsic (initialization/finalization phase).
    pub extrinsic_id: String,
    pub module_id: String,
    pub event_id: String,
    /// Decoded event attributes: an object for named fields, an array for
    /// tuple-style events.
    pub attributes: serde_json::Value,
}

impl EventRecord {
    /// `"<module>.<event>"`, the key used by all event dispatch.
    pub fn key(&self) -> String {
        format!("{}.{}", self.module_id, self.event_id)
    }

    pub fn is(&self, key: &str) -> bool {
        key.split_once('.')
            .is_some_and(|(module, event)| self.module_id == module && self.event_id == event)
    }

    /// Index of the owning extrinsic within its block, parsed from
    /// `extrinsic_id`.
    pub fn extrinsic_index(&self) -> Option<u64> {
        self.extrinsic_id
            .split_once('-')
            .and_then(|(_, index)| index.parse().ok())
    }

    /// Block height parsed from `event_idx`.
    pub fn block_height(&self) -> Option<u64> {
        self.event_idx
            .split_once('-')
            .and_then(|(height, _)| height.parse().ok())
    }

    /// A named string attribute, e.g. `from` of a transfer.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|value| value.as_str())
    }

    /// A named amount attribute. Amounts arrive either as JSON numbers
    /// (arbitrary precision) or as decimal strings.
    pub fn attr_u128(&self, name: &str) -> Option<u128> {
        self.attributes.get(name).and_then(json_to_u128)
    }

    /// A named attribute rendered to a plain string, numbers included; used
    /// for identifiers that arrive either way, e.g. crowdloan fund indices.
    pub fn attr_display(&self, name: &str) -> Option<String> {
        match self.attributes.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// A positional string attribute for tuple-style events.
    pub fn attr_str_at(&self, index: usize) -> Option<&str> {
        self.attributes.get(index).and_then(|value| value.as_str())
    }

    /// A positional attribute rendered to a plain string (numbers included),
    /// e.g. the subnet id of `SubtensorModule.NetworkAdded`.
    pub fn attr_display_at(&self, index: usize) -> Option<String> {
        match self.attributes.get(index)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub fn json_to_u128(value: &serde_json::Value) -> Option<u128> {
    match value {
        serde_json::Value::Number(number) => number.to_string().parse().ok(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Events of one extrinsic, in appearance order.
#[derive(Debug)]
pub struct ExtrinsicGroup<'a> {
    pub extrinsic_index: Option<u64>,
    pub events: Vec<&'a EventRecord>,
}

impl<'a> ExtrinsicGroup<'a> {
    pub fn contains(&self, key: &str) -> bool {
        self.events.iter().any(|event| event.is(key))
    }

    pub fn of_type(&self, key: &str) -> impl Iterator<Item = &'a EventRecord> + '_ {
        let key = key.to_owned();
        self.events
            .iter()
            .copied()
            .filter(move |event| event.is(&key))
    }
}

/// Group events by extrinsic index, preserving the order in which extrinsics
/// first appear. Events without an extrinsic form their own group.
pub fn group_events_by_extrinsic(events: &[EventRecord]) -> Vec<ExtrinsicGroup<'_>> {
    let mut groups: Vec<ExtrinsicGroup<'_>> = Vec::new();
    let mut positions: HashMap<Option<u64>, usize> = HashMap::new();

    for event in events {
        let extrinsic_index = event.extrinsic_index();
        match positions.get(&extrinsic_index) {
            Some(&position) => groups[position].events.push(event),
            None => {
                positions.insert(extrinsic_index, groups.len());
                groups.push(ExtrinsicGroup {
                    extrinsic_index,
                    events: vec![event],
                });
            }
        }
    }

    groups
}

/// Group events by `"<module>.<event>"` key, preserving per-key order.
pub fn group_events_by_key(events: &[EventRecord]) -> HashMap<String, Vec<&EventRecord>> {
    let mut grouped: HashMap<String, Vec<&EventRecord>> = HashMap::new();
    for event in events {
        grouped.entry(event.key()).or_default().push(event);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_idx: &str, extrinsic_id: &str, key: &str, attributes: serde_json::Value) -> EventRecord {
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
    fn test_attr_accessors() {
        let transfer = event(
            "1000-1",
            "1000-0",
            "Balances.Transfer",
            json!({ "from": "alice", "to": "bob", "amount": "340282366920938463463374607431768211455" }),
        );

        assert_eq!(transfer.attr_str("from"), Some("alice"));
        assert_eq!(transfer.attr_u128("amount"), Some(u128::MAX));
        assert_eq!(transfer.extrinsic_index(), Some(0));
        assert_eq!(transfer.block_height(), Some(1000));
        assert!(transfer.is("Balances.Transfer"));
        assert!(!transfer.is("Balances.Endowed"));
    }

    #[test]
    fn test_numeric_amounts() {
        let transfer = event("5-0", "5-0", "Balances.Transfer", json!({ "amount": 42 }));
        assert_eq!(transfer.attr_u128("amount"), Some(42));
    }

    #[test]
    fn test_positional_attributes() {
        let registered = event(
            "7-3",
            "7-1",
            "SubtensorModule.NeuronRegistered",
            json!([12, 345, "owner-address"]),
        );

        assert_eq!(registered.attr_display_at(0).as_deref(), Some("12"));
        assert_eq!(registered.attr_str_at(2), Some("owner-address"));
    }

    #[test]
    fn test_group_by_extrinsic_preserves_order() {
        let events = vec![
            event("9-0", "9-1", "Balances.Transfer", json!({})),
            event("9-1", "9-0", "System.ExtrinsicSuccess", json!({})),
            event("9-2", "9-1", "TransactionPayment.TransactionFeePaid", json!({})),
            event("9-3", "", "Balances.Endowed", json!({})),
        ];

        let groups = group_events_by_extrinsic(&events);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].extrinsic_index, Some(1));
        assert_eq!(groups[0].events.len(), 2);
        assert_eq!(groups[1].extrinsic_index, Some(0));
        assert_eq!(groups[2].extrinsic_index, None);
        assert!(groups[0].contains("TransactionPayment.TransactionFeePaid"));
    }
}
