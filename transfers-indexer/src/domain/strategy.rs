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

use crate::domain::BalanceTransfer;
use indexer_common::domain::{
    AmountError, CanonicalBlock, EXTRINSIC_FAILED, EventRecord, ExtrinsicGroup, Network,
    group_events_by_extrinsic, to_decimal_units,
};
use log::warn;
use rust_decimal::Decimal;
use thiserror::Error;

/// Block-level context handed to extraction.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    pub network: Network,
    pub block_height: u64,
    pub block_timestamp: u64,
}

impl BlockContext {
    fn native_amount(&self, raw: u128) -> Result<Decimal, ExtractError> {
        Ok(to_decimal_units(raw, self.network.native_decimals())?)
    }
}

/// Per-network extraction of pseudo-transfers (staking, treasury, crowdloan
/// and friends), applied to each extrinsic group after the common transfer
/// extraction. Malformed network-specific events are logged and skipped.
pub trait NetworkStrategy: Send + Sync {
    fn extract(
        &self,
        context: &BlockContext,
        group: &ExtrinsicGroup<'_>,
    ) -> Result<Vec<BalanceTransfer>, ExtractError>;
}

pub fn strategy_for(network: Network) -> &'static dyn NetworkStrategy {
    match network {
        Network::Torus | Network::TorusTestnet => &TorusStrategy,
        Network::Bittensor | Network::BittensorTestnet => &BittensorStrategy,
        Network::Polkadot => &PolkadotStrategy,
    }
}

/// Extract all balance transfers of one canonical block: common
/// `Balances.Transfer` rows with fee attribution, plus the network-specific
/// emissions. Extrinsic groups containing a failure event yield nothing.
pub fn extract_transfers(
    context: &BlockContext,
    block: &CanonicalBlock,
    strategy: &dyn NetworkStrategy,
) -> Result<Vec<BalanceTransfer>, ExtractError> {
    let mut transfers = Vec::new();

    for group in group_events_by_extrinsic(&block.events) {
        if group.contains(EXTRINSIC_FAILED) {
            continue;
        }

        for event in group.of_type("Balances.Transfer") {
            let from_address = require_str(event, "from")?;
            let to_address = require_str(event, "to")?;
            let amount = context.native_amount(require_u128(event, "amount")?)?;
            let fee = fee_for_sender(context, &group, from_address)?;

            transfers.push(BalanceTransfer {
                extrinsic_id: event.extrinsic_id.clone(),
                event_idx: event.event_idx.clone(),
                block_height: context.block_height,
                block_timestamp: context.block_timestamp,
                from_address: from_address.to_owned(),
                to_address: to_address.to_owned(),
                asset: context.network.native_symbol().to_owned(),
                amount,
                fee,
                version: context.block_height,
            });
        }

        transfers.extend(strategy.extract(context, &group)?);
    }

    Ok(transfers)
}

/// Fee of a transfer: the `TransactionPayment.TransactionFeePaid` event of
/// the same extrinsic whose `who` equals the sender, as actual fee plus tip.
/// Without a matching fee event the fee is zero.
fn fee_for_sender(
    context: &BlockContext,
    group: &ExtrinsicGroup<'_>,
    sender: &str,
) -> Result<Decimal, ExtractError> {
    for event in group.of_type("TransactionPayment.TransactionFeePaid") {
        let who = require_str(event, "who")?;
        if who != sender {
            continue;
        }

        let actual_fee = context.native_amount(require_u128(event, "actual_fee")?)?;
        let tip = context.native_amount(event.attr_u128("tip").unwrap_or(0))?;
        return Ok(actual_fee + tip);
    }

    Ok(Decimal::ZERO)
}

struct TorusStrategy;

impl NetworkStrategy for TorusStrategy {
    fn extract(
        &self,
        context: &BlockContext,
        group: &ExtrinsicGroup<'_>,
    ) -> Result<Vec<BalanceTransfer>, ExtractError> {
        let mut transfers = Vec::new();

        for event in group.of_type("Staking.Reward") {
            match pseudo_transfer(context, event, "system", event.attr_str("stash"), "amount") {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping Staking.Reward event"),
            }
        }

        for event in group.of_type("Treasury.Awarded") {
            match pseudo_transfer(context, event, "treasury", event.attr_str("account"), "award") {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping Treasury.Awarded event"),
            }
        }

        Ok(transfers)
    }
}

struct BittensorStrategy;

impl NetworkStrategy for BittensorStrategy {
    fn extract(
        &self,
        context: &BlockContext,
        group: &ExtrinsicGroup<'_>,
    ) -> Result<Vec<BalanceTransfer>, ExtractError> {
        let mut transfers = Vec::new();

        // Stake movements between coldkey and hotkey are recorded as
        // transfers in the native asset.
        for event in group.of_type("SubtensorModule.StakeAdded") {
            let transfer = (|| {
                let coldkey = require_str(event, "coldkey")?;
                let hotkey = require_str(event, "hotkey")?;
                let amount = context.native_amount(require_u128(event, "amount_staked")?)?;
                Ok::<_, ExtractError>(make_transfer(context, event, coldkey, hotkey, amount))
            })();
            match transfer {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping StakeAdded event"),
            }
        }

        for event in group.of_type("SubtensorModule.StakeRemoved") {
            let transfer = (|| {
                let coldkey = require_str(event, "coldkey")?;
                let hotkey = require_str(event, "hotkey")?;
                let amount = context.native_amount(require_u128(event, "amount_unstaked")?)?;
                Ok::<_, ExtractError>(make_transfer(context, event, hotkey, coldkey, amount))
            })();
            match transfer {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping StakeRemoved event"),
            }
        }

        for event in group.of_type("SubtensorModule.EmissionReceived") {
            match pseudo_transfer(context, event, "emission", event.attr_str("hotkey"), "amount") {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping EmissionReceived event"),
            }
        }

        Ok(transfers)
    }
}

struct PolkadotStrategy;

impl NetworkStrategy for PolkadotStrategy {
    fn extract(
        &self,
        context: &BlockContext,
        group: &ExtrinsicGroup<'_>,
    ) -> Result<Vec<BalanceTransfer>, ExtractError> {
        let mut transfers = Vec::new();

        for event in group.of_type("Staking.Rewarded") {
            match pseudo_transfer(context, event, "staking", event.attr_str("stash"), "amount") {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping Staking.Rewarded event"),
            }
        }

        for event in group.of_type("Treasury.Awarded") {
            match pseudo_transfer(context, event, "treasury", event.attr_str("account"), "award") {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping Treasury.Awarded event"),
            }
        }

        // Contributions flow into a synthetic per-fund address.
        for event in group.of_type("Crowdloan.Contributed") {
            let transfer = (|| {
                let who = require_str(event, "who")?;
                let fund_index = event
                    .attr_display("fund_index")
                    .ok_or_else(|| ExtractError::missing(event, "fund_index"))?;
                let amount = context.native_amount(require_u128(event, "amount")?)?;
                Ok::<_, ExtractError>(make_transfer(
                    context,
                    event,
                    who,
                    &format!("crowdloan-{fund_index}"),
                    amount,
                ))
            })();
            match transfer {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping Crowdloan.Contributed event"),
            }
        }

        for event in group.of_type("Auctions.BidAccepted") {
            let transfer = (|| {
                let bidder = require_str(event, "bidder")?;
                let para_id = event
                    .attr_display("para_id")
                    .ok_or_else(|| ExtractError::missing(event, "para_id"))?;
                let amount = context.native_amount(require_u128(event, "amount")?)?;
                Ok::<_, ExtractError>(make_transfer(
                    context,
                    event,
                    bidder,
                    &format!("auction-{para_id}"),
                    amount,
                ))
            })();
            match transfer {
                Ok(transfer) => transfers.push(transfer),
                Err(error) => warn!(event_idx = event.event_idx, error:%; "skipping Auctions.BidAccepted event"),
            }
        }

        Ok(transfers)
    }
}

/// A fee-less transfer from a synthetic source (`system`, `treasury`,
/// `emission`, `staking`) to the recipient named by the given attribute.
fn pseudo_transfer(
    context: &BlockContext,
    event: &EventRecord,
    from: &str,
    to: Option<&str>,
    amount_attribute: &'static str,
) -> Result<BalanceTransfer, ExtractError> {
    let to = to.ok_or_else(|| ExtractError::missing(event, "recipient"))?;
    let amount = context.native_amount(require_u128(event, amount_attribute)?)?;
    Ok(make_transfer(context, event, from, to, amount))
}

fn make_transfer(
    context: &BlockContext,
    event: &EventRecord,
    from: &str,
    to: &str,
    amount: Decimal,
) -> BalanceTransfer {
    BalanceTransfer {
        extrinsic_id: event.extrinsic_id.clone(),
        event_idx: event.event_idx.clone(),
        block_height: context.block_height,
        block_timestamp: context.block_timestamp,
        from_address: from.to_owned(),
        to_address: to.to_owned(),
        asset: context.network.native_symbol().to_owned(),
        amount,
        fee: Decimal::ZERO,
        version: context.block_height,
    }
}

fn require_str<'a>(event: &'a EventRecord, name: &'static str) -> Result<&'a str, ExtractError> {
    event
        .attr_str(name)
        .ok_or_else(|| ExtractError::missing(event, name))
}

fn require_u128(event: &EventRecord, name: &'static str) -> Result<u128, ExtractError> {
    event
        .attr_u128(name)
        .ok_or_else(|| ExtractError::missing(event, name))
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("missing attribute {attribute} in event {event_idx} ({key})")]
    MissingAttribute {
        attribute: &'static str,
        event_idx: String,
        key: String,
    },

    #[error(transparent)]
    Amount(#[from] AmountError),
}

impl ExtractError {
    fn missing(event: &EventRecord, attribute: &'static str) -> Self {
        ExtractError::MissingAttribute {
            attribute,
            event_idx: event.event_idx.clone(),
            key: event.key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn context(network: Network, height: u64) -> BlockContext {
        BlockContext {
            network,
            block_height: height,
            block_timestamp: height * 8_000,
        }
    }

    #[test]
    fn test_native_transfer_with_decimals() {
        let block = block(
            1_000,
            vec![event(
                "1000-1",
                "1000-0",
                "Balances.Transfer",
                json!({ "from": "A", "to": "B", "amount": "1000000000000000000" }),
            )],
        );

        let transfers = extract_transfers(
            &context(Network::Torus, 1_000),
            &block,
            strategy_for(Network::Torus),
        )
        .unwrap();

        assert_eq!(transfers.len(), 1);
        let transfer = &transfers[0];
        assert_eq!(transfer.extrinsic_id, "1000-0");
        assert_eq!(transfer.event_idx, "1000-1");
        assert_eq!(transfer.amount, Decimal::ONE);
        assert_eq!(transfer.fee, Decimal::ZERO);
        assert_eq!(transfer.asset, "TOR");
        assert_eq!(transfer.version, 1_000);
    }

    #[test]
    fn test_fee_matches_sender_not_first_fee_event() {
        let block = block(
            7,
            vec![
                event(
                    "7-0",
                    "7-0",
                    "Balances.Transfer",
                    json!({ "from": "A", "to": "B", "amount": "10" }),
                ),
                event(
                    "7-1",
                    "7-0",
                    "TransactionPayment.TransactionFeePaid",
                    json!({ "who": "C", "actual_fee": "1" }),
                ),
                event(
                    "7-2",
                    "7-0",
                    "TransactionPayment.TransactionFeePaid",
                    json!({ "who": "A", "actual_fee": "2", "tip": "0" }),
                ),
            ],
        );

        let transfers = extract_transfers(
            &context(Network::Torus, 7),
            &block,
            strategy_for(Network::Torus),
        )
        .unwrap();

        assert_eq!(transfers.len(), 1);
        assert_eq!(
            transfers[0].fee,
            to_decimal_units(2, Network::Torus.native_decimals()).unwrap()
        );
    }

    #[test]
    fn test_no_matching_fee_event_means_zero_fee() {
        let block = block(
            8,
            vec![
                event(
                    "8-0",
                    "8-0",
                    "Balances.Transfer",
                    json!({ "from": "A", "to": "B", "amount": "10" }),
                ),
                event(
                    "8-1",
                    "8-0",
                    "TransactionPayment.TransactionFeePaid",
                    json!({ "who": "C", "actual_fee": "5" }),
                ),
            ],
        );

        let transfers = extract_transfers(
            &context(Network::Torus, 8),
            &block,
            strategy_for(Network::Torus),
        )
        .unwrap();

        assert_eq!(transfers[0].fee, Decimal::ZERO);
    }

    #[test]
    fn test_failed_extrinsic_emits_nothing() {
        let block = block(
            9,
            vec![
                event(
                    "9-0",
                    "9-0",
                    "Balances.Transfer",
                    json!({ "from": "A", "to": "B", "amount": "10" }),
                ),
                event("9-1", "9-0", "System.ExtrinsicFailed", json!({})),
                event(
                    "9-2",
                    "9-1",
                    "Balances.Transfer",
                    json!({ "from": "C", "to": "D", "amount": "20" }),
                ),
            ],
        );

        let transfers = extract_transfers(
            &context(Network::Torus, 9),
            &block,
            strategy_for(Network::Torus),
        )
        .unwrap();

        // Only the transfer of the surviving extrinsic remains.
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].from_address, "C");
    }

    #[test]
    fn test_torus_staking_and_treasury_emissions() {
        let block = block(
            10,
            vec![
                event(
                    "10-0",
                    "10-0",
                    "Staking.Reward",
                    json!({ "stash": "S", "amount": "3" }),
                ),
                event(
                    "10-1",
                    "10-1",
                    "Treasury.Awarded",
                    json!({ "proposal_index": 1, "award": "4", "account": "T" }),
                ),
            ],
        );

        let transfers = extract_transfers(
            &context(Network::Torus, 10),
            &block,
            strategy_for(Network::Torus),
        )
        .unwrap();

        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].from_address, "system");
        assert_eq!(transfers[0].to_address, "S");
        assert_eq!(transfers[1].from_address, "treasury");
        assert_eq!(transfers[1].to_address, "T");
        assert!(transfers.iter().all(|transfer| transfer.fee == Decimal::ZERO));
    }

    #[test]
    fn test_bittensor_stake_directions() {
        let block = block(
            11,
            vec![
                event(
                    "11-0",
                    "11-0",
                    "SubtensorModule.StakeAdded",
                    json!({ "coldkey": "cold", "hotkey": "hot", "amount_staked": "5" }),
                ),
                event(
                    "11-1",
                    "11-1",
                    "SubtensorModule.StakeRemoved",
                    json!({ "coldkey": "cold", "hotkey": "hot", "amount_unstaked": "2" }),
                ),
                event(
                    "11-2",
                    "11-2",
                    "SubtensorModule.EmissionReceived",
                    json!({ "hotkey": "hot", "amount": "1" }),
                ),
            ],
        );

        let transfers = extract_transfers(
            &context(Network::Bittensor, 11),
            &block,
            strategy_for(Network::Bittensor),
        )
        .unwrap();

        assert_eq!(transfers.len(), 3);
        assert_eq!(
            (transfers[0].from_address.as_str(), transfers[0].to_address.as_str()),
            ("cold", "hot")
        );
        assert_eq!(
            (transfers[1].from_address.as_str(), transfers[1].to_address.as_str()),
            ("hot", "cold")
        );
        assert_eq!(
            (transfers[2].from_address.as_str(), transfers[2].to_address.as_str()),
            ("emission", "hot")
        );
        assert!(transfers.iter().all(|transfer| transfer.asset == "TAO"));
    }

    #[test]
    fn test_polkadot_crowdloan_and_auction_addresses() {
        let block = block(
            12,
            vec![
                event(
                    "12-0",
                    "12-0",
                    "Crowdloan.Contributed",
                    json!({ "who": "W", "fund_index": 33, "amount": "6" }),
                ),
                event(
                    "12-1",
                    "12-1",
                    "Auctions.BidAccepted",
                    json!({ "bidder": "B", "para_id": 2004, "amount": "7" }),
                ),
            ],
        );

        let transfers = extract_transfers(
            &context(Network::Polkadot, 12),
            &block,
            strategy_for(Network::Polkadot),
        )
        .unwrap();

        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].to_address, "crowdloan-33");
        assert_eq!(transfers[1].to_address, "auction-2004");
        assert!(transfers.iter().all(|transfer| transfer.asset == "DOT"));
    }

    #[test]
    fn test_malformed_network_event_is_skipped() {
        let block = block(
            13,
            vec![event(
                "13-0",
                "13-0",
                "Staking.Reward",
                json!({ "amount": "3" }),
            )],
        );

        let transfers = extract_transfers(
            &context(Network::Torus, 13),
            &block,
            strategy_for(Network::Torus),
        )
        .unwrap();

        assert!(transfers.is_empty());
    }

    #[test]
    fn test_malformed_common_transfer_is_an_error() {
        let block = block(
            14,
            vec![event(
                "14-0",
                "14-0",
                "Balances.Transfer",
                json!({ "from": "A", "amount": "3" }),
            )],
        );

        let result = extract_transfers(
            &context(Network::Torus, 14),
            &block,
            strategy_for(Network::Torus),
        );

        assert_matches::assert_matches!(
            result,
            Err(ExtractError::MissingAttribute { attribute: "to", .. })
        );
    }
}
