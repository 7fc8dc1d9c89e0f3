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

use crate::domain::Period;
use indexer_common::domain::{AmountError, to_decimal_units};
use log::warn;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use thiserror::Error;

/// One row of `balance_series`: the balances of (address, asset) at the end
/// of one period, with deltas against the immediately preceding snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    pub period_start: u64,
    pub period_end: u64,
    pub block_height: u64,
    pub address: String,
    pub asset: String,
    pub free: Decimal,
    pub reserved: Decimal,
    pub staked: Decimal,
    pub total: Decimal,
    pub free_change: Option<Decimal>,
    pub reserved_change: Option<Decimal>,
    pub staked_change: Option<Decimal>,
    pub total_change: Option<Decimal>,
    pub total_percent_change: Option<f64>,
    pub version: u64,
}

impl BalanceSnapshot {
    /// Build a snapshot from raw chain balances, converting to decimal
    /// units. A negative balance is fatal; a total deviating from
    /// free + reserved + staked is corrected to the sum with a warning.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        period: Period,
        block_height: u64,
        address: &str,
        asset: &str,
        decimals: u32,
        free: u128,
        reserved: u128,
        staked: u128,
        total: u128,
        version: u64,
    ) -> Result<Self, SnapshotError> {
        let free = to_decimal_units(free, decimals)?;
        let reserved = to_decimal_units(reserved, decimals)?;
        let staked = to_decimal_units(staked, decimals)?;
        let mut total = to_decimal_units(total, decimals)?;

        for (name, value) in [
            ("free", free),
            ("reserved", reserved),
            ("staked", staked),
            ("total", total),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(SnapshotError::Negative {
                    address: address.to_owned(),
                    balance: name,
                    block_height,
                });
            }
        }

        let expected_total = free + reserved + staked;
        if total != expected_total {
            warn!(
                address,
                block_height,
                total:% = total,
                expected_total:% = expected_total;
                "total balance mismatch, correcting to sum"
            );
            total = expected_total;
        }

        Ok(Self {
            period_start: period.start,
            period_end: period.end,
            block_height,
            address: address.to_owned(),
            asset: asset.to_owned(),
            free,
            reserved,
            staked,
            total,
            free_change: None,
            reserved_change: None,
            staked_change: None,
            total_change: None,
            total_percent_change: None,
            version,
        })
    }

    /// Fill the delta fields against the preceding snapshot of the same
    /// (address, asset); without one the snapshot stays delta-less.
    pub fn with_deltas(mut self, previous: Option<&BalanceSnapshot>) -> Self {
        let Some(previous) = previous else {
            return self;
        };

        self.free_change = Some(self.free - previous.free);
        self.reserved_change = Some(self.reserved - previous.reserved);
        self.staked_change = Some(self.staked - previous.staked);
        let total_change = self.total - previous.total;
        self.total_change = Some(total_change);

        if !previous.total.is_zero() {
            self.total_percent_change = (total_change / previous.total * Decimal::ONE_HUNDRED)
                .to_f64();
        }

        self
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("negative {balance} balance for {address} at block {block_height}")]
    Negative {
        address: String,
        balance: &'static str,
        block_height: u64,
    },

    #[error(transparent)]
    Amount(#[from] AmountError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period() -> Period {
        Period {
            start: 0,
            end: 14_400_000,
        }
    }

    fn snapshot(free: u128, total: u128) -> BalanceSnapshot {
        BalanceSnapshot::from_raw(period(), 100, "A", "TOR", 0, free, 0, 0, total, 1).unwrap()
    }

    #[test]
    fn test_total_mismatch_is_corrected() {
        let snapshot = snapshot(5, 9);
        assert_eq!(snapshot.total, Decimal::from(5));
    }

    #[test]
    fn test_deltas_and_percent_change() {
        let first = snapshot(5, 5);
        let second = snapshot(3, 3).with_deltas(Some(&first));

        assert_eq!(second.total_change, Some(Decimal::from(-2)));
        assert_eq!(second.free_change, Some(Decimal::from(-2)));
        assert_eq!(second.total_percent_change, Some(-40.0));
    }

    #[test]
    fn test_first_snapshot_has_no_deltas() {
        let first = snapshot(5, 5).with_deltas(None);
        assert_eq!(first.total_change, None);
        assert_eq!(first.total_percent_change, None);
    }

    #[test]
    fn test_zero_previous_total_has_no_percent() {
        let first = snapshot(0, 0);
        let second = snapshot(3, 3).with_deltas(Some(&first));

        assert_eq!(second.total_change, Some(Decimal::from(3)));
        assert_eq!(second.total_percent_change, None);
    }

    #[test]
    fn test_decimal_conversion() {
        let snapshot = BalanceSnapshot::from_raw(
            period(),
            100,
            "A",
            "TOR",
            18,
            1_500_000_000_000_000_000,
            0,
            500_000_000_000_000_000,
            2_000_000_000_000_000_000,
            1,
        )
        .unwrap();

        assert_eq!(snapshot.free.to_string(), "1.500000000000000000");
        assert_eq!(snapshot.staked.to_string(), "0.500000000000000000");
        assert_eq!(snapshot.total, Decimal::from(2));
    }
}
