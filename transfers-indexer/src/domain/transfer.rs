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

use rust_decimal::Decimal;

/// One row of `balance_transfers`, keyed by (extrinsic_id, event_idx).
/// `version` is the block height, so a replay merge-collapses to the same
/// logical row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceTransfer {
    pub extrinsic_id: String,
    pub event_idx: String,
    pub block_height: u64,
    pub block_timestamp: u64,
    pub from_address: String,
    pub to_address: String,
    pub asset: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub version: u64,
}
