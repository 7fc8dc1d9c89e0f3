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

use crate::domain::CanonicalBlock;
use std::error::Error as StdError;

/// Node abstraction: resilient RPC access to one chain endpoint. Workers own
/// their instances, they are never shared across components.
#[trait_variant::make(Send)]
pub trait Node
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    /// Latest block height known to the node.
    async fn current_height(&self) -> Result<u64, Self::Error>;

    /// One block with its body and events, fetched concurrently from two
    /// independent connections. `None` when the node has no block at the
    /// given height.
    async fn block_by_height(&self, height: u64) -> Result<Option<CanonicalBlock>, Self::Error>;

    /// Blocks in the inclusive range, fetched sequentially with cancellation
    /// between heights. A missing block inside the range is an error.
    async fn blocks_by_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<Vec<CanonicalBlock>, Self::Error>;

    /// Account balances at a specific block hash; on Torus networks staked
    /// balances are aggregated from the Torus0 staking map.
    async fn balances_at(
        &self,
        block_hash: &str,
        address: &str,
    ) -> Result<AccountBalances, Self::Error>;

    /// Token decimals, introspected from chain properties or metadata.
    async fn token_decimals(&self) -> Result<u32, Self::Error>;
}

/// Raw account balances in plancks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountBalances {
    pub free: u128,
    pub reserved: u128,
    pub staked: u128,
}

impl AccountBalances {
    pub fn total(&self) -> u128 {
        self.free
            .saturating_add(self.reserved)
            .saturating_add(self.staked)
    }
}
