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
use serde::{Deserialize, Serialize};

/// Reference to a canonical block without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u64,
    pub hash: String,
    pub timestamp: u64,
}

/// Read access to the canonical `block_stream`, shared by all projections.
/// Projections never read from the node directly.
#[trait_variant::make(Send)]
pub trait BlockSource
where
    Self: Clone + Send + Sync + 'static,
{
    /// The highest indexed block height, `None` for an empty store.
    async fn latest_height(&self) -> Result<Option<u64>, clickhouse::error::Error>;

    /// Blocks within the inclusive height range, reconstructed from the
    /// columnar store, in height order. With `only_with_addresses`, blocks
    /// without address interactions are filtered out.
    async fn blocks_by_range(
        &self,
        start_height: u64,
        end_height: u64,
        only_with_addresses: bool,
    ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error>;

    /// Blocks whose timestamp falls into `[start_timestamp, end_timestamp)`,
    /// in height order.
    async fn blocks_by_timestamp_range(
        &self,
        start_timestamp: u64,
        end_timestamp: u64,
        only_with_addresses: bool,
    ) -> Result<Vec<CanonicalBlock>, clickhouse::error::Error>;

    /// The block whose timestamp is nearest to but not after the given
    /// timestamp (milliseconds).
    async fn block_by_nearest_timestamp(
        &self,
        timestamp: u64,
    ) -> Result<Option<BlockRef>, clickhouse::error::Error>;

    /// The earliest non-zero block timestamp, anchoring the first period of
    /// time-gridded consumers.
    async fn earliest_timestamp(&self) -> Result<Option<u64>, clickhouse::error::Error>;
}
