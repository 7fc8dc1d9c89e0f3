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

use crate::domain::RangeStats;
use indexer_common::domain::CanonicalBlock;

/// Storage abstraction for the canonical `block_stream`.
#[trait_variant::make(Send)]
pub trait Storage
where
    Self: Clone + Send + Sync + 'static,
{
    /// Idempotent bulk insert keyed by block height; a later re-ingest of
    /// the same height merge-collapses on read.
    async fn save_blocks(&self, blocks: &[CanonicalBlock]) -> Result<(), clickhouse::error::Error>;

    /// The highest indexed height, `None` for an empty store.
    async fn latest_height(&self) -> Result<Option<u64>, clickhouse::error::Error>;

    /// Count and bounds of indexed heights within the inclusive range.
    async fn range_stats(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<RangeStats, clickhouse::error::Error>;
}
