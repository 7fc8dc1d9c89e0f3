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

use crate::domain::BalanceSnapshot;

/// Storage abstraction for the `balance_series` projection.
#[trait_variant::make(Send)]
pub trait Storage
where
    Self: Clone + Send + Sync + 'static,
{
    async fn save_snapshots(
        &self,
        snapshots: &[BalanceSnapshot],
    ) -> Result<(), clickhouse::error::Error>;

    /// End timestamp of the latest processed period.
    async fn latest_period_end(&self) -> Result<Option<u64>, clickhouse::error::Error>;

    /// The most recent snapshot of (address, asset) from a period starting
    /// before the given timestamp.
    async fn previous_snapshot(
        &self,
        address: &str,
        asset: &str,
        before_period_start: u64,
    ) -> Result<Option<BalanceSnapshot>, clickhouse::error::Error>;

    /// Whether height-0 snapshots exist for the asset, gating genesis
    /// seeding.
    async fn has_genesis_snapshots(&self, asset: &str) -> Result<bool, clickhouse::error::Error>;
}
