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

/// Storage abstraction for the `balance_transfers` projection.
#[trait_variant::make(Send)]
pub trait Storage
where
    Self: Clone + Send + Sync + 'static,
{
    /// Idempotent bulk insert keyed by (extrinsic_id, event_idx).
    async fn save_transfers(
        &self,
        transfers: &[BalanceTransfer],
    ) -> Result<(), clickhouse::error::Error>;

    /// The progress marker: highest block height with recorded transfers.
    async fn latest_processed_height(&self) -> Result<Option<u64>, clickhouse::error::Error>;
}
