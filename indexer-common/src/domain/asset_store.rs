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

use crate::domain::{Asset, AssetVerification, NewAsset};

/// Asset dictionary abstraction. Every projection must ensure an asset row
/// exists before referencing it; a failure here is fatal to the calling
/// batch.
#[trait_variant::make(Send)]
pub trait AssetStore
where
    Self: Clone + Send + Sync + 'static,
{
    /// Idempotently insert the network's native asset with verified status.
    async fn init_native_asset(&self) -> Result<(), clickhouse::error::Error>;

    /// Make sure the given asset exists, inserting it with unknown
    /// verification on first sight. Returns whether a row was created.
    async fn ensure_asset_exists(&self, asset: NewAsset) -> Result<bool, clickhouse::error::Error>;

    /// Read an asset row by contract, populating the cache.
    async fn asset_info(&self, contract: &str) -> Result<Option<Asset>, clickhouse::error::Error>;

    /// Update the verification status of an asset.
    async fn update_verification(
        &self,
        contract: &str,
        verification: AssetVerification,
        updated_by: &str,
        notes: Option<&str>,
    ) -> Result<(), clickhouse::error::Error>;

    /// Invalidate the in-memory cache.
    fn clear_cache(&self);
}
