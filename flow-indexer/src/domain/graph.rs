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

use crate::domain::GraphMutation;
use tokio_util::sync::CancellationToken;

/// Graph store abstraction; exactly one writer exists per network.
#[trait_variant::make(Send)]
pub trait GraphStore
where
    Self: Clone + Send + Sync + 'static,
{
    /// Idempotently create node, edge, and vector indexes.
    async fn ensure_indexes(&self) -> Result<(), neo4rs::Error>;

    /// `GlobalState.block_height`, the single progress marker of the graph.
    async fn last_block_height(&self) -> Result<Option<u64>, neo4rs::Error>;

    /// Advance `GlobalState.block_height` without touching anything else,
    /// used when a height range contains no relevant blocks.
    async fn update_global_state(&self, block_height: u64) -> Result<(), neo4rs::Error>;

    /// Apply all mutations of one block in one transaction, guarded by the
    /// global state: a block at or below `GlobalState.block_height` is
    /// skipped entirely and `false` is returned.
    async fn index_block(
        &self,
        block_height: u64,
        timestamp: u64,
        mutations: &[GraphMutation],
    ) -> Result<bool, neo4rs::Error>;

    /// Community detection over the Address/TO subgraph; assigns
    /// `community_id` and keeps the Community nodes.
    async fn community_detection(&self) -> Result<(), neo4rs::Error>;

    /// Community-scoped PageRank over up to 3 TO hops, one community at a
    /// time, honouring cancellation between communities.
    async fn community_page_rank(&self, cancel: &CancellationToken) -> Result<(), neo4rs::Error>;

    /// Refresh unique sender/receiver counts from the edge structure.
    async fn update_calculated_properties(&self) -> Result<(), neo4rs::Error>;

    /// Rebuild the 6-dim network embedding of every Address.
    async fn update_embeddings(&self) -> Result<(), neo4rs::Error>;
}
