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

use clap::Parser;

/// Money flow consumer over the canonical block stream; the single writer
/// of the graph store.
#[derive(Debug, Parser)]
#[command(name = "flow-indexer")]
pub struct Cli {
    /// Network to build the money flow graph for (torus, torus_testnet,
    /// bittensor, bittensor_testnet, polkadot).
    #[arg(long)]
    pub network: String,

    /// Number of blocks to process per batch.
    #[arg(long, default_value_t = 256)]
    pub batch_size: u64,

    /// Seconds to sleep when caught up to the block stream.
    #[arg(long, default_value_t = 10)]
    pub sleep_time: u64,
}
