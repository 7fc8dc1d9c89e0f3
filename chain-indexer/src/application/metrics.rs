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

use indexer_common::domain::Network;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

pub struct Metrics {
    network: &'static str,
}

impl Metrics {
    pub fn new(network: Network) -> Self {
        describe_counter!(
            "chain_indexer_blocks_indexed_total",
            "Number of blocks written to block_stream"
        );
        describe_counter!(
            "chain_indexer_storage_errors_total",
            "Number of failed block_stream inserts"
        );
        describe_gauge!(
            "chain_indexer_last_indexed_height",
            "Highest block height written by this worker"
        );
        describe_histogram!(
            "chain_indexer_batch_seconds",
            "Wall time per fetched and written batch"
        );

        Self {
            network: network.as_str(),
        }
    }

    pub fn batch_indexed(&self, blocks: usize, last_height: u64, elapsed: Duration) {
        counter!("chain_indexer_blocks_indexed_total", "network" => self.network)
            .increment(blocks as u64);
        gauge!("chain_indexer_last_indexed_height", "network" => self.network)
            .set(last_height as f64);
        histogram!("chain_indexer_batch_seconds", "network" => self.network)
            .record(elapsed.as_secs_f64());
    }

    pub fn storage_error(&self) {
        counter!("chain_indexer_storage_errors_total", "network" => self.network).increment(1);
    }
}
