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
            "flow_indexer_mutations_applied_total",
            "Number of graph mutations applied"
        );
        describe_counter!(
            "flow_indexer_blocks_skipped_total",
            "Number of blocks skipped via the global state marker"
        );
        describe_counter!(
            "flow_indexer_analytics_runs_total",
            "Number of completed periodic analytics cycles"
        );
        describe_gauge!(
            "flow_indexer_last_block_height",
            "GlobalState block height of the graph"
        );
        describe_histogram!(
            "flow_indexer_block_seconds",
            "Wall time per indexed block"
        );
        describe_histogram!(
            "flow_indexer_analytics_seconds",
            "Wall time per analytics cycle"
        );

        Self {
            network: network.as_str(),
        }
    }

    pub fn block_indexed(&self, mutations: usize, block_height: u64, elapsed: Duration) {
        counter!("flow_indexer_mutations_applied_total", "network" => self.network)
            .increment(mutations as u64);
        gauge!("flow_indexer_last_block_height", "network" => self.network)
            .set(block_height as f64);
        histogram!("flow_indexer_block_seconds", "network" => self.network)
            .record(elapsed.as_secs_f64());
    }

    pub fn block_skipped(&self) {
        counter!("flow_indexer_blocks_skipped_total", "network" => self.network).increment(1);
    }

    pub fn analytics_run(&self, elapsed: Duration) {
        counter!("flow_indexer_analytics_runs_total", "network" => self.network).increment(1);
        histogram!("flow_indexer_analytics_seconds", "network" => self.network)
            .record(elapsed.as_secs_f64());
    }
}
