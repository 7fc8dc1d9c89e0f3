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
            "transfers_indexer_rows_written_total",
            "Number of balance transfer rows written"
        );
        describe_counter!(
            "transfers_indexer_batch_errors_total",
            "Number of failed transfer batches"
        );
        describe_gauge!(
            "transfers_indexer_last_processed_height",
            "Highest block height with extracted transfers"
        );
        describe_histogram!(
            "transfers_indexer_batch_seconds",
            "Wall time per processed batch"
        );

        Self {
            network: network.as_str(),
        }
    }

    pub fn batch_indexed(&self, transfers: usize, last_height: u64, elapsed: Duration) {
        counter!("transfers_indexer_rows_written_total", "network" => self.network)
            .increment(transfers as u64);
        gauge!("transfers_indexer_last_processed_height", "network" => self.network)
            .set(last_height as f64);
        histogram!("transfers_indexer_batch_seconds", "network" => self.network)
            .record(elapsed.as_secs_f64());
    }

    pub fn batch_error(&self) {
        counter!("transfers_indexer_batch_errors_total", "network" => self.network).increment(1);
    }
}
