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
            "series_indexer_snapshots_written_total",
            "Number of balance snapshots written"
        );
        describe_counter!(
            "series_indexer_period_errors_total",
            "Number of failed period runs"
        );
        describe_gauge!(
            "series_indexer_last_period_end",
            "End timestamp of the latest processed period"
        );
        describe_histogram!(
            "series_indexer_period_seconds",
            "Wall time per processed period"
        );

        Self {
            network: network.as_str(),
        }
    }

    pub fn period_processed(&self, snapshots: usize, period_end: u64, elapsed: Duration) {
        counter!("series_indexer_snapshots_written_total", "network" => self.network)
            .increment(snapshots as u64);
        gauge!("series_indexer_last_period_end", "network" => self.network)
            .set(period_end as f64);
        histogram!("series_indexer_period_seconds", "network" => self.network)
            .record(elapsed.as_secs_f64());
    }

    pub fn period_error(&self) {
        counter!("series_indexer_period_errors_total", "network" => self.network).increment(1);
    }
}
