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

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Initialize logging via logforth; the level is controlled by `RUST_LOG`.
pub fn init_logging() {
    logforth::starter_log::stdout().apply();
}

/// Install the Prometheus exporter listening on the given port.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    PrometheusBuilder::new().with_http_listener(address).install()
}
