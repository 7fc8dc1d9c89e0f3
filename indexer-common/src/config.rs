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

use crate::domain::Network;
use figment::{Figment, providers::Env};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Extract a config struct from environment variables with the given prefix,
/// e.g. `TORUS_CLICKHOUSE_` maps `TORUS_CLICKHOUSE_HOST` to the `host`
/// field.
pub fn from_env_prefixed<T>(prefix: &str) -> Result<T, figment::Error>
where
    T: DeserializeOwned,
{
    Figment::new().merge(Env::prefixed(prefix)).extract()
}

/// The node websocket endpoint for a network, from `<NET>_NODE_WS_URL`.
/// Required; there is no sensible default for a chain endpoint.
pub fn node_ws_url(network: Network) -> Result<String, ConfigError> {
    let var = format!("{}_NODE_WS_URL", network.env_prefix());
    std::env::var(&var).map_err(|_| ConfigError::MissingVar(var))
}

/// Port of the Prometheus exporter, from `METRICS_PORT`.
pub fn metrics_port() -> Result<u16, ConfigError> {
    match std::env::var("METRICS_PORT") {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidVar("METRICS_PORT", value)),
        Err(_) => Ok(9090),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingVar(String),

    #[error("environment variable {0} has invalid value {1}")]
    InvalidVar(&'static str, String),
}
