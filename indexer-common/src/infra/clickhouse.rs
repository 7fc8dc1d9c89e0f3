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

use crate::{config, domain::Network};
use clickhouse::Client;
use log::info;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Connection settings for the analytics store, extracted from
/// `<NET>_CLICKHOUSE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Defaults to the network name.
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<SecretString>,

    /// Seconds.
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time: u64,

    /// Bytes.
    #[serde(default = "default_max_query_size")]
    pub max_query_size: u64,
}

impl Config {
    pub fn from_env(network: Network) -> Result<Self, figment::Error> {
        config::from_env_prefixed(&format!("{}_CLICKHOUSE_", network.env_prefix()))
    }

    pub fn database(&self, network: Network) -> String {
        self.database
            .clone()
            .unwrap_or_else(|| network.as_str().to_owned())
    }

    /// Build a client bound to the network's database.
    pub fn client(&self, network: Network) -> Client {
        self.client_for_database(&self.database(network))
    }

    fn client_for_database(&self, database: &str) -> Client {
        let mut client = Client::default()
            .with_url(format!("http://{}:{}", self.host, self.port))
            .with_database(database)
            .with_user(&self.user)
            .with_option("max_execution_time", self.max_execution_time.to_string())
            .with_option("max_query_size", self.max_query_size.to_string());

        if let Some(password) = &self.password {
            client = client.with_password(password.expose_secret());
        }

        client
    }
}

/// Create the network's database if it does not exist yet.
pub async fn create_database(
    config: &Config,
    network: Network,
) -> Result<(), clickhouse::error::Error> {
    let database = config.database(network);

    config
        .client_for_database("default")
        .query(&format!("CREATE DATABASE IF NOT EXISTS {database}"))
        .execute()
        .await?;

    info!(database; "database ensured");
    Ok(())
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_port() -> u16 {
    8123
}

fn default_user() -> String {
    "default".to_owned()
}

fn default_max_execution_time() -> u64 {
    1_800
}

fn default_max_query_size() -> u64 {
    5_000_000
}
