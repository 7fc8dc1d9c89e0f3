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

use anyhow::Context;
use clap::Parser;
use indexer_common::{
    config,
    domain::Network,
    infra::{
        block_stream::BlockStream,
        clickhouse,
        subxt_node::{self, SubxtNode},
    },
    signal, telemetry,
};
use log::{error, info};
use series_indexer::{application, config::Cli, infra::storage::Storage};
use std::{panic, time::Duration};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    telemetry::init_logging();
    panic::set_hook(Box::new(|panic| error!(panic:%; "process panicked")));

    if let Err(error) = run().await {
        let error = format!("{error:#}");
        error!(error; "process exited with ERROR");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let network = cli.network.parse::<Network>().context("parse --network")?;

    telemetry::init_metrics(config::metrics_port()?).context("install metrics exporter")?;

    let cancel = CancellationToken::new();
    signal::install_handlers(cancel.clone()).context("install signal handlers")?;

    let clickhouse_config =
        clickhouse::Config::from_env(network).context("load ClickHouse configuration")?;
    clickhouse::create_database(&clickhouse_config, network)
        .await
        .context("create database")?;

    let block_source = BlockStream::new(clickhouse_config.client(network));
    let storage = Storage::new(clickhouse_config.client(network))
        .await
        .context("initialize balance_series storage")?;

    let node_config = subxt_node::Config::new(config::node_ws_url(network)?);
    let node = SubxtNode::new(network, node_config, cancel.clone())
        .await
        .context("connect to node")?;

    info!(network:%, period_hours = cli.period_hours; "starting");

    let config = application::Config {
        network,
        period_hours: cli.period_hours.max(1),
        sleep_time: Duration::from_secs(cli.sleep_time.max(1)),
        genesis_file: cli.genesis_file,
    };

    application::run(config, block_source, node, storage, cancel)
        .await
        .context("run balance series consumer")
}
