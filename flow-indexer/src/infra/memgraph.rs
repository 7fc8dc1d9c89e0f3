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

use crate::domain::{self, GraphMutation};
use fastrace::trace;
use indexer_common::{config, domain::Network};
use indoc::indoc;
use log::{info, warn};
use neo4rs::{Graph, query};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Connection settings for the graph store, extracted from
/// `<NET>_MEMGRAPH_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: Option<SecretString>,
}

impl Config {
    pub fn from_env(network: Network) -> Result<Self, figment::Error> {
        config::from_env_prefixed(&format!("{}_MEMGRAPH_", network.env_prefix()))
    }
}

fn default_url() -> String {
    "bolt://localhost:7687".to_owned()
}

/// [domain::graph::GraphStore] implementation over Bolt against Memgraph.
#[derive(Clone)]
pub struct Memgraph {
    graph: Graph,
}

impl Memgraph {
    pub async fn new(config: Config) -> Result<Self, neo4rs::Error> {
        let password = config
            .password
            .as_ref()
            .map(|password| password.expose_secret().to_owned())
            .unwrap_or_default();
        let graph = Graph::new(&config.url, &config.user, &password).await?;

        Ok(Self { graph })
    }
}

const NODE_INDEXES: [(&str, &str); 12] = [
    ("Address", "address"),
    ("Agent", "labels"),
    ("Address", "transfer_count"),
    ("Address", "neighbor_count"),
    ("Address", "unique_senders"),
    ("Address", "unique_receivers"),
    ("Address", "first_activity_timestamp"),
    ("Address", "last_activity_timestamp"),
    ("Address", "first_activity_block_height"),
    ("Address", "last_activity_block_height"),
    ("Address", "community_id"),
    ("Address", "community_page_rank"),
];

const EDGE_INDEXES: [(&str, &str); 9] = [
    ("TO", "id"),
    ("TO", "asset"),
    ("TO", "asset_contract"),
    ("TO", "volume"),
    ("TO", "transfer_count"),
    ("TO", "last_activity_timestamp"),
    ("TO", "first_activity_timestamp"),
    ("TO", "last_activity_block_height"),
    ("TO", "first_activity_block_height"),
];

impl domain::graph::GraphStore for Memgraph {
    #[trace]
    async fn ensure_indexes(&self) -> Result<(), neo4rs::Error> {
        let mut existing = HashSet::new();
        let mut rows = self.graph.execute(query("SHOW INDEX INFO;")).await?;
        while let Some(row) = rows.next().await? {
            let label: Option<String> = row.get("label").ok();
            let property: Option<String> = row.get("property").ok();
            if let Some(label) = label {
                match property {
                    Some(property) => existing.insert(format!("{label}:{property}")),
                    None => existing.insert(label),
                };
            }
        }

        for (label, property) in NODE_INDEXES {
            if !existing.contains(&format!("{label}:{property}")) {
                self.graph
                    .run(query(&format!("CREATE INDEX ON :{label}({property});")))
                    .await?;
            }
        }

        for (edge, property) in EDGE_INDEXES {
            if !existing.contains(&format!("{edge}:{property}")) {
                self.graph
                    .run(query(&format!("CREATE EDGE INDEX ON :{edge}({property});")))
                    .await?;
            }
        }

        let mut existing_vector_indexes = HashSet::new();
        let mut rows = self
            .graph
            .execute(query("CALL vector_search.show_index_info() YIELD * RETURN *;"))
            .await?;
        while let Some(row) = rows.next().await? {
            let label: Option<String> = row.get("label").ok();
            let property: Option<String> = row.get("property").ok();
            if let (Some(label), Some(property)) = (label, property) {
                existing_vector_indexes.insert(format!("{label}:{property}"));
            }
        }

        if !existing_vector_indexes.contains("Address:network_embedding") {
            let create_vector_index = indoc! {r#"
                CREATE VECTOR INDEX NetworkEmbeddings
                ON :Address(network_embedding)
                WITH CONFIG {
                    "capacity": 1000,
                    "dimension": 6,
                    "metric": "cos"
                };
            "#};
            self.graph.run(query(create_vector_index)).await?;
            info!("created NetworkEmbeddings vector index");
        }

        Ok(())
    }

    #[trace]
    async fn last_block_height(&self) -> Result<Option<u64>, neo4rs::Error> {
        let read_height = indoc! {r#"
            MATCH (g:GlobalState { name: "last_block_height" })
            RETURN g.block_height AS last_block_height
        "#};

        let mut rows = self.graph.execute(query(read_height)).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let height: i64 = row.get("last_block_height").map_err(neo4rs::Error::DeserializationError)?;
        Ok(Some(height as u64))
    }

    #[trace]
    async fn update_global_state(&self, block_height: u64) -> Result<(), neo4rs::Error> {
        let update = indoc! {r#"
            MERGE (g:GlobalState { name: "last_block_height" })
            SET g.block_height = $block_height
        "#};

        self.graph
            .run(query(update).param("block_height", block_height as i64))
            .await
    }

    #[trace(properties = { "block_height": "{block_height}" })]
    async fn index_block(
        &self,
        block_height: u64,
        timestamp: u64,
        mutations: &[GraphMutation],
    ) -> Result<bool, neo4rs::Error> {
        let mut txn = self.graph.start_txn().await?;

        // Guard: anything at or below the marker was already applied.
        let read_height = indoc! {r#"
            MATCH (g:GlobalState { name: "last_block_height" })
            RETURN g.block_height AS last_block_height
        "#};
        let mut rows = txn.execute(query(read_height)).await?;
        let last_block_height = match rows.next(txn.handle()).await? {
            Some(row) => Some(
                row.get::<i64>("last_block_height")
                    .map_err(neo4rs::Error::DeserializationError)? as u64,
            ),
            None => None,
        };

        if let Some(last_block_height) = last_block_height
            && block_height <= last_block_height
        {
            warn!(
                block_height,
                last_block_height;
                "skipping block, already indexed"
            );
            txn.commit().await?;
            return Ok(false);
        }

        let update_height = indoc! {r#"
            MERGE (g:GlobalState { name: "last_block_height" })
            SET g.block_height = $block_height
        "#};
        txn.run(query(update_height).param("block_height", block_height as i64))
            .await?;

        let timestamp = timestamp as i64;
        let block_height = block_height as i64;

        for mutation in mutations {
            match mutation {
                GraphMutation::UpsertEndowed { account } => {
                    let upsert = indoc! {"
                        MERGE (addr:Address { address: $account })
                        ON CREATE SET
                            addr.first_activity_timestamp = $timestamp,
                            addr.first_activity_block_height = $block_height
                    "};
                    txn.run(
                        query(upsert)
                            .param("account", account.as_str())
                            .param("timestamp", timestamp)
                            .param("block_height", block_height),
                    )
                    .await?;
                }

                GraphMutation::UpsertTransfer {
                    from,
                    to,
                    amount,
                    asset,
                    edge_id,
                } => {
                    let upsert = indoc! {"
                        MERGE (sender:Address { address: $from })
                          ON CREATE SET
                            sender.first_activity_timestamp = $timestamp,
                            sender.last_activity_timestamp = $timestamp,
                            sender.first_activity_block_height = $block_height,
                            sender.last_activity_block_height = $block_height,
                            sender.transfer_count = 1
                          ON MATCH SET
                            sender.last_activity_timestamp = $timestamp,
                            sender.last_activity_block_height = $block_height,
                            sender.transfer_count = coalesce(sender.transfer_count, 0) + 1

                        MERGE (receiver:Address { address: $to })
                          ON CREATE SET
                            receiver.first_activity_timestamp = $timestamp,
                            receiver.last_activity_timestamp = $timestamp,
                            receiver.first_activity_block_height = $block_height,
                            receiver.last_activity_block_height = $block_height,
                            receiver.transfer_count = 1
                          ON MATCH SET
                            receiver.last_activity_timestamp = $timestamp,
                            receiver.last_activity_block_height = $block_height,
                            receiver.transfer_count = coalesce(receiver.transfer_count, 0) + 1

                        MERGE (sender)-[r:TO { id: $edge_id, asset: $asset, asset_contract: $asset_contract }]->(receiver)
                          ON CREATE SET
                            r.volume = $amount,
                            r.transfer_count = 1,
                            r.first_activity_timestamp = $timestamp,
                            r.last_activity_timestamp = $timestamp,
                            r.first_activity_block_height = $block_height,
                            r.last_activity_block_height = $block_height,
                            sender.neighbor_count = coalesce(sender.neighbor_count, 0) + 1,
                            sender.unique_receivers = coalesce(sender.unique_receivers, 0) + 1,
                            receiver.neighbor_count = coalesce(receiver.neighbor_count, 0) + 1,
                            receiver.unique_senders = coalesce(receiver.unique_senders, 0) + 1
                          ON MATCH SET
                            r.volume = r.volume + $amount,
                            r.transfer_count = r.transfer_count + 1,
                            r.last_activity_timestamp = $timestamp,
                            r.last_activity_block_height = $block_height
                    "};
                    txn.run(
                        query(upsert)
                            .param("from", from.as_str())
                            .param("to", to.as_str())
                            .param("amount", *amount)
                            .param("asset", asset.symbol.as_str())
                            .param("asset_contract", asset.contract.as_str())
                            .param("edge_id", edge_id.as_str())
                            .param("timestamp", timestamp)
                            .param("block_height", block_height),
                    )
                    .await?;
                }

                GraphMutation::LabelAgent { address } => {
                    let label = indoc! {"
                        MERGE (agent:Address { address: $agent })
                        SET agent:Agent,
                            agent.labels = CASE
                                WHEN NOT 'agent' IN coalesce(agent.labels, [])
                                THEN coalesce(agent.labels, []) + ['agent']
                                ELSE agent.labels
                            END
                    "};
                    txn.run(query(label).param("agent", address.as_str())).await?;
                }

                GraphMutation::UpsertNeuron {
                    network_id,
                    neuron_id,
                    owner,
                } => {
                    let label_owner = indoc! {"
                        MERGE (addr:Address { address: $owner })
                        ON CREATE SET
                            addr.labels = ['neuron_owner'],
                            addr.first_activity_timestamp = $timestamp
                        ON MATCH SET
                            addr.labels = CASE
                                WHEN NOT 'neuron_owner' IN coalesce(addr.labels, [])
                                THEN coalesce(addr.labels, []) + ['neuron_owner']
                                ELSE addr.labels
                            END
                    "};
                    txn.run(
                        query(label_owner)
                            .param("owner", owner.as_str())
                            .param("timestamp", timestamp),
                    )
                    .await?;

                    let upsert_neuron = indoc! {"
                        MERGE (neuron:Neuron { network_id: $network_id, neuron_id: $neuron_id })
                        SET neuron.owner_address = $owner,
                            neuron.last_updated_timestamp = $timestamp
                    "};
                    txn.run(
                        query(upsert_neuron)
                            .param("network_id", network_id.as_str())
                            .param("neuron_id", neuron_id.as_str())
                            .param("owner", owner.as_str())
                            .param("timestamp", timestamp),
                    )
                    .await?;

                    let owns = indoc! {"
                        MATCH (owner:Address { address: $owner })
                        MATCH (neuron:Neuron { network_id: $network_id, neuron_id: $neuron_id })
                        MERGE (owner)-[r:OWNS]->(neuron)
                        SET r.last_updated_timestamp = $timestamp
                    "};
                    txn.run(
                        query(owns)
                            .param("owner", owner.as_str())
                            .param("network_id", network_id.as_str())
                            .param("neuron_id", neuron_id.as_str())
                            .param("timestamp", timestamp),
                    )
                    .await?;
                }

                GraphMutation::UpsertSubnet {
                    network_id,
                    creator,
                } => {
                    let upsert_subnet = indoc! {"
                        MERGE (subnet:Subnet { network_id: $network_id })
                        ON CREATE SET
                            subnet.created_timestamp = $timestamp,
                            subnet.label = 'sn' + $network_id
                        SET subnet.last_updated_timestamp = $timestamp
                    "};
                    txn.run(
                        query(upsert_subnet)
                            .param("network_id", network_id.as_str())
                            .param("timestamp", timestamp),
                    )
                    .await?;

                    if let Some(creator) = creator {
                        let label_creator = indoc! {"
                            MERGE (addr:Address { address: $creator })
                            ON CREATE SET
                                addr.labels = ['subnet_creator'],
                                addr.first_activity_timestamp = $timestamp
                            ON MATCH SET
                                addr.labels = CASE
                                    WHEN NOT 'subnet_creator' IN coalesce(addr.labels, [])
                                    THEN coalesce(addr.labels, []) + ['subnet_creator']
                                    ELSE addr.labels
                                END
                        "};
                        txn.run(
                            query(label_creator)
                                .param("creator", creator.as_str())
                                .param("timestamp", timestamp),
                        )
                        .await?;

                        let created = indoc! {"
                            MATCH (creator:Address { address: $creator })
                            MATCH (subnet:Subnet { network_id: $network_id })
                            MERGE (creator)-[r:CREATED]->(subnet)
                            SET r.timestamp = $timestamp
                        "};
                        txn.run(
                            query(created)
                                .param("creator", creator.as_str())
                                .param("network_id", network_id.as_str())
                                .param("timestamp", timestamp),
                        )
                        .await?;
                    }
                }
            }
        }

        txn.commit().await?;
        Ok(true)
    }

    #[trace]
    async fn community_detection(&self) -> Result<(), neo4rs::Error> {
        let detect = indoc! {"
            MATCH (source:Address)-[r:TO]->(target:Address)
            WITH collect(DISTINCT source) + collect(DISTINCT target) AS nodes, collect(DISTINCT r) AS relationships
            CALL community_detection.get_subgraph(nodes, relationships)
            YIELD node, community_id
            SET node.community_id = community_id
            WITH DISTINCT community_id
            WHERE community_id IS NOT NULL
            MERGE (c:Community { community_id: community_id });
        "};

        match self.graph.run(query(detect)).await {
            Ok(()) => Ok(()),
            Err(error) if format!("{error}").contains("No communities detected") => {
                warn!("no communities detected");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    #[trace]
    async fn community_page_rank(&self, cancel: &CancellationToken) -> Result<(), neo4rs::Error> {
        let list_communities = indoc! {"
            MATCH (c:Community)
            RETURN DISTINCT c.community_id AS community_id
        "};

        let mut communities = Vec::new();
        let mut rows = self.graph.execute(query(list_communities)).await?;
        while let Some(row) = rows.next().await? {
            communities.push(
                row.get::<i64>("community_id")
                    .map_err(neo4rs::Error::DeserializationError)?,
            );
        }

        info!(communities_len = communities.len(); "starting community PageRank");

        let mut processed = 0usize;
        for community_id in &communities {
            if cancel.is_cancelled() {
                info!(
                    processed,
                    communities_len = communities.len();
                    "cancellation requested during PageRank"
                );
                break;
            }

            let page_rank = indoc! {"
                MATCH p=(a1:Address { community_id: $community_id })-[r:TO*1..3]->(a2:Address)
                WITH project(p) AS community_graph
                CALL pagerank.get(community_graph) YIELD node, rank
                SET node.community_page_rank = rank
            "};
            self.graph
                .run(query(page_rank).param("community_id", *community_id))
                .await?;

            processed += 1;
        }

        info!(
            processed,
            communities_len = communities.len();
            "community PageRank completed"
        );

        Ok(())
    }

    #[trace]
    async fn update_calculated_properties(&self) -> Result<(), neo4rs::Error> {
        let update = indoc! {"
            MATCH (a:Address)
            OPTIONAL MATCH (a)-[:TO]->(receiver:Address)
            WITH a, count(DISTINCT receiver) AS unique_receivers
            OPTIONAL MATCH (sender:Address)-[:TO]->(a)
            WITH a, unique_receivers, count(DISTINCT sender) AS unique_senders
            SET a.unique_senders = unique_senders,
                a.unique_receivers = unique_receivers
        "};

        self.graph.run(query(update)).await
    }

    #[trace]
    async fn update_embeddings(&self) -> Result<(), neo4rs::Error> {
        let update = indoc! {"
            MATCH (a:Address)
            SET a.network_embedding = [
                coalesce(a.transfer_count, 0),
                coalesce(a.unique_senders, 0),
                coalesce(a.unique_receivers, 0),
                coalesce(a.neighbor_count, 0),
                coalesce(a.community_id, 0),
                coalesce(a.community_page_rank, 0)
            ]
        "};

        self.graph.run(query(update)).await
    }
}
