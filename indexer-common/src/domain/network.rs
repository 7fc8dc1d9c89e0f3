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

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// A supported substrate network. Carries the per-network constants used
/// across all indexers: native asset, decimals, block time and the backfill
/// partition size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Torus,
    TorusTestnet,
    Bittensor,
    BittensorTestnet,
    Polkadot,
}

impl Network {
    pub const ALL: [Network; 5] = [
        Network::Torus,
        Network::TorusTestnet,
        Network::Bittensor,
        Network::BittensorTestnet,
        Network::Polkadot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Torus => "torus",
            Network::TorusTestnet => "torus_testnet",
            Network::Bittensor => "bittensor",
            Network::BittensorTestnet => "bittensor_testnet",
            Network::Polkadot => "polkadot",
        }
    }

    /// Uppercased prefix for environment variables, e.g. `TORUS_TESTNET`.
    pub fn env_prefix(&self) -> String {
        self.as_str().to_uppercase()
    }

    /// Native asset symbol.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Network::Torus | Network::TorusTestnet => "TOR",
            Network::Bittensor | Network::BittensorTestnet => "TAO",
            Network::Polkadot => "DOT",
        }
    }

    /// Native asset display name.
    pub fn native_name(&self) -> &'static str {
        match self {
            Network::Torus | Network::TorusTestnet => "Torus",
            Network::Bittensor | Network::BittensorTestnet => "Bittensor",
            Network::Polkadot => "Polkadot",
        }
    }

    /// Decimals of the native asset.
    pub fn native_decimals(&self) -> u32 {
        match self {
            Network::Torus | Network::TorusTestnet => 18,
            Network::Bittensor | Network::BittensorTestnet => 18,
            Network::Polkadot => 10,
        }
    }

    /// Target block time in seconds.
    pub fn block_time_secs(&self) -> u64 {
        match self {
            Network::Torus | Network::TorusTestnet => 8,
            Network::Bittensor | Network::BittensorTestnet => 12,
            Network::Polkadot => 6,
        }
    }

    /// Size of one backfill partition in blocks; one month of blocks at the
    /// network's block time.
    pub fn partition_size(&self) -> u64 {
        30 * 24 * 3600 / self.block_time_secs()
    }

    /// Whether staked balances are aggregated from the Torus0 pallet.
    pub fn is_torus(&self) -> bool {
        matches!(self, Network::Torus | Network::TorusTestnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "torus" => Ok(Network::Torus),
            "torus_testnet" => Ok(Network::TorusTestnet),
            "bittensor" => Ok(Network::Bittensor),
            "bittensor_testnet" => Ok(Network::BittensorTestnet),
            "polkadot" => Ok(Network::Polkadot),
            other => Err(UnknownNetwork(other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown network {0}; expected one of torus, torus_testnet, bittensor, bittensor_testnet, polkadot")]
pub struct UnknownNetwork(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for network in Network::ALL {
            assert_eq!(network.as_str().parse::<Network>().unwrap(), network);
        }
        assert!("kusama".parse::<Network>().is_err());
    }

    #[test]
    fn test_constants() {
        assert_eq!(Network::Torus.native_symbol(), "TOR");
        assert_eq!(Network::Polkadot.native_decimals(), 10);
        assert_eq!(Network::Torus.partition_size(), 324_000);
        assert_eq!(Network::Bittensor.partition_size(), 216_000);
        assert_eq!(Network::Polkadot.partition_size(), 432_000);
    }
}
