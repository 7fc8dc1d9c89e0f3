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

use indexer_common::domain::{Network, json_to_u128};
use log::info;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Where a network's genesis balances come from. Only Torus networks ship a
/// genesis allocation file (`[[address, amount], ...]`).
#[derive(Debug, Clone)]
pub enum GenesisBalanceSource {
    File(PathBuf),
    None,
}

impl GenesisBalanceSource {
    pub fn for_network(network: Network, file: Option<PathBuf>) -> Self {
        match file {
            Some(file) => GenesisBalanceSource::File(file),
            None if network.is_torus() => GenesisBalanceSource::File(PathBuf::from(format!(
                "data/{}-genesis-balances.json",
                network.as_str().replace('_', "-")
            ))),
            None => GenesisBalanceSource::None,
        }
    }

    pub fn has_genesis_balances(&self) -> bool {
        matches!(self, GenesisBalanceSource::File(_))
    }

    /// Load and validate the genesis allocation.
    pub fn load(&self) -> Result<Vec<(String, u128)>, GenesisError> {
        let GenesisBalanceSource::File(path) = self else {
            return Ok(Vec::new());
        };

        let raw = std::fs::read_to_string(path)
            .map_err(|error| GenesisError::Read(path.clone(), error))?;
        let entries: Vec<Value> =
            serde_json::from_str(&raw).map_err(|error| GenesisError::Parse(path.clone(), error))?;

        let mut balances = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let pair = entry.as_array().filter(|pair| pair.len() == 2);
            let Some(pair) = pair else {
                return Err(GenesisError::Entry(index, "expected [address, amount]"));
            };

            let Some(address) = pair[0].as_str() else {
                return Err(GenesisError::Entry(index, "address must be a string"));
            };
            let Some(amount) = json_to_u128(&pair[1]) else {
                return Err(GenesisError::Entry(index, "amount must be a number"));
            };

            balances.push((address.to_owned(), amount));
        }

        info!(path:? = path, balances_len = balances.len(); "loaded genesis balances");
        Ok(balances)
    }

}

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("cannot read genesis balances file {0}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("cannot parse genesis balances file {0}")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("invalid genesis balance entry {0}: {1}")]
    Entry(usize, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[["addr-one", "1000000000000000000"], ["addr-two", 5]]"#
        )
        .unwrap();

        let source = GenesisBalanceSource::File(file.path().to_owned());
        let balances = source.load().unwrap();

        assert_eq!(
            balances,
            vec![
                ("addr-one".to_owned(), 1_000_000_000_000_000_000),
                ("addr-two".to_owned(), 5),
            ]
        );
    }

    #[test]
    fn test_invalid_entry_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[["addr-one"]]"#).unwrap();

        let source = GenesisBalanceSource::File(file.path().to_owned());
        assert_matches::assert_matches!(source.load(), Err(GenesisError::Entry(0, _)));
    }

    #[test]
    fn test_non_torus_networks_have_no_source() {
        let source = GenesisBalanceSource::for_network(Network::Polkadot, None);
        assert!(!source.has_genesis_balances());
        assert!(source.load().unwrap().is_empty());

        let source = GenesisBalanceSource::for_network(Network::Torus, None);
        assert!(source.has_genesis_balances());
    }
}
