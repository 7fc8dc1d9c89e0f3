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

/// Reserved contract string of a network's built-in token.
pub const NATIVE_CONTRACT: &str = "native";

/// A row of the `assets` dictionary, keyed by (network, contract).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub network: String,
    pub symbol: String,
    pub contract: String,
    pub verified: AssetVerification,
    pub name: String,
    pub asset_type: AssetType,
    pub decimals: u32,
    pub first_seen_block: u64,
    /// Milliseconds since Unix epoch.
    pub first_seen_timestamp: u64,
    pub updated_by: String,
    pub notes: String,
    /// Milliseconds since Unix epoch; the merge version of the row.
    pub last_updated: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetVerification {
    Verified,
    Unknown,
    Malicious,
}

impl AssetVerification {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetVerification::Verified => "verified",
            AssetVerification::Unknown => "unknown",
            AssetVerification::Malicious => "malicious",
        }
    }
}

impl fmt::Display for AssetVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetVerification {
    type Err = InvalidAssetField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verified" => Ok(AssetVerification::Verified),
            "unknown" => Ok(AssetVerification::Unknown),
            "malicious" => Ok(AssetVerification::Malicious),
            other => Err(InvalidAssetField("verification", other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Native,
    Token,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Native => "native",
            AssetType::Token => "token",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = InvalidAssetField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(AssetType::Native),
            "token" => Ok(AssetType::Token),
            other => Err(InvalidAssetField("type", other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid asset {0}: {1}")]
pub struct InvalidAssetField(pub &'static str, pub String);

/// Parameters for inserting a not yet known asset.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub symbol: String,
    pub contract: String,
    pub asset_type: AssetType,
    pub decimals: u32,
    pub first_seen_block: u64,
    pub first_seen_timestamp: u64,
    pub name: Option<String>,
    pub notes: Option<String>,
}
