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

use rust_decimal::Decimal;
use thiserror::Error;

/// Convert a raw chain integer (plancks) into decimal units via
/// `raw / 10^decimals`. Overflow is an error, never a truncation.
pub fn to_decimal_units(raw: u128, decimals: u32) -> Result<Decimal, AmountError> {
    let raw = i128::try_from(raw).map_err(|_| AmountError::Overflow(raw))?;
    Decimal::try_from_i128_with_scale(raw, decimals).map_err(|_| AmountError::Scale(raw, decimals))
}

#[derive(Debug, Error)]
pub enum AmountError {
    #[error("amount {0} exceeds the representable decimal range")]
    Overflow(u128),

    #[error("amount {0} with scale {1} exceeds the representable decimal range")]
    Scale(i128, u32),
}
