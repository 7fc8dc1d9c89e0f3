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

use log::{info, warn};
use std::{fmt::Display, future::Future, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Constant backoff between retries.
pub const BACKOFF: Duration = Duration::from_secs(1);

/// Emit a retry warning only every Nth attempt to avoid log storms.
pub const LOG_EVERY_N: u32 = 10;

/// Returned when a retry loop is interrupted by the cancellation token.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("operation {0} cancelled during retry")]
pub struct Cancelled(pub &'static str);

/// Retry the given operation forever with constant backoff until it succeeds
/// or the cancellation token fires. Errors are logged throttled, every
/// `log_every_n`th attempt.
pub async fn forever<T, E, F, Fut>(
    operation: &'static str,
    cancel: &CancellationToken,
    log_every_n: u32,
    mut f: F,
) -> Result<T, Cancelled>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0u32;

    loop {
        if cancel.is_cancelled() {
            info!(operation; "cancellation requested during retry");
            return Err(Cancelled(operation));
        }

        match f().await {
            Ok(value) => return Ok(value),

            Err(error) => {
                retries += 1;
                if retries % log_every_n.max(1) == 1 {
                    warn!(operation, retries, error:%; "operation failed, retrying");
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(operation, retries; "cancellation requested during retry");
                        return Err(Cancelled(operation));
                    }
                    _ = sleep(BACKOFF) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    #[tokio::test]
    async fn test_returns_first_success() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = forever("test", &cancel, LOG_EVERY_N, || {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = forever("test", &cancel, LOG_EVERY_N, || async { Err::<(), _>("down") }).await;
        assert_eq!(result, Err(Cancelled("test")));
    }
}
