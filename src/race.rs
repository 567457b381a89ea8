//! First-success racing over unreliable network paths.
//!
//! Every proxy we depend on is a free third-party service that may be slow,
//! rate limited or down. Fetches are therefore issued through several of them
//! at once and the first usable answer wins.

use std::fmt::Display;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;

/// A named attempt participating in a race.
pub type Strategy<'a, T, E> = (&'static str, BoxFuture<'a, Result<T, E>>);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RaceError {
    /// Every strategy failed or timed out.
    #[error("all {attempts} strategies failed")]
    Exhausted { attempts: usize },
}

/// Runs all strategies concurrently and returns the first `Ok`.
///
/// Each strategy gets its own `per_strategy` timeout. Individual failures and
/// timeouts are logged at debug level and otherwise ignored; only when none
/// succeeds is [`RaceError::Exhausted`] returned. Strategies still running
/// when a winner is found are dropped, which cancels their in-flight requests.
pub async fn first_success<'a, T, E>(
    strategies: Vec<Strategy<'a, T, E>>,
    per_strategy: Duration,
) -> Result<T, RaceError>
where
    T: 'a,
    E: Display + 'a,
{
    let attempts = strategies.len();

    let mut pending: FuturesUnordered<_> = strategies
        .into_iter()
        .map(|(name, fut)| async move { (name, tokio::time::timeout(per_strategy, fut).await) })
        .collect();

    while let Some((name, outcome)) = pending.next().await {
        match outcome {
            Ok(Ok(value)) => {
                tracing::debug!(strategy = name, "Strategy won race");
                return Ok(value);
            }
            Ok(Err(e)) => {
                tracing::debug!(strategy = name, error = %e, "Strategy failed");
            }
            Err(_) => {
                tracing::debug!(
                    strategy = name,
                    timeout_ms = per_strategy.as_millis() as u64,
                    "Strategy timed out"
                );
            }
        }
    }

    Err(RaceError::Exhausted { attempts })
}
