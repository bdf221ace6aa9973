//! Backoff for downloads that hit a busy or unreachable server
//!
//! A failed attempt is retried only when the failure is transient: a timeout,
//! a refused or reset connection, or a 5xx/429 answer. The pause between
//! attempts is itself registered with the operation's [`Canceler`], so a
//! cancel that lands while waiting ends the loop with
//! [`Error::RequestCanceled`] instead of leaving the operation uncancelable
//! until the next attempt starts.
//!
//! ```no_run
//! use lxops::Canceler;
//! use lxops::config::RetryConfig;
//! use lxops::retry::retry_download;
//!
//! # async fn example(client: reqwest::Client) -> lxops::Result<()> {
//! let canceler = Canceler::new();
//! let body = retry_download(&RetryConfig::default(), Some(&canceler), |attempt| {
//!     let client = client.clone();
//!     async move {
//!         tracing::debug!(attempt, "Fetching index");
//!         let response = client.get("https://images.example.org/index.json").send().await?;
//!         Ok(response.error_for_status()?.bytes().await?)
//!     }
//! })
//! .await?;
//! # drop(body);
//! # Ok(())
//! # }
//! ```

use crate::cancel::Canceler;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

/// Classification of failures worth another attempt
pub trait IsRetryable {
    /// True if a later attempt may succeed where this one failed
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|status| {
                        status.is_server_error()
                            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ),
            // Cancellation, bad content and every precondition failure are final
            _ => false,
        }
    }
}

/// Delays between attempts derived from a [`RetryConfig`]
///
/// Yields at most `max_attempts` delays, growing by `backoff_multiplier` and
/// capped at `max_delay`. With jitter enabled each delay is drawn from the
/// upper half of its nominal value, so the cap is never exceeded.
#[derive(Clone, Debug)]
pub struct Backoff {
    nominal: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    remaining: u32,
}

impl Backoff {
    /// Delay schedule for `config`
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            nominal: config.initial_delay.min(config.max_delay),
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            remaining: config.max_attempts,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let current = self.nominal;
        self.nominal = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter && !current.is_zero() {
            let half = current / 2;
            let spread = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
            Some(half + Duration::from_millis(spread))
        } else {
            Some(current)
        }
    }
}

/// Wait `delay`, aborting early if `canceler` is cancelled meanwhile
async fn pause(delay: Duration, canceler: Option<&Canceler>) -> Result<()> {
    let Some(canceler) = canceler else {
        tokio::time::sleep(delay).await;
        return Ok(());
    };

    let id = canceler.next_request_id();
    let token = canceler.register(id).await?;
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::RequestCanceled),
        _ = tokio::time::sleep(delay) => Ok(()),
    };
    canceler.deregister(id).await;
    outcome
}

/// Run `attempt` until it succeeds, fails permanently or runs out of retries
///
/// `attempt` receives the 1-based attempt number. The last error is returned
/// once the [`Backoff`] schedule is exhausted.
pub async fn retry_download<T, F, Fut>(
    config: &RetryConfig,
    canceler: Option<&Canceler>,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = Backoff::new(config);
    let mut number = 1;

    loop {
        let err = match attempt(number).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        let Some(delay) = delays.next() else {
            tracing::warn!(error = %err, attempts = number, "Giving up on download");
            return Err(err);
        };

        tracing::debug!(
            error = %err,
            attempt = number,
            delay_ms = delay.as_millis() as u64,
            "Download attempt failed, backing off"
        );
        pause(delay, canceler).await?;
        number += 1;
    }
}
