//! One-time secrets for stream channels
//!
//! A websocket operation advertises one secret per logical channel (e.g.
//! `"0"`, `"1"`, `"2"` for separate stdio, or `"0"` plus `"control"` for an
//! interactive session). A client presents the secret when connecting; each
//! secret authorizes exactly one connection.

use crate::error::{Error, Result};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{Mutex, Notify};

const SECRET_LEN: usize = 64;

/// Secrets of one operation's stream channels
#[derive(Debug)]
pub struct StreamSecrets {
    /// Channel name to secret
    fds: BTreeMap<String, String>,
    /// Channels whose secret was already used
    claimed: Mutex<BTreeSet<String>>,
    all_claimed: Notify,
}

impl StreamSecrets {
    /// Generate a fresh secret for each named channel
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fds = channels
            .into_iter()
            .map(|channel| (channel.into(), generate_secret()))
            .collect();

        Self {
            fds,
            claimed: Mutex::new(BTreeSet::new()),
            all_claimed: Notify::new(),
        }
    }

    /// Channel name to secret, as advertised in the operation metadata
    pub fn fds(&self) -> &BTreeMap<String, String> {
        &self.fds
    }

    /// Whether `secret` would currently be accepted by [`StreamSecrets::claim`]
    pub async fn verify(&self, secret: &str) -> bool {
        match self.channel_of(secret) {
            Some(channel) => !self.claimed.lock().await.contains(&channel),
            None => false,
        }
    }

    /// Consume `secret`, returning the channel it belongs to
    ///
    /// Fails with [`Error::Forbidden`] if the secret matches no channel or was
    /// already used.
    pub async fn claim(&self, secret: &str) -> Result<String> {
        let channel = self
            .channel_of(secret)
            .ok_or_else(|| Error::Forbidden("invalid stream secret".to_string()))?;

        let mut claimed = self.claimed.lock().await;
        if !claimed.insert(channel.clone()) {
            return Err(Error::Forbidden(format!(
                "stream channel {channel} is already connected"
            )));
        }

        if claimed.len() == self.fds.len() {
            self.all_claimed.notify_waiters();
        }

        Ok(channel)
    }

    /// Make a claimed channel connectable again
    ///
    /// Used when a claimed connection could not be handed over.
    pub async fn release(&self, channel: &str) -> bool {
        self.claimed.lock().await.remove(channel)
    }

    /// Whether every channel has been connected
    pub async fn is_all_claimed(&self) -> bool {
        self.claimed.lock().await.len() == self.fds.len()
    }

    /// Wait until every channel has been connected
    pub async fn wait_all_claimed(&self) {
        loop {
            let notified = self.all_claimed.notified();
            if self.is_all_claimed().await {
                return;
            }
            notified.await;
        }
    }

    fn channel_of(&self, secret: &str) -> Option<String> {
        self.fds
            .iter()
            .find(|(_, expected)| constant_time_eq(secret.as_bytes(), expected.as_bytes()))
            .map(|(channel, _)| channel.clone())
    }
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Compares every byte regardless of where the first mismatch is
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn each_secret_authorizes_one_connection() {
        let secrets = StreamSecrets::new(["0", "control"]);
        let stdio = secrets.fds()["0"].clone();

        assert_eq!(secrets.claim(&stdio).await.unwrap(), "0");
        assert!(matches!(
            secrets.claim(&stdio).await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn verify_does_not_consume() {
        let secrets = StreamSecrets::new(["0"]);
        let stdio = secrets.fds()["0"].clone();

        assert!(secrets.verify(&stdio).await);
        assert!(secrets.verify(&stdio).await);
        secrets.claim(&stdio).await.unwrap();
        assert!(!secrets.verify(&stdio).await);
        assert!(!secrets.verify("guess").await);
    }

    #[tokio::test]
    async fn released_channel_can_be_claimed_again() {
        let secrets = StreamSecrets::new(["0"]);
        let stdio = secrets.fds()["0"].clone();

        secrets.claim(&stdio).await.unwrap();
        assert!(secrets.release("0").await);
        assert!(!secrets.release("0").await);
        assert_eq!(secrets.claim(&stdio).await.unwrap(), "0");
    }

    #[tokio::test]
    async fn unknown_secret_is_forbidden() {
        let secrets = StreamSecrets::new(["0"]);
        assert!(matches!(
            secrets.claim("not-a-secret").await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn secrets_are_distinct_and_url_safe() {
        let secrets = StreamSecrets::new(["0", "1", "2"]);
        let values: BTreeSet<_> = secrets.fds().values().collect();
        assert_eq!(values.len(), 3);
        assert!(
            values
                .iter()
                .all(|s| s.len() == SECRET_LEN && s.chars().all(|c| c.is_ascii_alphanumeric()))
        );
    }

    #[tokio::test]
    async fn waiter_wakes_once_all_channels_connect() {
        let secrets = Arc::new(StreamSecrets::new(["0", "1"]));
        let waiter = {
            let secrets = secrets.clone();
            tokio::spawn(async move { secrets.wait_all_claimed().await })
        };

        secrets.claim(&secrets.fds()["0"].clone()).await.unwrap();
        assert!(!secrets.is_all_claimed().await);
        secrets.claim(&secrets.fds()["1"].clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter must wake")
            .unwrap();
    }

    #[test]
    fn constant_time_eq_compares_full_length() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
