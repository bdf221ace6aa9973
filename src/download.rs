//! Cancelable HTTP downloads
//!
//! [`cancelable_download`] issues one HTTP request wired to a
//! [`CancellationToken`]. When a [`Canceler`] is supplied the token is
//! registered with it, so cancelling the owning operation aborts the request
//! at its next I/O boundary: either while waiting for the response head or
//! while reading the body.
//!
//! The returned [`CancelableResponse`] owns the registration. Finishing or
//! dropping it signals completion exactly once, after which a background task
//! deregisters the request so that a later cancel does not target a call that
//! already ended.

use crate::cancel::{Canceler, RequestId};
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::retry_download;
use crate::types::Metadata;
use axum::body::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Upper bound on the buffer reserved up front from `Content-Length`
const MAX_PREALLOCATION: u64 = 64 * 1024;

/// Response of a cancelable request
///
/// Body reads race the cancellation token. The completion signal is sent when
/// the response is finished or dropped.
pub struct CancelableResponse {
    response: reqwest::Response,
    token: CancellationToken,
    done: Option<oneshot::Sender<()>>,
}

impl CancelableResponse {
    /// HTTP status of the response
    pub fn status(&self) -> reqwest::StatusCode {
        self.response.status()
    }

    /// Response headers
    pub fn headers(&self) -> &reqwest::header::HeaderMap {
        self.response.headers()
    }

    /// Body length announced by the server, if any
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Whether the request has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with [`Error::Network`] if the server answered with an error status
    pub fn error_for_status(self) -> Result<Self> {
        if let Err(e) = self.response.error_for_status_ref() {
            return Err(Error::Network(e));
        }
        Ok(self)
    }

    /// Read the next body chunk, or `None` at the end of the body
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::RequestCanceled),
            chunk = self.response.chunk() => chunk.map_err(Error::Network),
        }
    }

    /// Read the whole body, then signal completion
    pub async fn bytes(mut self) -> Result<Bytes> {
        // The announced length is only a hint and may be absurd
        let hint = self.content_length().unwrap_or(0).min(MAX_PREALLOCATION);
        let mut body = Vec::with_capacity(hint as usize);
        while let Some(chunk) = self.chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(body))
    }

    /// Signal that the caller is done with the response
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for CancelableResponse {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            // The deregistration task may not exist (no canceler); nothing to do then
            let _ = done.send(());
        }
    }
}

impl std::fmt::Debug for CancelableResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelableResponse")
            .field("status", &self.response.status())
            .field("url", &self.response.url().as_str())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Issue a request that can be aborted through `canceler`
///
/// Transport errors are returned unmodified as [`Error::Network`].
/// Cancellation surfaces as [`Error::RequestCanceled`], which callers must
/// treat as neither success nor a retryable failure.
pub async fn cancelable_download(
    client: &reqwest::Client,
    request: reqwest::Request,
    canceler: Option<&Canceler>,
) -> Result<CancelableResponse> {
    let registration: Option<(Canceler, RequestId, CancellationToken)> = match canceler {
        Some(canceler) => {
            let id = canceler.next_request_id();
            let token = canceler.register(id).await?;
            Some((canceler.clone(), id, token))
        }
        None => None,
    };

    let token = registration
        .as_ref()
        .map(|(_, _, token)| token.clone())
        .unwrap_or_default();

    let url = request.url().to_string();
    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::RequestCanceled),
        response = client.execute(request) => response.map_err(Error::Network),
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            if let Some((canceler, id, _)) = &registration {
                canceler.deregister(*id).await;
            }
            tracing::debug!(url = %url, error = %e, "Cancelable request did not complete");
            return Err(e);
        }
    };

    let (done_tx, done_rx) = oneshot::channel();
    if let Some((canceler, id, _)) = registration {
        tokio::spawn(async move {
            // Sent or dropped: either way the caller is done with the body
            let _ = done_rx.await;
            canceler.deregister(id).await;
        });
    }

    Ok(CancelableResponse {
        response,
        token,
        done: Some(done_tx),
    })
}

/// Progress of a running download
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes received so far
    pub downloaded: u64,
    /// Total size, when the server announced one
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Completion percentage, when the total is known
    pub fn percent(&self) -> Option<u64> {
        match self.total {
            Some(total) if total > 0 => Some(self.downloaded.min(total) * 100 / total),
            _ => None,
        }
    }

    /// Human-readable description
    pub fn text(&self) -> String {
        match self.percent() {
            Some(percent) => format!("{}% ({} bytes)", percent, self.downloaded),
            None => format!("{} bytes", self.downloaded),
        }
    }

    /// Progress metadata suitable for an operation
    pub fn to_metadata(&self) -> Metadata {
        Metadata::Progress(crate::types::ProgressMetadata {
            download_progress: self.text(),
            processed_bytes: Some(self.downloaded),
            total_bytes: self.total,
        })
    }
}

/// Parameters for [`download_to_writer`]
pub struct DownloadParams<'a> {
    /// HTTP client
    pub client: &'a reqwest::Client,
    /// URL to fetch
    pub url: &'a str,
    /// Expected hex-encoded SHA-256 of the body
    pub expected_sha256: Option<&'a str>,
    /// Canceler to register the request with
    pub canceler: Option<&'a Canceler>,
}

/// Stream a cancelable download into `writer`
///
/// Reports progress after each chunk, verifies the SHA-256 of the body when
/// `expected_sha256` is set and returns the number of bytes written.
pub async fn download_to_writer<W, F>(
    params: DownloadParams<'_>,
    writer: &mut W,
    mut progress: F,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
    F: FnMut(DownloadProgress),
{
    let DownloadParams {
        client,
        url,
        expected_sha256,
        canceler,
    } = params;

    let request = client.get(url).build().map_err(Error::Network)?;
    let mut response = cancelable_download(client, request, canceler)
        .await?
        .error_for_status()?;

    let total = response.content_length();
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        writer.write_all(&chunk).await?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
        progress(DownloadProgress { downloaded, total });
    }
    writer.flush().await?;
    response.finish();

    if let Some(expected) = expected_sha256 {
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::HashMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    tracing::debug!(url = %url, bytes = downloaded, "Download complete");
    Ok(downloaded)
}

/// Fetch a whole body, retrying transient failures
///
/// Each attempt is a separate cancelable request, and the pauses between
/// attempts are cancelable too; a cancellation ends the loop immediately.
pub async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    canceler: Option<&Canceler>,
    retry: &RetryConfig,
) -> Result<Bytes> {
    retry_download(retry, canceler, |_| async {
        let request = client.get(url).build().map_err(Error::Network)?;
        cancelable_download(client, request, canceler)
            .await?
            .error_for_status()?
            .bytes()
            .await
    })
    .await
}
