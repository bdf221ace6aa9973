//! Core types for lxops

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::status::StatusCode;

/// API version prefix used when rendering resource and operation URLs
pub const API_VERSION: &str = "1.0";

/// Opaque operation identifier
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generate a fresh random identifier (32 lowercase hex characters)
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().r#gen();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL of this operation on the API
    pub fn url(&self) -> String {
        format!("/{}/operations/{}", API_VERSION, self.0)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Background task driven by a run hook
    Task,
    /// Task that also accepts stream connections
    Websocket,
    /// Placeholder carrying a secret, with no work of its own
    Token,
}

impl OperationClass {
    /// Wire name of the class
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Task => "task",
            OperationClass::Websocket => "websocket",
            OperationClass::Token => "token",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources affected by an operation: resource type to resource names
///
/// Names are rendered as URLs (`/1.0/<type>/<name>`) on the wire.
pub type Resources = BTreeMap<String, Vec<String>>;

/// Render resource names into API URLs
pub fn render_resources(resources: &Resources) -> BTreeMap<String, Vec<String>> {
    resources
        .iter()
        .map(|(kind, names)| {
            let urls = names
                .iter()
                .map(|name| format!("/{API_VERSION}/{kind}/{name}"))
                .collect();
            (kind.clone(), urls)
        })
        .collect()
}

/// Task-specific payload attached to an operation
///
/// Serialized untagged so each shape keeps its historical wire form, e.g.
/// `{"download_progress": "45% (12.1MB/s)"}` or `{"return": 0}`. Anything
/// that matches none of the known shapes is carried as [`Metadata::Opaque`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metadata {
    /// Transfer progress report
    Progress(ProgressMetadata),
    /// Exit status of an executed command
    ExecExit(ExecExitMetadata),
    /// Stream channel secrets handed to clients
    Streams(StreamMetadata),
    /// Error description
    Error(ErrorMetadata),
    /// Any other JSON payload
    Opaque(serde_json::Value),
}

/// Transfer progress report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressMetadata {
    /// Human-readable progress text
    pub download_progress: String,
    /// Bytes transferred so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_bytes: Option<u64>,
    /// Total bytes expected, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

/// Exit status of an executed command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecExitMetadata {
    /// Exit code (128 + n when killed by signal n, -1 when unknown)
    #[serde(rename = "return")]
    pub exit_code: i32,
}

/// Stream channel secrets for a websocket operation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamMetadata {
    /// Channel name (e.g. "0", "1", "2", "control") to one-time secret
    pub fds: BTreeMap<String, String>,
    /// Command being executed, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Environment of the executed command
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Whether the streams are attached to a terminal
    #[serde(default)]
    pub interactive: bool,
}

/// Error description payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorMetadata {
    /// Error message
    pub error: String,
}

impl Metadata {
    /// Progress report with only a text description
    pub fn progress(text: impl Into<String>) -> Self {
        Metadata::Progress(ProgressMetadata {
            download_progress: text.into(),
            processed_bytes: None,
            total_bytes: None,
        })
    }

    /// Exit status of an executed command
    pub fn exec_exit(exit_code: i32) -> Self {
        Metadata::ExecExit(ExecExitMetadata { exit_code })
    }

    /// Error payload
    pub fn error(message: impl Into<String>) -> Self {
        Metadata::Error(ErrorMetadata {
            error: message.into(),
        })
    }
}

/// Wire representation of an operation
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct OperationSnapshot {
    /// Operation ID
    pub id: OperationId,
    /// Operation class
    pub class: OperationClass,
    /// What the operation does
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last status or metadata change
    pub updated_at: DateTime<Utc>,
    /// Status display string
    pub status: String,
    /// Numeric status code
    #[schema(value_type = u16)]
    pub status_code: StatusCode,
    /// Affected resources, rendered as URLs
    pub resources: BTreeMap<String, Vec<String>>,
    /// Task-specific payload
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
    /// Whether a cancel request would currently be accepted
    pub may_cancel: bool,
    /// Failure message (empty unless the operation failed or was cancelled)
    pub err: String,
}

/// Event broadcast to subscribers
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An operation was created or changed
    Operation {
        /// The operation as it is now
        operation: OperationSnapshot,
    },

    /// A finished operation was dropped from the registry
    OperationRemoved {
        /// Operation ID
        id: OperationId,
    },

    /// The registry is shutting down
    Shutdown,
}

impl Event {
    /// Name of the event, matching its serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            Event::Operation { .. } => "operation",
            Event::OperationRemoved { .. } => "operation_removed",
            Event::Shutdown => "shutdown",
        }
    }
}
