//! Operation status codes
//!
//! Status codes are partitioned by numeric range: `[100, 200)` are in-progress
//! states, `200` is success and `[400, 500)` are failure states. Anything at or
//! above 200 is final.

use serde::{Deserialize, Serialize};

/// State of an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum StatusCode {
    /// Operation created (100)
    Created,
    /// Started (101)
    Started,
    /// Stopped (102)
    Stopped,
    /// Running (103)
    Running,
    /// Cancelling (104)
    Cancelling,
    /// Pending (105)
    Pending,
    /// Starting (106)
    Starting,
    /// Stopping (107)
    Stopping,
    /// Aborting (108)
    Aborting,
    /// Freezing (109)
    Freezing,
    /// Frozen (110)
    Frozen,
    /// Thawed (111)
    Thawed,
    /// Error (112)
    Error,
    /// Ready (113)
    Ready,
    /// Success (200)
    Success,
    /// Failure (400)
    Failure,
    /// Cancelled (401)
    Cancelled,
}

impl StatusCode {
    /// Every known status code, in numeric order
    pub const ALL: [StatusCode; 17] = [
        StatusCode::Created,
        StatusCode::Started,
        StatusCode::Stopped,
        StatusCode::Running,
        StatusCode::Cancelling,
        StatusCode::Pending,
        StatusCode::Starting,
        StatusCode::Stopping,
        StatusCode::Aborting,
        StatusCode::Freezing,
        StatusCode::Frozen,
        StatusCode::Thawed,
        StatusCode::Error,
        StatusCode::Ready,
        StatusCode::Success,
        StatusCode::Failure,
        StatusCode::Cancelled,
    ];

    /// Numeric wire value
    pub const fn code(self) -> u16 {
        match self {
            StatusCode::Created => 100,
            StatusCode::Started => 101,
            StatusCode::Stopped => 102,
            StatusCode::Running => 103,
            StatusCode::Cancelling => 104,
            StatusCode::Pending => 105,
            StatusCode::Starting => 106,
            StatusCode::Stopping => 107,
            StatusCode::Aborting => 108,
            StatusCode::Freezing => 109,
            StatusCode::Frozen => 110,
            StatusCode::Thawed => 111,
            StatusCode::Error => 112,
            StatusCode::Ready => 113,
            StatusCode::Success => 200,
            StatusCode::Failure => 400,
            StatusCode::Cancelled => 401,
        }
    }

    /// Human-readable status string
    pub const fn as_str(self) -> &'static str {
        match self {
            StatusCode::Created => "Operation created",
            StatusCode::Started => "Started",
            StatusCode::Stopped => "Stopped",
            StatusCode::Running => "Running",
            StatusCode::Cancelling => "Cancelling",
            StatusCode::Pending => "Pending",
            StatusCode::Starting => "Starting",
            StatusCode::Stopping => "Stopping",
            StatusCode::Aborting => "Aborting",
            StatusCode::Freezing => "Freezing",
            StatusCode::Frozen => "Frozen",
            StatusCode::Thawed => "Thawed",
            StatusCode::Error => "Error",
            StatusCode::Ready => "Ready",
            StatusCode::Success => "Success",
            StatusCode::Failure => "Failure",
            StatusCode::Cancelled => "Cancelled",
        }
    }

    /// Whether this status ends an operation's lifecycle
    pub const fn is_final(self) -> bool {
        is_final(self.code())
    }
}

/// Finality predicate over raw codes: every code at or above 200 is final.
pub const fn is_final(code: u16) -> bool {
    code >= 200
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

/// Error returned when decoding an integer that is not a known status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown status code {0}")]
pub struct UnknownStatusCode(pub u16);

impl TryFrom<u16> for StatusCode {
    type Error = UnknownStatusCode;

    fn try_from(code: u16) -> Result<Self, UnknownStatusCode> {
        StatusCode::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or(UnknownStatusCode(code))
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
