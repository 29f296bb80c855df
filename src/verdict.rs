//! The gate's per-request decision.

use std::fmt;

/// Shown to the client when the service could not be consulted under the
/// `fail` fallback policy.
pub const ADVISORY_NOTE: &str = "Could not verify the request against the threat intelligence \
service, the request has been rejected.";

/// Outcome of gating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Continue processing the request.
    Allow,
    /// Terminate with `status`.
    Block { status: u16 },
    /// Terminate with `status`, answering with a redirect to `location`.
    Redirect { status: u16, location: String },
    /// Terminate with a server error. `advisory` may be shown to the client.
    Error {
        status: u16,
        advisory: Option<&'static str>,
    },
}

impl Verdict {
    /// Internal server error with no client-facing detail.
    pub fn internal_error() -> Self {
        Verdict::Error {
            status: 500,
            advisory: None,
        }
    }

    /// Internal server error carrying the advisory note.
    pub fn advisory_error() -> Self {
        Verdict::Error {
            status: 500,
            advisory: Some(ADVISORY_NOTE),
        }
    }

    /// Status the host should terminate the request with, `None` to continue.
    pub fn status(&self) -> Option<u16> {
        match self {
            Verdict::Allow => None,
            Verdict::Block { status }
            | Verdict::Redirect { status, .. }
            | Verdict::Error { status, .. } => Some(*status),
        }
    }

    /// Custom response target for redirects.
    pub fn location(&self) -> Option<&str> {
        match self {
            Verdict::Redirect { location, .. } => Some(location),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => f.write_str("allow"),
            Verdict::Block { status } => write!(f, "block ({})", status),
            Verdict::Redirect { status, location } => {
                write!(f, "redirect ({}) to {}", status, location)
            }
            Verdict::Error { status, .. } => write!(f, "error ({})", status),
        }
    }
}
