//! Error taxonomy for onion fetches
//!
//! Everything below the retry controller is classified into a [`FetchError`];
//! the controller turns exhausted retries into a terminal [`Failure`]. Only
//! [`SessionError`] is fatal for a run.

/// Low-level transport failure class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    Proxy,
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Proxy => "proxy",
            Self::Other => "transport",
        })
    }
}

/// Error from a single fetch attempt. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connect/timeout/DNS/proxy failure
    Transport {
        kind: TransportKind,
        message: String,
    },
    /// Non-success HTTP status
    Status {
        status: u16,
        /// Body carried an anti-automation challenge marker
        challenge: bool,
        snippet: String,
    },
    /// Malformed or undecodable response body
    Parse(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { kind, message } => write!(f, "{kind} error: {message}"),
            Self::Status {
                status,
                challenge: true,
                ..
            } => write!(f, "HTTP {status} (challenge page)"),
            Self::Status { status, .. } => write!(f, "HTTP {status}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Coarse outcome class of a fetch attempt, used for logs and summaries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Connect,
    Http(u16),
    Challenge,
    Parse,
}

impl FetchError {
    /// Map a reqwest error onto the transport taxonomy.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportKind::Timeout
        } else if e.is_connect() {
            // socks5h failures surface as connect errors mentioning the proxy
            if e.to_string().to_ascii_lowercase().contains("socks") {
                TransportKind::Proxy
            } else {
                TransportKind::Connect
            }
        } else {
            TransportKind::Other
        };
        Self::Transport {
            kind,
            message: e.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport {
                kind: TransportKind::Timeout,
                ..
            } => FailureKind::Timeout,
            Self::Transport { .. } => FailureKind::Connect,
            Self::Status {
                challenge: true, ..
            } => FailureKind::Challenge,
            Self::Status { status, .. } => FailureKind::Http(*status),
            Self::Parse(_) => FailureKind::Parse,
        }
    }

    /// HTTP 400 is the blocking signature that warrants a new circuit.
    pub fn wants_rotation(&self) -> bool {
        matches!(self, Self::Status { status: 400, .. })
    }

    pub fn is_challenge(&self) -> bool {
        matches!(
            self,
            Self::Status {
                challenge: true,
                ..
            }
        )
    }
}

/// Terminal outcome of the retry controller: all attempts used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub last: FetchError,
    pub attempts: u32,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last)
    }
}

impl std::error::Error for Failure {}

/// Session could not be established; fatal for the run.
#[derive(Debug)]
pub enum SessionError {
    /// Entry page fetch failed (transport, status, or body)
    Entry { url: String, source: FetchError },
    /// Entry URL could not be parsed
    InvalidUrl(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entry { url, source } => write!(f, "cannot establish session on {url}: {source}"),
            Self::InvalidUrl(url) => write!(f, "invalid entry URL: {url}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Entry { source, .. } => Some(source),
            Self::InvalidUrl(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, challenge: bool) -> FetchError {
        FetchError::Status {
            status,
            challenge,
            snippet: String::new(),
        }
    }

    #[test]
    fn only_400_wants_rotation() {
        assert!(status(400, false).wants_rotation());
        assert!(status(400, true).wants_rotation());
        assert!(!status(403, false).wants_rotation());
        assert!(!status(503, false).wants_rotation());
        assert!(!FetchError::Parse("bad json".into()).wants_rotation());
    }

    #[test]
    fn kind_classification() {
        let timeout = FetchError::Transport {
            kind: TransportKind::Timeout,
            message: "slow".into(),
        };
        assert_eq!(timeout.kind(), FailureKind::Timeout);
        let proxy = FetchError::Transport {
            kind: TransportKind::Proxy,
            message: "refused".into(),
        };
        assert_eq!(proxy.kind(), FailureKind::Connect);
        assert_eq!(status(502, false).kind(), FailureKind::Http(502));
        assert_eq!(status(400, true).kind(), FailureKind::Challenge);
        assert_eq!(FetchError::Parse("x".into()).kind(), FailureKind::Parse);
    }

    #[test]
    fn display_status() {
        assert_eq!(format!("{}", status(404, false)), "HTTP 404");
        assert_eq!(format!("{}", status(400, true)), "HTTP 400 (challenge page)");
    }

    #[test]
    fn display_transport() {
        let err = FetchError::Transport {
            kind: TransportKind::Connect,
            message: "connection refused".into(),
        };
        assert_eq!(format!("{err}"), "connect error: connection refused");
    }

    #[test]
    fn failure_display_mentions_attempts() {
        let failure = Failure {
            last: status(500, false),
            attempts: 3,
        };
        assert_eq!(format!("{failure}"), "gave up after 3 attempts: HTTP 500");
    }
}
