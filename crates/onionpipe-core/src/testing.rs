//! In-memory transport replaying canned responses, for tests and dry runs

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::control::ControlError;
use crate::error::{FetchError, TransportKind};
use crate::transport::{FetchRequest, FetchResponse, Transport};

enum Step {
    Respond {
        status: u16,
        body: String,
        headers: HeaderMap,
    },
    Fail(FetchError),
}

/// Transport that answers requests from a FIFO script.
///
/// Once the script runs out every request fails with a connect error.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<FetchRequest>>,
    rotations: AtomicUsize,
    /// Rotation attempts return an error (still counted)
    pub rotation_fails: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    pub fn respond(self, status: u16, body: impl Into<String>) -> Self {
        self.push(Step::Respond {
            status,
            body: body.into(),
            headers: HeaderMap::new(),
        })
    }

    /// Respond and set a cookie
    pub fn respond_with_cookie(self, status: u16, body: impl Into<String>, cookie: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.append(header::SET_COOKIE, value);
        }
        self.push(Step::Respond {
            status,
            body: body.into(),
            headers,
        })
    }

    pub fn fail(self, error: FetchError) -> Self {
        self.push(Step::Fail(error))
    }

    /// Shorthand for a read timeout
    pub fn timeout(self) -> Self {
        self.fail(FetchError::Transport {
            kind: TransportKind::Timeout,
            message: "operation timed out".into(),
        })
    }

    pub fn failing_rotation(mut self) -> Self {
        self.rotation_fails = true;
        self
    }

    /// Requests seen so far, in order
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_urls(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.url.to_string()).collect()
    }

    pub fn rotations(&self) -> usize {
        self.rotations.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let step = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(Step::Respond {
                status,
                body,
                headers,
            }) => Ok(FetchResponse {
                url: request.url.clone(),
                status,
                headers,
                body,
            }),
            Some(Step::Fail(error)) => Err(error),
            None => Err(FetchError::Transport {
                kind: TransportKind::Connect,
                message: "script exhausted".into(),
            }),
        }
    }

    fn rotate_identity(&self) -> Result<(), ControlError> {
        self.rotations.fetch_add(1, Ordering::Relaxed);
        if self.rotation_fails {
            return Err(ControlError::Protocol("control port unavailable".into()));
        }
        Ok(())
    }
}
