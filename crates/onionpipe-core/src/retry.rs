//! Bounded retry with linear backoff and identity rotation on HTTP 400

use std::time::{Duration, Instant};

use reqwest::Url;

use crate::error::{Failure, FailureKind, FetchError};
use crate::pacing::Pacing;
use crate::record::ExtractError;
use crate::session::Session;
use crate::transport::{Transport, snippet};

/// Retry limits and challenge detection
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries per request, including the first
    pub max_attempts: u32,
    /// Case-insensitive substrings marking an anti-bot challenge page
    pub challenge_markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            challenge_markers: vec!["captcha".to_string()],
        }
    }
}

impl RetryPolicy {
    pub fn is_challenge(&self, body: &str) -> bool {
        let lower = body.to_lowercase();
        self.challenge_markers
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()))
    }
}

/// Successful fetch and how many attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: u32,
}

impl<T> Fetched<T> {
    /// Success came only after at least one failed attempt
    pub fn recovered(&self) -> bool {
        self.attempts > 1
    }
}

/// Outcome of one try
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(FailureKind),
}

/// Ephemeral record of one try; logged, never persisted
#[derive(Debug, Clone)]
pub struct FetchAttempt<'a> {
    pub url: &'a Url,
    pub attempt: u32,
    pub max_attempts: u32,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

impl FetchAttempt<'_> {
    fn log(&self, error: Option<&FetchError>) {
        match (self.outcome, error) {
            (AttemptOutcome::Success, _) => log::debug!(
                "[{}/{}] {} ok in {:.1}s",
                self.attempt,
                self.max_attempts,
                self.url,
                self.latency.as_secs_f64()
            ),
            (AttemptOutcome::Failed(_), Some(e)) => log::warn!(
                "[{}/{}] {} failed after {:.1}s: {e}",
                self.attempt,
                self.max_attempts,
                self.url,
                self.latency.as_secs_f64()
            ),
            (AttemptOutcome::Failed(kind), None) => log::warn!(
                "[{}/{}] {} failed: {kind:?}",
                self.attempt,
                self.max_attempts,
                self.url
            ),
        }
    }
}

/// Wraps single requests with retries. Never propagates past its boundary:
/// exhaustion becomes a [`Failure`] value.
pub struct RetryController<'a, T: Transport> {
    transport: &'a T,
    policy: RetryPolicy,
    pacing: Pacing,
}

impl<'a, T: Transport> RetryController<'a, T> {
    pub fn new(transport: &'a T, policy: RetryPolicy, pacing: Pacing) -> Self {
        Self {
            transport,
            policy,
            pacing,
        }
    }

    pub fn pacing(&self) -> &Pacing {
        &self.pacing
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch a page body.
    pub fn attempt(&self, url: &Url, session: &mut Session) -> Result<Fetched<String>, Failure> {
        self.attempt_with(url, session, |body| Ok(body.to_string()))
    }

    /// Fetch and decode; decode failures are retried like transport errors.
    ///
    /// After failed attempt `i` sleeps `i * backoff_base`. An HTTP 400 also
    /// rotates the circuit first, unless it was the last attempt.
    pub fn attempt_with<V>(
        &self,
        url: &Url,
        session: &mut Session,
        mut decode: impl FnMut(&str) -> Result<V, ExtractError>,
    ) -> Result<Fetched<V>, Failure> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            let started = Instant::now();
            let result = self.try_once(url, session, &mut decode);
            let mut record = FetchAttempt {
                url,
                attempt,
                max_attempts,
                outcome: AttemptOutcome::Success,
                latency: started.elapsed(),
            };

            let err = match result {
                Ok(value) => {
                    record.log(None);
                    if attempt > 1 {
                        log::info!("{url}: recovered on attempt {attempt}/{max_attempts}");
                    }
                    return Ok(Fetched { value, attempts: attempt });
                }
                Err(err) => err,
            };

            record.outcome = AttemptOutcome::Failed(err.kind());
            record.log(Some(&err));

            if err.is_challenge() {
                log::warn!("{url}: challenge page detected, manual intervention may be required");
            }
            if err.wants_rotation() && attempt < max_attempts {
                log::info!("{url}: HTTP 400, renewing Tor identity");
                if let Err(e) = self.transport.rotate_identity() {
                    log::warn!("Identity rotation failed, retrying on current circuit: {e}");
                }
            }
            self.pacing.wait_backoff(attempt);

            if attempt >= max_attempts {
                log::error!("{url}: failed permanently: {err}");
                return Err(Failure {
                    last: err,
                    attempts: attempt,
                });
            }
            attempt += 1;
        }
    }

    fn try_once<V>(
        &self,
        url: &Url,
        session: &mut Session,
        decode: &mut impl FnMut(&str) -> Result<V, ExtractError>,
    ) -> Result<V, FetchError> {
        let response = self.transport.send(&session.request(url.clone()))?;
        session.absorb_cookies(&response);

        if !response.is_success() {
            let challenge = response.status == 400 && self.policy.is_challenge(&response.body);
            if response.status == 400 {
                log::debug!("400 body: {}", snippet(&response.body));
            }
            return Err(FetchError::Status {
                status: response.status,
                challenge,
                snippet: snippet(&response.body),
            });
        }

        // Tokens may rotate per response
        session.refresh_token(&response.body);
        decode(&response.body).map_err(|e| FetchError::Parse(e.0))
    }
}
