//! Sequential connection negotiation over an ordered candidate list.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::transport::{AttemptFailure, Connector, Transport};
use crate::core::token::CandidateEndpoint;

/// One failed candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based position in the candidate list
    pub index: usize,
    pub label: String,
    pub host: String,
    pub failure: AttemptFailure,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}@{}: {}", self.index, self.label, self.host, self.failure)
    }
}

/// No candidate accepted the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("no candidate endpoints to try")]
    NoCandidates,

    #[error("{}", join_attempts(.attempts))]
    AllFailed { attempts: Vec<AttemptRecord> },
}

impl NegotiationError {
    /// Per-candidate diagnostics, in attempt order.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            NegotiationError::NoCandidates => &[],
            NegotiationError::AllFailed { attempts } => attempts,
        }
    }
}

fn join_attempts(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A transport that opened, and which candidate it came from.
pub struct Negotiated {
    pub transport: Box<dyn Transport>,
    pub endpoint: CandidateEndpoint,
    /// 1-based position of the winning candidate
    pub index: usize,
    /// Candidates that failed before this one
    pub failed: Vec<AttemptRecord>,
}

impl fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiated")
            .field("endpoint", &self.endpoint)
            .field("index", &self.index)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// Tries candidates strictly in order, one at a time, until one opens.
///
/// Nothing is remembered between calls: every `connect` starts from the
/// top of the list it is given.
#[derive(Clone)]
pub struct ConnectionNegotiator {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl ConnectionNegotiator {
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn connect(
        &self,
        candidates: &[CandidateEndpoint],
    ) -> Result<Negotiated, NegotiationError> {
        if candidates.is_empty() {
            return Err(NegotiationError::NoCandidates);
        }

        let mut failed = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let index = i + 1;
            let host = candidate.host();
            debug!(
                attempt = index,
                total = candidates.len(),
                strategy = %candidate.label,
                host = %host,
                "Trying realtime endpoint"
            );

            let outcome = match tokio::time::timeout(self.timeout, self.connector.open(candidate)).await {
                Ok(result) => result,
                Err(_) => Err(AttemptFailure::Timeout(self.timeout)),
            };

            match outcome {
                Ok(transport) => {
                    info!(
                        attempt = index,
                        strategy = %candidate.label,
                        host = %host,
                        "Realtime connection established"
                    );
                    return Ok(Negotiated {
                        transport,
                        endpoint: candidate.clone(),
                        index,
                        failed,
                    });
                }
                Err(failure) => {
                    warn!(
                        attempt = index,
                        strategy = %candidate.label,
                        host = %host,
                        "Realtime endpoint rejected: {}",
                        failure
                    );
                    failed.push(AttemptRecord {
                        index,
                        label: candidate.label.clone(),
                        host,
                        failure,
                    });
                }
            }
        }

        Err(NegotiationError::AllFailed { attempts: failed })
    }
}
