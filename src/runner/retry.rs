//! Narrow retry for failure-prone sub-operations.
//!
//! Retries are local to one sub-operation (file-visibility verification,
//! short one-shot description calls) and never wrap the main streaming
//! run. Criteria are explicit: a known transient error substring, empty
//! output, or output that looks hallucinated relative to the request.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::EngineError;

/// Output longer than this with no overlap with the request terms is
/// treated as off-topic boilerplate.
const SUSPICIOUS_LENGTH: usize = 600;

/// Why an attempt's result was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FailureKind {
    /// A known transient OS/pipe error; the same call usually succeeds
    /// moments later.
    Transient(String),
    /// The process exited cleanly but produced nothing.
    EmptyOutput,
    /// Long output mentioning none of the request's terms.
    Suspicious { length: usize },
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "transient error: {msg}"),
            Self::EmptyOutput => write!(f, "empty output"),
            Self::Suspicious { length } => {
                write!(f, "suspicious output ({length} bytes, off-topic)")
            }
        }
    }
}

/// Fixed policy: how many total attempts and the pause between them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_millis(500),
        }
    }
}

/// Classifies a failed attempt, or `None` when the result is acceptable.
///
/// `request_terms` are the significant words of the request (see
/// [`crate::messages::request_terms`]); an empty list disables the
/// suspicious-output check since there is nothing to correlate against.
pub(crate) fn classify_output(output: &str, request_terms: &[String]) -> Option<FailureKind> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Some(FailureKind::EmptyOutput);
    }

    if trimmed.len() > SUSPICIOUS_LENGTH && !request_terms.is_empty() {
        let lower = trimmed.to_lowercase();
        let on_topic = request_terms.iter().any(|term| lower.contains(term));
        if !on_topic {
            return Some(FailureKind::Suspicious {
                length: trimmed.len(),
            });
        }
    }

    None
}

/// Classifies an error from an attempt: transient errors are retryable,
/// everything else propagates immediately.
pub(crate) fn classify_error(err: &EngineError) -> Option<FailureKind> {
    if err.is_transient() {
        Some(FailureKind::Transient(err.to_string()))
    } else {
        None
    }
}

/// Runs `attempt` up to `policy.max_attempts` times, re-trying only on the
/// narrow criteria above. The final attempt's outcome is returned as-is.
pub(crate) async fn run_with_retry<F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    request_terms: &[String],
    mut attempt: F,
) -> Result<String, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, EngineError>>,
{
    let mut last: Option<Result<String, EngineError>> = None;

    for n in 1..=policy.max_attempts {
        if n > 1 {
            tokio::time::sleep(policy.delay).await;
        }

        match attempt().await {
            Ok(output) => match classify_output(&output, request_terms) {
                None => {
                    if n > 1 {
                        debug!("{operation} succeeded on attempt {n}");
                    }
                    return Ok(output);
                }
                Some(kind) => {
                    warn!("{operation} attempt {n}/{} rejected: {kind}", policy.max_attempts);
                    last = Some(Ok(output));
                }
            },
            Err(err) => match classify_error(&err) {
                Some(kind) => {
                    warn!("{operation} attempt {n}/{} failed: {kind}", policy.max_attempts);
                    last = Some(Err(err));
                }
                None => return Err(err),
            },
        }
    }

    // All attempts exhausted: surface whatever the final attempt produced.
    last.unwrap_or_else(|| {
        Err(EngineError::process_exit(
            None,
            format!("{operation}: no attempts were made"),
        ))
    })
}
