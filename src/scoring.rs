//! Model orchestration: tries scoring candidates in priority order with bounded
//! retries, linear backoff and a per-attempt timeout.
//!
//! The control flow is an explicit loop over `(candidate, attempt)` state. Every
//! failed attempt goes through [`classify`], which decides whether to retry the
//! same candidate or advance to the next one. The only non-error outcome is a
//! fully validated [`ScoreResult`].

use crate::llm::{GenerationParams, LlmError, LlmGateway};
use crate::schema::ScoreResult;
use crate::validation::{ResponseValidator, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Candidate ordering used when the caller supplies none.
pub const DEFAULT_CANDIDATES: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash-lite",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
];

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Retry and fallback policy for one scoring run.
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    pub candidates: Vec<String>,
    /// Retries per candidate after the first attempt.
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    /// Retry `n` (0-based) waits `base_delay * (n + 1)`.
    pub base_delay: Duration,
    pub generation: GenerationParams,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            base_delay: DEFAULT_BASE_DELAY,
            generation: GenerationParams::default(),
        }
    }
}

impl ScoringPolicy {
    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// First attempt plus retries, for one candidate.
    pub fn attempts_per_candidate(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Candidates in priority order, falling back to [`DEFAULT_CANDIDATES`].
    pub fn effective_candidates(&self) -> Vec<String> {
        let configured: Vec<String> = self
            .candidates
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if configured.is_empty() {
            DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect()
        } else {
            configured
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("empty response from model")]
    EmptyResponse,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl AttemptError {
    /// Whether the error says the candidate itself cannot serve requests
    /// (unknown or unsupported model), as opposed to a transient failure.
    pub fn is_candidate_unavailable(&self) -> bool {
        match self {
            AttemptError::Llm(LlmError::Api { status: 404, .. }) => true,
            AttemptError::Llm(err) => {
                let message = err.to_string();
                let lower = message.to_lowercase();
                message.contains("404")
                    || message.contains("NOT_FOUND")
                    || lower.contains("not found")
                    || lower.contains("unsupported model")
                    || lower.contains("is not supported")
            }
            _ => false,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait, then try the same candidate again.
    Retry,
    /// Give up on this candidate and move to the next one.
    Advance,
}

/// Decide the next step after attempt `attempt` (0-based) failed with `err`.
pub fn classify(err: &AttemptError, attempt: u32, max_retries: u32) -> Decision {
    if err.is_candidate_unavailable() || attempt >= max_retries {
        Decision::Advance
    } else {
        Decision::Retry
    }
}

/// Linear backoff before retry `attempt` (0-based).
pub fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(attempt.saturating_add(1))
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error(
        "scoring failed after trying {candidates} model candidate(s) and {attempts} attempt(s): {last_error}"
    )]
    Exhausted {
        candidates: usize,
        attempts: u32,
        last_error: String,
    },
}

/// A validated result and how it was obtained.
#[derive(Debug, Clone)]
pub struct Scored {
    pub result: ScoreResult,
    pub model: String,
    /// Total attempts across all candidates, including the successful one.
    pub attempts: u32,
}

/// Drives an [`LlmGateway`] through the candidate list until one response
/// validates.
pub struct ModelOrchestrator {
    gateway: Arc<dyn LlmGateway>,
    policy: ScoringPolicy,
}

impl ModelOrchestrator {
    pub fn new(gateway: Arc<dyn LlmGateway>, policy: ScoringPolicy) -> Self {
        Self { gateway, policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub async fn score(
        &self,
        prompt: &str,
        validator: &ResponseValidator,
    ) -> Result<Scored, ScoringError> {
        let candidates = self.policy.effective_candidates();
        let max_retries = self.policy.max_retries;

        info!(
            "Model candidates to try: {} (max {} attempt(s) each, timeout {:?})",
            candidates.join(", "),
            self.policy.attempts_per_candidate(),
            self.policy.attempt_timeout
        );

        let mut candidate_idx = 0;
        let mut attempt: u32 = 0;
        let mut attempts_made: u32 = 0;
        let mut last_error: Option<AttemptError> = None;

        while let Some(model) = candidates.get(candidate_idx) {
            attempts_made = attempts_made.saturating_add(1);
            info!(
                "Attempt {}/{} with model '{}' ({}/{})",
                attempt + 1,
                self.policy.attempts_per_candidate(),
                model,
                candidate_idx + 1,
                candidates.len()
            );

            let err = match self.attempt(model, prompt, validator).await {
                Ok(result) => {
                    info!(
                        "Scoring succeeded with model '{}' after {} attempt(s)",
                        model, attempts_made
                    );
                    return Ok(Scored {
                        result,
                        model: model.clone(),
                        attempts: attempts_made,
                    });
                }
                Err(err) => err,
            };

            match classify(&err, attempt, max_retries) {
                Decision::Retry => {
                    let delay = backoff_delay(self.policy.base_delay, attempt);
                    warn!(
                        "Attempt {} failed with model '{}': {}. Retrying in {:?}",
                        attempt + 1,
                        model,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Decision::Advance => {
                    if err.is_candidate_unavailable() {
                        warn!("Model '{}' unavailable ({}), trying next candidate", model, err);
                    } else {
                        warn!(
                            "All {} attempt(s) failed with model '{}', last error: {}",
                            attempt + 1,
                            model,
                            err
                        );
                    }
                    candidate_idx += 1;
                    attempt = 0;
                }
            }
            last_error = Some(err);
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no model candidates configured".to_string());
        error!(
            "Scoring exhausted {} candidate(s) after {} attempt(s): {}",
            candidates.len(),
            attempts_made,
            last_error
        );

        Err(ScoringError::Exhausted {
            candidates: candidates.len(),
            attempts: attempts_made,
            last_error,
        })
    }

    async fn attempt(
        &self,
        model: &str,
        prompt: &str,
        validator: &ResponseValidator,
    ) -> Result<ScoreResult, AttemptError> {
        let timeout = self.policy.attempt_timeout;

        // Dropping the timed-out future drops the in-flight HTTP request; the
        // provider may still finish (and bill) the call on its side.
        let generation = tokio::time::timeout(
            timeout,
            self.gateway.generate(model, prompt, &self.policy.generation),
        )
        .await
        .map_err(|_| AttemptError::Timeout(timeout))??;

        if let Some(reason) = generation.finish_reason.as_deref() {
            if reason == "MAX_TOKENS" || reason == "OTHER" {
                warn!("Response may be truncated (finishReason: {})", reason);
            }
        }

        debug!("Response text length: {} characters", generation.text.len());
        if generation.text.trim().is_empty() {
            return Err(AttemptError::EmptyResponse);
        }

        Ok(validator.validate(&generation.text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Generation;
    use crate::preferences::HealthMode;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const VALID: &str = r#"{"generalScore":7,"generalJustification":"Balanced macros"}"#;

    enum Reply {
        Text(&'static str),
        NotFound,
        ServerError,
        Hang,
    }

    /// Replays scripted replies per model and records every call.
    struct ScriptedGateway {
        scripts: Mutex<Vec<(String, VecDeque<Reply>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn new(scripts: Vec<(&str, Vec<Reply>)>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(
                    scripts
                        .into_iter()
                        .map(|(m, r)| (m.to_string(), r.into_iter().collect()))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl LlmGateway for ScriptedGateway {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            model: &str,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<Generation, LlmError> {
            self.calls.lock().unwrap().push(model.to_string());
            let reply = {
                let mut scripts = self.scripts.lock().unwrap();
                scripts
                    .iter_mut()
                    .find(|(m, _)| m == model)
                    .and_then(|(_, replies)| replies.pop_front())
            };
            match reply {
                Some(Reply::Text(text)) => Ok(Generation::text(text)),
                Some(Reply::NotFound) => Err(LlmError::Api {
                    status: 404,
                    message: format!("Publisher Model `{}` was not found", model),
                }),
                Some(Reply::ServerError) | None => Err(LlmError::Api {
                    status: 503,
                    message: "UNAVAILABLE: try again later".to_string(),
                }),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Generation::text(VALID))
                }
            }
        }
    }

    fn fast_policy(candidates: &[&str]) -> ScoringPolicy {
        ScoringPolicy {
            base_delay: Duration::ZERO,
            ..ScoringPolicy::default()
        }
        .with_candidates(candidates.iter().copied())
    }

    #[tokio::test]
    async fn test_not_found_skips_to_next_candidate() {
        let gateway = ScriptedGateway::new(vec![
            ("model-a", vec![Reply::NotFound]),
            ("model-b", vec![Reply::NotFound]),
            ("model-c", vec![Reply::Text(VALID)]),
        ]);
        let orchestrator = ModelOrchestrator::new(
            gateway.clone(),
            fast_policy(&["model-a", "model-b", "model-c"]),
        );

        let scored = orchestrator
            .score("prompt", &ResponseValidator::default())
            .await
            .unwrap();

        assert_eq!(scored.model, "model-c");
        assert_eq!(scored.attempts, 3);
        assert_eq!(scored.result.general_score, 7);
        assert_eq!(gateway.calls(), vec!["model-a", "model-b", "model-c"]);
    }

    #[tokio::test]
    async fn test_malformed_output_exhausts_retries() {
        let gateway = ScriptedGateway::new(vec![(
            "only-model",
            vec![
                Reply::Text("not json"),
                Reply::Text("{\"generalScore\": 7,"),
                Reply::Text("Sure! Here is the JSON you asked for."),
            ],
        )]);
        let orchestrator = ModelOrchestrator::new(gateway.clone(), fast_policy(&["only-model"]));

        let err = orchestrator
            .score("prompt", &ResponseValidator::default())
            .await
            .unwrap_err();

        let ScoringError::Exhausted {
            candidates,
            attempts,
            last_error,
        } = err;
        assert_eq!(candidates, 1);
        assert_eq!(attempts, 3);
        assert!(last_error.contains("not valid JSON"));
        assert_eq!(gateway.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_schema_violation_retries_same_candidate() {
        let gateway = ScriptedGateway::new(vec![(
            "model-a",
            vec![
                Reply::Text(r#"{"generalScore":7,"generalJustification":"ok"}"#),
                Reply::Text(
                    r#"{"generalScore":7,"generalJustification":"ok","healthModeScores":{"diabetesFriendly":{"score":3,"justification":"sugar"}}}"#,
                ),
            ],
        )]);
        let orchestrator = ModelOrchestrator::new(gateway.clone(), fast_policy(&["model-a"]));
        let validator = ResponseValidator::new(vec![HealthMode::DiabetesFriendly]);

        let scored = orchestrator.score("prompt", &validator).await.unwrap();
        assert_eq!(scored.attempts, 2);
        assert_eq!(scored.result.health_mode_scores["diabetesFriendly"].score, 3);
    }

    #[tokio::test]
    async fn test_transient_errors_then_advance() {
        let gateway = ScriptedGateway::new(vec![
            (
                "model-a",
                vec![Reply::ServerError, Reply::ServerError, Reply::ServerError],
            ),
            ("model-b", vec![Reply::Text("")]),
        ]);
        let orchestrator =
            ModelOrchestrator::new(gateway.clone(), fast_policy(&["model-a", "model-b"]));

        let err = orchestrator
            .score("prompt", &ResponseValidator::default())
            .await
            .unwrap_err();
        let ScoringError::Exhausted {
            candidates,
            attempts,
            ..
        } = err;
        assert_eq!(candidates, 2);
        // model-b: one empty response, then two unscripted 503s.
        assert_eq!(attempts, 6);
        assert_eq!(
            gateway.calls(),
            vec!["model-a", "model-a", "model-a", "model-b", "model-b", "model-b"]
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable_attempt() {
        let gateway = ScriptedGateway::new(vec![("slow", vec![Reply::Hang, Reply::Text(VALID)])]);
        let policy = ScoringPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..fast_policy(&["slow"])
        };
        let orchestrator = ModelOrchestrator::new(gateway.clone(), policy);

        let scored = orchestrator
            .score("prompt", &ResponseValidator::default())
            .await
            .unwrap();
        assert_eq!(scored.attempts, 2);
        assert_eq!(scored.model, "slow");
    }

    #[test]
    fn test_classify_decisions() {
        let transient = AttemptError::EmptyResponse;
        assert_eq!(classify(&transient, 0, 2), Decision::Retry);
        assert_eq!(classify(&transient, 1, 2), Decision::Retry);
        assert_eq!(classify(&transient, 2, 2), Decision::Advance);

        let missing = AttemptError::Llm(LlmError::Api {
            status: 400,
            message: "model gemini-9 is not supported".to_string(),
        });
        assert_eq!(classify(&missing, 0, 2), Decision::Advance);

        let not_found = AttemptError::Llm(LlmError::Transport("NOT_FOUND".to_string()));
        assert_eq!(classify(&not_found, 0, 2), Decision::Advance);

        let invalid = AttemptError::Invalid(ValidationError::SchemaViolation(
            "field not found in output".to_string(),
        ));
        assert_eq!(classify(&invalid, 0, 2), Decision::Retry);
    }

    #[test]
    fn test_backoff_is_linear() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(3000));
    }

    #[test]
    fn test_attempts_per_candidate_saturates() {
        assert_eq!(ScoringPolicy::default().attempts_per_candidate(), 3);

        let policy = ScoringPolicy {
            max_retries: u32::MAX,
            ..ScoringPolicy::default()
        };
        assert_eq!(policy.attempts_per_candidate(), u32::MAX);
        let transient = AttemptError::EmptyResponse;
        assert_eq!(classify(&transient, u32::MAX - 1, u32::MAX), Decision::Retry);
        assert_eq!(classify(&transient, u32::MAX, u32::MAX), Decision::Advance);
    }

    #[tokio::test]
    async fn test_huge_retry_budget_still_scores() {
        let gateway = ScriptedGateway::new(vec![(
            "model-a",
            vec![Reply::ServerError, Reply::Text(VALID)],
        )]);
        let policy = ScoringPolicy {
            max_retries: u32::MAX,
            ..fast_policy(&["model-a"])
        };
        let orchestrator = ModelOrchestrator::new(gateway.clone(), policy);

        let scored = orchestrator
            .score("prompt", &ResponseValidator::default())
            .await
            .unwrap();
        assert_eq!(scored.attempts, 2);
    }

    #[test]
    fn test_empty_candidates_fall_back_to_defaults() {
        let policy = ScoringPolicy::default().with_candidates(["  ", ""]);
        assert_eq!(policy.effective_candidates(), DEFAULT_CANDIDATES);

        let policy = ScoringPolicy::default().with_candidates([" gemini-2.0-flash "]);
        assert_eq!(policy.effective_candidates(), vec!["gemini-2.0-flash"]);
    }
}
