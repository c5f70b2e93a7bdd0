//! The analyze pipeline: OCR, text sufficiency check, prompt construction and
//! model orchestration for one label image.

use crate::config::ResponseSpeed;
use crate::error::AnalyzeError;
use crate::gateways::Gateways;
use crate::preferences::{HealthMode, UserPreferences};
use crate::prompt::build_nutrition_prompt;
use crate::schema::ScoreResult;
use crate::scoring::ModelOrchestrator;
use crate::validation::ResponseValidator;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// Preferences as received from the caller.
#[derive(Debug, Clone, Default)]
pub enum PreferenceInput {
    #[default]
    None,
    Structured(UserPreferences),
    /// A directive block already formatted on the device.
    Directive(String),
}

impl PreferenceInput {
    /// Directive text for the prompt plus the health modes the response must score.
    fn resolve(&self) -> (Option<String>, Vec<HealthMode>) {
        match self {
            PreferenceInput::None => (None, Vec::new()),
            PreferenceInput::Structured(prefs) => {
                let directive = prefs.to_directive();
                let directive = (!directive.is_empty()).then_some(directive);
                (directive, prefs.active_health_modes())
            }
            PreferenceInput::Directive(text) => {
                let text = text.trim();
                if text.is_empty() {
                    (None, Vec::new())
                } else {
                    (Some(text.to_string()), HealthMode::parse_directive_keys(text))
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub image: Vec<u8>,
    pub preferences: PreferenceInput,
    pub speed: ResponseSpeed,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub result: ScoreResult,
    pub model: String,
    pub attempts: u32,
    pub ocr_text: String,
    pub image_hash: String,
}

pub struct Analyzer {
    gateways: Arc<Gateways>,
}

impl Analyzer {
    pub fn new(gateways: Arc<Gateways>) -> Self {
        Self { gateways }
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<Analysis, AnalyzeError> {
        let config = self.gateways.config();
        let image_hash = image_hash(&request.image);

        // Step 1: OCR, exactly once.
        let ocr = self
            .gateways
            .ocr()
            .await
            .map_err(|e| AnalyzeError::Misconfigured(format!("{:#}", e)))?;
        let ocr_text = ocr.extract_text(&request.image).await?;
        let ocr_chars = ocr_text.trim().chars().count();
        info!(
            "OCR via {} returned {} characters (image {})",
            ocr.name(),
            ocr_chars,
            image_hash
        );

        // Step 2: enough text to be worth scoring?
        if ocr_chars < config.ocr_min_chars {
            return Err(AnalyzeError::InsufficientText {
                ocr_text,
                min_chars: config.ocr_min_chars,
            });
        }

        // Step 3: preferences and prompt.
        let (directive, required_modes) = request.preferences.resolve();
        debug!(
            "Personalized: {}, required health modes: {:?}",
            directive.is_some(),
            required_modes
        );
        let prompt = build_nutrition_prompt(&ocr_text, directive.as_deref());
        let validator = ResponseValidator::new(required_modes);

        // Step 4: score.
        let llm = self
            .gateways
            .llm()
            .await
            .map_err(|e| AnalyzeError::Misconfigured(format!("{:#}", e)))?;
        let orchestrator = ModelOrchestrator::new(llm, config.scoring_policy(request.speed));
        let scored = orchestrator.score(&prompt, &validator).await?;

        Ok(Analysis {
            result: scored.result,
            model: scored.model,
            attempts: scored.attempts,
            ocr_text,
            image_hash,
        })
    }
}

/// Short content hash identifying an uploaded image in logs and responses.
pub fn image_hash(image: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image);
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(16);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::{Generation, GenerationParams, LlmError, LlmGateway};
    use crate::ocr::{OcrError, OcrProvider};
    use crate::scoring::ScoringError;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedOcr(Result<String, OcrError>);

    #[async_trait::async_trait]
    impl OcrProvider for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn extract_text(&self, _image: &[u8]) -> Result<String, OcrError> {
            self.0.clone()
        }
    }

    /// Returns the same text for every call and remembers prompts and models.
    struct EchoLlm {
        reply: &'static str,
        prompts: Mutex<Vec<String>>,
        models: Mutex<Vec<String>>,
    }

    impl EchoLlm {
        fn new(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
                models: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmGateway for EchoLlm {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            model: &str,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<Generation, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.models.lock().unwrap().push(model.to_string());
            Ok(Generation::text(self.reply))
        }
    }

    const LABEL: &str = "Nutrition Facts\nServing size 1 cup (240ml)\nCalories 120\nTotal Sugars 12g\nProtein 8g";
    const VALID: &str = r#"{"generalScore":6,"generalJustification":"Moderate sugar, good protein"}"#;

    fn analyzer(ocr: Result<String, OcrError>, llm: Arc<EchoLlm>) -> Analyzer {
        let config = AppConfig {
            retry_base_delay: Duration::ZERO,
            ..AppConfig::default()
        };
        Analyzer::new(Arc::new(Gateways::with_handles(
            Arc::new(config),
            Arc::new(FixedOcr(ocr)),
            llm,
        )))
    }

    fn request(preferences: PreferenceInput) -> AnalyzeRequest {
        AnalyzeRequest {
            image: b"fake image bytes".to_vec(),
            preferences,
            speed: ResponseSpeed::Balanced,
        }
    }

    #[tokio::test]
    async fn test_happy_path_without_preferences() {
        let llm = EchoLlm::new(VALID);
        let analysis = analyzer(Ok(LABEL.to_string()), llm.clone())
            .analyze(request(PreferenceInput::None))
            .await
            .unwrap();

        assert_eq!(analysis.result.general_score, 6);
        assert_eq!(analysis.model, "gemini-2.5-pro");
        assert_eq!(analysis.attempts, 1);
        assert_eq!(analysis.ocr_text, LABEL);
        assert_eq!(analysis.image_hash.len(), 16);

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("Calories 120"));
        assert!(!prompts[0].contains("USER PREFERENCES"));
    }

    #[tokio::test]
    async fn test_short_ocr_text_is_insufficient() {
        let llm = EchoLlm::new(VALID);
        let err = analyzer(Ok("  Calories 5  ".to_string()), llm.clone())
            .analyze(request(PreferenceInput::None))
            .await
            .unwrap_err();

        match err {
            AnalyzeError::InsufficientText {
                ocr_text,
                min_chars,
            } => {
                assert_eq!(ocr_text, "  Calories 5  ");
                assert_eq!(min_chars, 40);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ocr_failure_is_propagated() {
        let err = analyzer(Err(OcrError::ApiDisabled), EchoLlm::new(VALID))
            .analyze(request(PreferenceInput::None))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::Ocr(OcrError::ApiDisabled)));
    }

    #[tokio::test]
    async fn test_structured_preferences_require_health_modes() {
        let mut prefs = UserPreferences::default();
        prefs.health_modes.insert(HealthMode::DiabetesFriendly);

        // The reply lacks the required diabetesFriendly score on every attempt.
        let llm = EchoLlm::new(VALID);
        let err = analyzer(Ok(LABEL.to_string()), llm.clone())
            .analyze(request(PreferenceInput::Structured(prefs)))
            .await
            .unwrap_err();

        let AnalyzeError::Scoring(ScoringError::Exhausted { attempts, .. }) = err else {
            panic!("expected scoring failure");
        };
        assert_eq!(attempts, 12);
        assert!(llm.prompts.lock().unwrap()[0].contains("diabetesFriendly"));
    }

    #[tokio::test]
    async fn test_directive_preferences_parsed_for_required_modes() {
        let llm = EchoLlm::new(
            r#"{"generalScore":6,"generalJustification":"ok","healthModeScores":{"diabetesFriendly":{"score":4,"justification":"12g sugar"}}}"#,
        );
        let directive = "HEALTH MODES (ACTIVE - SCORE EACH): Diabetes-friendly (Type 1 / Type 2)\n\
HEALTH MODE KEYS (REQUIRED IN JSON): diabetesFriendly";
        let analysis = analyzer(Ok(LABEL.to_string()), llm.clone())
            .analyze(request(PreferenceInput::Directive(directive.to_string())))
            .await
            .unwrap();

        assert_eq!(analysis.result.health_mode_scores["diabetesFriendly"].score, 4);
        assert!(llm.prompts.lock().unwrap()[0].contains("USER PREFERENCES"));
    }

    #[tokio::test]
    async fn test_speed_selects_candidate_order() {
        let llm = EchoLlm::new(VALID);
        let mut req = request(PreferenceInput::None);
        req.speed = ResponseSpeed::Fast;
        let analysis = analyzer(Ok(LABEL.to_string()), llm.clone())
            .analyze(req)
            .await
            .unwrap();
        assert_eq!(analysis.model, "gemini-2.5-flash-lite");
    }

    #[test]
    fn test_image_hash_is_stable_prefix() {
        let hash = image_hash(b"abc");
        assert_eq!(hash, "ba7816bf8f01cfea");
        assert_eq!(image_hash(b"abc"), hash);
        assert_ne!(image_hash(b"abd"), hash);
    }
}
