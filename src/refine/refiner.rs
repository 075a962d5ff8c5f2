use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::rchain::provider::{ChatBackend, ProviderError};
use crate::refine::score::{ScoreParse, ScoreParseError, parse_score};

pub const DEFAULT_THRESHOLD: f64 = 0.95;
pub const DEFAULT_ALERT_ITERATIONS: u32 = 20;
pub const DEFAULT_INITIAL_MODEL: &str = "nousresearch/hermes-3-llama-3.1-405b:free";
pub const DEFAULT_EVALUATOR_MODEL: &str = "nousresearch/hermes-3-llama-3.1-405b:free";
pub const DEFAULT_PANEL: [&str; 5] = [
    "nousresearch/hermes-3-llama-3.1-405b:free",
    "liquid/lfm-40b",
    "google/gemini-flash-1.5-exp",
    "meta-llama/llama-3.1-70b-instruct:free",
    "google/gemma-2-9b-it:free",
];

pub const DEFAULT_IMPROVE_INSTRUCTION: &str = "Please improve the response, correcting errors, adding relevant information and refining its quality.";
pub const DEFAULT_EVALUATE_PROMPT: &str = "Rate the following response on a scale from 0 to 1:";
pub const DEFAULT_REPHRASE_PROMPT: &str = "Rewrite this response in a clear and structured way:";

/// Fixed prompt text sent alongside each kind of model call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompts {
    pub improve_instruction: String,
    pub evaluate: String,
    pub rephrase: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            improve_instruction: DEFAULT_IMPROVE_INSTRUCTION.to_string(),
            evaluate: DEFAULT_EVALUATE_PROMPT.to_string(),
            rephrase: DEFAULT_REPHRASE_PROMPT.to_string(),
        }
    }
}

/// Everything the refinement loop needs to know besides the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RefineSettings {
    pub initial_model: String,
    pub evaluator_model: String,
    pub rephrase_model: String,
    pub panel: Vec<String>,
    pub threshold: f64,
    pub alert_iterations: u32,
    pub score_parse: ScoreParse,
    pub prompts: Prompts,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            initial_model: DEFAULT_INITIAL_MODEL.to_string(),
            evaluator_model: DEFAULT_EVALUATOR_MODEL.to_string(),
            rephrase_model: DEFAULT_INITIAL_MODEL.to_string(),
            panel: DEFAULT_PANEL.iter().map(|model| model.to_string()).collect(),
            threshold: DEFAULT_THRESHOLD,
            alert_iterations: DEFAULT_ALERT_ITERATIONS,
            score_parse: ScoreParse::default(),
            prompts: Prompts::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RefineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Score(#[from] ScoreParseError),
}

/// One panel model consulted during the discussion loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Round {
    pub model: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefineOutcome {
    pub response: String,
    pub improvement_count: u32,
    pub threshold_met: bool,
    pub initial_score: f64,
    pub rounds: Vec<Round>,
}

struct Discussion {
    response: String,
    threshold_met: bool,
    rounds: Vec<Round>,
}

/// Generates, scores and iteratively improves an answer.
pub struct Refiner<'a> {
    backend: &'a dyn ChatBackend,
    settings: &'a RefineSettings,
}

impl<'a> Refiner<'a> {
    pub fn new(backend: &'a dyn ChatBackend, settings: &'a RefineSettings) -> Self {
        Self { backend, settings }
    }

    /// Calls `model` with `input`, prefixed by `instruction` on its own line when given.
    pub async fn invoke(
        &self,
        model: &str,
        input: &str,
        instruction: Option<&str>,
    ) -> Result<String, RefineError> {
        let prompt = match instruction.filter(|text| !text.is_empty()) {
            Some(instruction) => format!("{instruction}\n{input}"),
            None => input.to_string(),
        };
        let content = self.backend.complete(model, &prompt).await?;
        Ok(content.trim().to_string())
    }

    pub async fn evaluate(&self, response: &str) -> Result<f64, RefineError> {
        let prompt = format!("{}\n\n{response}", self.settings.prompts.evaluate);
        let reply = self
            .invoke(&self.settings.evaluator_model, &prompt, None)
            .await?;
        let score = parse_score(&reply, self.settings.score_parse)?;
        debug!(model = %self.settings.evaluator_model, score, "evaluated response");
        Ok(score)
    }

    pub async fn rephrase(&self, response: &str) -> Result<String, RefineError> {
        let prompt = format!("{}\n\n{response}", self.settings.prompts.rephrase);
        self.invoke(&self.settings.rephrase_model, &prompt, None)
            .await
    }

    /// Runs the full pipeline for one question.
    pub async fn process_question(&self, question: &str) -> Result<RefineOutcome, RefineError> {
        let initial = self
            .invoke(&self.settings.initial_model, question, None)
            .await?;
        let initial_score = self.evaluate(&initial).await?;
        info!(
            model = %self.settings.initial_model,
            score = initial_score,
            threshold = self.settings.threshold,
            "initial response scored"
        );

        if initial_score >= self.settings.threshold {
            let response = self.rephrase(&initial).await?;
            return Ok(RefineOutcome {
                response,
                improvement_count: 0,
                threshold_met: true,
                initial_score,
                rounds: Vec::new(),
            });
        }

        let discussion = self.run_discussion(initial).await?;
        Ok(RefineOutcome {
            improvement_count: round_count(&discussion.rounds),
            response: discussion.response,
            threshold_met: discussion.threshold_met,
            initial_score,
            rounds: discussion.rounds,
        })
    }

    /// Passes `initial` through the panel until a candidate meets the threshold.
    ///
    /// Returns the final text and the number of panel models consulted. When the
    /// panel runs out, the last candidate comes back without a rephrase.
    pub async fn discuss(&self, initial: &str) -> Result<(String, u32), RefineError> {
        let discussion = self.run_discussion(initial.to_string()).await?;
        Ok((discussion.response, round_count(&discussion.rounds)))
    }

    async fn run_discussion(&self, initial: String) -> Result<Discussion, RefineError> {
        let instruction = self.settings.prompts.improve_instruction.as_str();
        let mut current = initial;
        let mut rounds = Vec::with_capacity(self.settings.panel.len());

        for model in &self.settings.panel {
            let candidate = self.invoke(model, &current, Some(instruction)).await?;
            let score = self.evaluate(&candidate).await?;
            rounds.push(Round {
                model: model.clone(),
                score,
            });
            let improvement_count = round_count(&rounds);
            info!(model = %model, score, improvement_count, "panel round scored");

            if score >= self.settings.threshold {
                let response = self.rephrase(&candidate).await?;
                return Ok(Discussion {
                    response,
                    threshold_met: true,
                    rounds,
                });
            }
            current = candidate;

            if improvement_count >= self.settings.alert_iterations {
                warn!(
                    improvement_count,
                    alert_iterations = self.settings.alert_iterations,
                    "response has been revised at least {} times",
                    self.settings.alert_iterations
                );
            }
        }

        info!(
            panel = self.settings.panel.len(),
            "panel exhausted below threshold; keeping last candidate"
        );
        Ok(Discussion {
            response: current,
            threshold_met: false,
            rounds,
        })
    }
}

fn round_count(rounds: &[Round]) -> u32 {
    u32::try_from(rounds.len()).unwrap_or(u32::MAX)
}
