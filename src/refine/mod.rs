//! The response refinement loop.
//!
//! An initial model answers the question, an evaluator scores the answer, and
//! when the score falls short a panel of models takes turns improving it.

mod refiner;
/// Evaluator reply parsing.
pub mod score;

pub use refiner::{
    DEFAULT_ALERT_ITERATIONS, DEFAULT_EVALUATE_PROMPT, DEFAULT_EVALUATOR_MODEL,
    DEFAULT_IMPROVE_INSTRUCTION, DEFAULT_INITIAL_MODEL, DEFAULT_PANEL, DEFAULT_REPHRASE_PROMPT,
    DEFAULT_THRESHOLD, Prompts, RefineError, RefineOutcome, RefineSettings, Refiner, Round,
};
pub use score::{ScoreParse, ScoreParseError, parse_score};
