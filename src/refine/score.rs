use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static FIRST_MATCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d\.\d)").expect("score pattern is valid"));

static ANY_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"));

/// How a score is pulled out of the evaluator's free-text reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreParse {
    /// First `d.d` substring anywhere in the reply, taken as-is.
    #[default]
    FirstMatch,
    /// First number in the reply whose value lies in `[0, 1]`.
    Lenient,
}

impl ScoreParse {
    pub const SUPPORTED: &'static str = "first-match, lenient";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstMatch => "first-match",
            Self::Lenient => "lenient",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "first-match" => Some(Self::FirstMatch),
            "lenient" => Some(Self::Lenient),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("could not extract a numeric score from evaluator reply: {reply}")]
pub struct ScoreParseError {
    pub reply: String,
}

pub fn parse_score(reply: &str, mode: ScoreParse) -> Result<f64, ScoreParseError> {
    let score = match mode {
        ScoreParse::FirstMatch => FIRST_MATCH
            .find(reply)
            .and_then(|found| found.as_str().parse::<f64>().ok()),
        ScoreParse::Lenient => ANY_NUMBER
            .find_iter(reply)
            .filter_map(|found| found.as_str().parse::<f64>().ok())
            .find(|value| (0.0..=1.0).contains(value)),
    };

    score.ok_or_else(|| ScoreParseError {
        reply: reply.to_string(),
    })
}
