//! Iterative answer refinement across a panel of hosted language models.
//!
//! A question is answered by an initial model, scored by an evaluator, and
//! passed through the panel until a candidate reaches the quality threshold.

pub mod commands;
pub mod config;
pub mod logging;
pub mod rchain;
pub mod refine;
