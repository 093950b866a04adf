//! Evo Fitness - scoring agent output
//!
//! A fitness score combines five independent signals: the code parses, the
//! code runs cleanly in a sandbox, the code avoids dangerous operations, the
//! agent reasoned in enough steps, and it did so cheaply. See
//! [`evaluator`] for the formula.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod evaluator;
pub mod sandbox;
pub mod security;

pub use evaluator::{Evaluate, FitnessEvaluator, FitnessReport};
pub use sandbox::{delimiters_balanced, CodeSandbox, SandboxOutcome};
pub use security::{SecurityFinding, SecurityScanner};
