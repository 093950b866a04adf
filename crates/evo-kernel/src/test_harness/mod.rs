//! Deterministic harnesses: a scripted in-process backend and the
//! end-to-end evolution simulator built on it.

pub mod scripted;
pub mod simulator;

pub use scripted::{Script, ScriptedBackend};
pub use simulator::{run_simulator, DrySandboxEvaluator, SimulatorConfig, SimulatorReport, Violation};
