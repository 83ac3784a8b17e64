//! Analysis stages, insight generation and run orchestration.

pub mod centrality;
pub mod community;
pub mod hidden;
pub mod hierarchy;
pub mod influence;
pub mod insights;
pub mod locks;
pub mod network;
pub mod patterns;
pub mod pipeline;

pub use locks::RunLocks;
pub use pipeline::{AnalysisRunResult, Orchestrator};
