//! SpendSense decision core: behavioral signals, persona assignment,
//! recommendation matching and the guardrail chain.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod guardrail;
pub mod model;
pub mod persona;
pub mod rationale;
pub mod recommend;
pub mod signals;
pub mod store;
pub mod summary;
pub mod types;
pub mod window;

pub use config::DecisionConfig;
pub use engine::{DecisionEngine, RecommendationResponse, ResponseMetadata};
pub use error::{PipelineError, PipelineResult};
