//! ProcessViz: decompose an industrial process into steps with a generative
//! model, then illustrate and narrate those steps one approved step at a time.

pub mod config;
pub mod error;
pub mod gemini;
pub mod models;
pub mod orchestrator;
pub mod pdf;
pub mod prompts;
pub mod provider;
pub mod repository;
pub mod results;
pub mod routes;
pub mod session;

pub use error::{DecompositionError, GenerationError, WizardError};
pub use orchestrator::{Approval, AssetRequest, GenerationState, Orchestrator, Ticket};
pub use session::{Session, Stage};
