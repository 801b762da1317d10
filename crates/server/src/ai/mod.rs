//! LLM features: provider transport and the interview collaborator

pub mod client;
pub mod interviewer;

pub use client::{ClientError, LlmClient, Provider};
pub use interviewer::LlmInterviewer;
