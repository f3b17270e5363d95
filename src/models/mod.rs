//! Data models module
//!
//! Defines the LLM wire structures, species enrichment results and chat records

pub mod chat;
pub mod gemini;
pub mod species;
