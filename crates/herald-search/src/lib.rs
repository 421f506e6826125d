//! AI-backed topic search.
//!
//! Topic tasks hand their payload (a natural-language query) to a
//! [`SearchProvider`]; the production provider is [`GeminiSearch`], which asks
//! Gemini with Google-search grounding enabled.

pub mod error;
pub mod gemini;
pub mod provider;

pub use error::{Result, SearchError};
pub use gemini::GeminiSearch;
pub use provider::{search_or_none, SearchProvider};
