//! Keyword matching for the ethics filter and publication gatekeeper.

pub mod redaction;

pub use redaction::{read_terms, KeywordRedactor, DEFAULT_REDACTION_MARKER};
