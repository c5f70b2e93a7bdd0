//! NutriLabel scorer: OCR a nutrition label photo and score it with an LLM,
//! optionally personalized by the user's dietary preferences.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod gateways;
pub mod gcp;
pub mod history;
pub mod llm;
pub mod ocr;
pub mod preferences;
pub mod prompt;
pub mod schema;
pub mod scoring;
pub mod server;
pub mod validation;
