pub mod briefing;
pub mod calibration;
pub mod config;
pub mod db;
pub mod engine;
pub mod fetch;
pub mod llm;
pub mod model;
pub mod paywall;
pub mod prompts;
pub mod summarizer;
