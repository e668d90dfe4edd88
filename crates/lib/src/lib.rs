//! pagebridge core library: Messenger webhook gateway, event dispatch, and the
//! Gemini completion relay used by the CLI.

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod llm;
pub mod relay;
pub mod reply;
