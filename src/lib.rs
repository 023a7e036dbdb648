// Public API for the CLI driver and integration tests

pub mod creator;
pub mod gateway;
pub mod llm;
pub mod notice;
pub mod session;
pub mod state;
pub mod sync;
pub mod types;
