pub mod engine;
pub mod history;
pub mod loop_control;
pub mod parser;
pub mod prompts;
pub mod refine;
pub mod state;
