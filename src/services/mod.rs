pub mod engine;
pub mod orchestrator;
pub mod result_store;
pub mod sweeper;
pub mod text_render;
pub mod validator;
