pub mod collector;
pub mod orchestrator;
