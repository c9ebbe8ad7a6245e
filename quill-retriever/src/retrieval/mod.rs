pub mod change_tracker;
pub mod indexing_engine;
pub mod orchestrator;
pub mod source;
pub mod vector_index;
