pub mod change_stream;
pub mod indexer;
pub mod scanner;
pub mod task;
