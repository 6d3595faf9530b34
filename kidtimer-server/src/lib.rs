pub mod engine;
pub mod server;
pub mod storage;
