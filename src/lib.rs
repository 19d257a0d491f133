pub mod config;
pub mod dashboard;
pub mod error;
pub mod monitor;
pub mod node;
pub mod observer;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod storage;
