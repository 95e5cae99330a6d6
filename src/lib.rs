pub mod batch;
pub mod canvas;
pub mod config;
pub mod pagination;
pub mod progress;
pub mod watch;
