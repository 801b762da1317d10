//! Durable session log storage

mod file;

pub use file::FileLogStore;
