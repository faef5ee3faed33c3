pub mod cache;
pub mod content;
pub mod feedback;
pub mod forms;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod stats;
pub mod watcher;
