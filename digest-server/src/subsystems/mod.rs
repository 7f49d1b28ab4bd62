pub mod classify;
pub mod persist;
pub mod pipeline;
pub mod scoring;
pub mod store;
pub mod synthesize;
