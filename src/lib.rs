pub mod artifacts;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod runlog;
pub mod schema;
pub mod stages;
pub mod warehouse;
