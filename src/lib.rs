pub mod config;
pub mod engine;
pub mod export;
pub mod grid;
pub mod limits;
pub mod model;
pub mod observability;
pub mod recurrence;
pub mod rules;
pub mod wire;
