//! CLI subcommand implementations

pub mod active;
pub mod evaluate;
pub mod health;
pub mod migrate;
