pub mod block;
pub mod categorize;
pub mod config;
pub mod fields;
pub mod formatter;
pub mod fragment;
pub mod loot;
pub mod mediawiki;
pub mod orchestrator;
pub mod progress;
pub mod runtime;
pub mod schema;
pub mod steps;
pub mod updater;
