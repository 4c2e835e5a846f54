//! Data model, wire schemas and run records shared by the try-on engine
//! and its CLI.

pub mod config;
pub mod events;
pub mod jobs;
pub mod providers;
pub mod runs;
pub mod schemas;
