pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod model;
pub mod orchestrator;
pub mod polling;
pub mod provider;
pub mod server;
pub mod state;
pub mod strip;
