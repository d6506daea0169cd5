pub mod artifacts;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod frame;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod predictor;
pub mod sentiment;
pub mod signals;
pub mod store;
