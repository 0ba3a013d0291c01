pub mod checkpoint;
pub mod common;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod message;
pub mod model;
pub mod objective;
pub mod optim;
pub mod params;
pub mod report;
pub mod trainer;
pub mod updater;
