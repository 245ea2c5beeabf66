pub mod alert;
pub mod analysis;
pub mod config;
pub mod dashboard;
pub mod ingest;
pub mod locations;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod train;
pub mod verify;
