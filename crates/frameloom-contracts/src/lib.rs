//! Shared data model and pure building blocks for the frameloom pipeline.

pub mod events;
pub mod ids;
pub mod models;
pub mod pricing;
pub mod records;
pub mod store;
