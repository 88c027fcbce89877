//! Database queries

pub mod job;
