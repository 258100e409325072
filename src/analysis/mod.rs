//! Aggregation of agent responses into a query result.

pub mod aggregator;

pub use aggregator::*;
