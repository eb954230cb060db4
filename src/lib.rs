// Aggregation topology - discovery and reconciliation of aggregate series in a SensorThings store
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
