// Presentation layer - HTTP routes over the aggregation service
pub mod app_state;
pub mod handlers;
