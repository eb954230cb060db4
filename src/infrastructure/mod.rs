// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod memory_store;
pub mod sensorthings_mapper;
pub mod sensorthings_store;
