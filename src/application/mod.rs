// Application layer - discovery, reconciliation and recompute routing over the entity store
pub mod aggregation_service;
pub mod entity_store;
pub mod progress;
pub mod recompute_router;
pub mod reconciler;
pub mod topology_discoverer;
