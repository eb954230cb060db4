// Domain layer - aggregation levels, edges, groups and the discovered topology
pub mod aggregate_edge;
pub mod aggregation_group;
pub mod aggregation_level;
pub mod cross_reference;
pub mod naming;
pub mod series;
pub mod time_bucket;
pub mod topology;
