//! Integration tests exercising the cache engine and the IPC server together
//! across module boundaries, complementing the unit tests embedded in
//! `cache.rs`, `snapshot/mod.rs`, and `server/mod.rs`.

mod cases_snapshot_flow_test;
mod cases_ttl_and_eviction_test;

pub mod support;
