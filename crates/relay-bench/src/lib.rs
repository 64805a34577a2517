//! Benchmarks for the Relay broadcast server.
//!
//! - `benches/fanout.rs`: hub fan-out and registry passes
//! - `src/bin/e2e_throughput.rs`: end-to-end throughput against a running server
