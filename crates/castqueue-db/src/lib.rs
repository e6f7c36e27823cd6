//! Postgres-backed storage for the castqueue task queue.
//!
//! This crate owns the `tasks` and `episode_failures` tables and exposes the
//! query functions the rest of the system builds on. It knows nothing about
//! handlers, backoff policy, or progress delivery -- those live in
//! `castqueue-core`.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
pub mod tx;
