//! Listing Moderation Service
//!
//! Scores marketplace listings for policy violations. Requests are accepted
//! over HTTP, persisted as moderation tasks in PostgreSQL and handed to a
//! worker through a Redis Streams consumer group; the worker scores each
//! listing and writes the task's terminal state, dead-lettering failures.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod test_dependencies;
