//! # Database Connection
//!
//! Construction of the single Postgres pool shared by the pgmq queue client
//! and the persisted-state store.

pub mod connection;

pub use connection::DatabaseConnection;
