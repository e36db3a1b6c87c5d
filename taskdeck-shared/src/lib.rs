//! # Taskdeck Shared Library
//!
//! Domain types, persistence and business rules used by the Taskdeck API server.
//!
//! ## Module Organization
//!
//! - `models`: Database models and queries
//! - `auth`: Passwords, one-time codes, TOTP and project authorization
//! - `services`: Sign-in sequence, projects, invitations, notifications, profile
//! - `session`: Server-side session data and stores (Redis, in-memory)
//! - `mail`: Outbound email
//! - `db`: Connection pool and migrations

pub mod auth;
pub mod db;
pub mod mail;
pub mod models;
pub mod services;
pub mod session;

/// Current version of the Taskdeck shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
