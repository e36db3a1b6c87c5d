//! # Taskdeck API Server Library
//!
//! HTTP layer of Taskdeck: sign-in sequence, dashboard, project boards and
//! invitations on top of the services in `taskdeck-shared`.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Sessions and security headers
//! - `routes`: Route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
