/// Middleware modules for the API server
///
/// This module contains custom middleware for:
/// - Security headers
/// - Server-side sessions and the signed-in user extractor

pub mod security;
pub mod session;
