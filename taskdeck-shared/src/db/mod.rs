/// Database layer for Taskdeck
///
/// # Modules
///
/// - `pool`: PostgreSQL connection pool with health checks
/// - `migrations`: Embedded migration runner
/// - Models are in the `models` module at crate root level

pub mod migrations;
pub mod pool;
