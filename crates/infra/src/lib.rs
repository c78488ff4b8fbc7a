//! Infrastructure layer: retry, worker pool, database, repositories, config,
//! external service clients.

pub mod config;
pub mod db;
pub mod external;
pub mod repositories;
pub mod retry;
pub mod workers;
