//! Rating and ranking core for SchoolChecker.io, with the Postgres store and
//! reporting used by the `schoolchecker` command.

pub mod config;
pub mod db;
pub mod models;
pub mod ranking;
pub mod rating;
pub mod report;
pub mod telemetry;
