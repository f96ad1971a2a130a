//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer: upstream rows, collaborator adapters, leaderboard partitions

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{LoadedPartition, PartitionRun, Repository, SeasonTotals};
