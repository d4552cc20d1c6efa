//! PostgreSQL storage for TestMaster: row models, embedded migrations,
//! pool management, and per-table query functions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
