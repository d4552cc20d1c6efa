//! Query functions, one module per table group.

pub mod cases;
pub mod executions;
pub mod plans;
pub mod settings;
pub mod users;
