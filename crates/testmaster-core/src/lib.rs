//! TestMaster domain logic: AI-assisted generation of test plans, cases and
//! executions, the human review workflow for batch output, and role-based
//! access control.

pub mod ai;
pub mod confirm;
pub mod generate;
pub mod permission;
pub mod records;
pub mod report;
pub mod review;
pub mod storage;
