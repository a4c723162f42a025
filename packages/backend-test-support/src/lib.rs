//! Test helpers shared by the backend and db-infra test suites.

pub mod problem_details;
pub mod test_logging;
