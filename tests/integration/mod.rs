//! Integration tests for querymux.

pub mod common;
pub mod credentials_test;
pub mod edit_test;
pub mod postgres_test;
pub mod relay_test;
