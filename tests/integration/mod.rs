//! Integration tests for KMS
//!
//! These tests drive the services and the HTTP API over a real SQLite
//! database.

mod api_tests;
mod authorization_tests;
mod rollover_tests;
