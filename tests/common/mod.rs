//! Common test utilities and helpers
//!
//! - Test application over a throwaway SQLite database
//! - Seed data for users, services and keys
//! - Fault-injecting key store


pub use fixtures::*;
pub use mocks::*;
pub use test_app::*;
