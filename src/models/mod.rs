//! Data models

mod decision;
mod key;
mod service;
mod user;

pub use decision::*;
pub use key::*;
pub use service::*;
pub use user::*;
