//! Database models split into domain-specific modules.

pub mod common;
pub mod request;
pub mod transaction;
pub mod user;

pub use common::*;
pub use request::*;
pub use transaction::*;
pub use user::*;
