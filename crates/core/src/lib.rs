//! `warden-core`: primitives shared by every warden crate.
//!
//! No IO and no async here: identifiers, the domain newtype and the error
//! taxonomy that outer layers map onto rejections.

pub mod error;
pub mod id;

pub use error::{Classify, CoreError, ErrorClass};
pub use id::{ClientId, Domain, UserId};
