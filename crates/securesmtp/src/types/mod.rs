//! Core SMTP types.

mod extension;
mod reply;

pub use extension::{AuthMechanism, AuthOptions, Extension};
pub use reply::{Reply, ReplyCode};
