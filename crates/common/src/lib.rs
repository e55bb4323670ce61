//! Common types shared by the news proxy crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
