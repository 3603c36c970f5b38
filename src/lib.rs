//! skiff
//! =====
//!
//! A client for the [Docker Registry HTTP API](https://docs.docker.com/registry/spec/api/).

pub mod distribution;
pub mod error;

mod digest;
mod name;
mod reference;

pub use digest::Digest;
pub use name::Name;
pub use reference::ImageReference;
