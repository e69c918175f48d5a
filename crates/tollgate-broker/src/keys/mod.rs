//! Key management for the broker

mod registry;

pub use registry::{KeyRegistry, KeyResolutionError, PublicKeyEntry};
