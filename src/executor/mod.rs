//! Single-profile execution

pub mod profile;

pub use profile::{ProfileExecutor, ProfileRequest};
