// ABOUTME: Configuration crate for Bastion
// ABOUTME: Environment variable names and typed parsing helpers shared across packages

pub mod constants;
pub mod env;

pub use env::{parse_env, parse_env_in_range};
