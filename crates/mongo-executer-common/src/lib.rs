//! Common utilities for mongo-executer
//!
//! This crate provides the error type shared by the executer crates.

pub mod error;

pub use error::{ExecuterError, Result, DUPLICATE_KEY_CODE};
