//! Core types shared by the gradebook crates.
//!
//! This crate provides the strongly-typed identifiers for the records the
//! access core manipulates.

pub mod id;

pub use id::{ParseIdError, StudentId, UserId};
