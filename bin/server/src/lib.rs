//! gradebook REST API server.
//!
//! This crate serves the authentication and session surface of the
//! gradebook academic records manager: Google sign-in for invited users,
//! session cookies, role-gated routes, and user administration.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod mail;
pub mod students;
pub mod users;
