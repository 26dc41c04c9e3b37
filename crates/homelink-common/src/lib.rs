//! # homelink-common
//!
//! Shared types, configuration, error handling, and crypto primitives used
//! across all HomeLink crates. This is the foundation layer — no protocol or
//! HTTP logic, just primitives and contracts.

pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
