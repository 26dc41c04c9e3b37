//! Route handlers, grouped per surface.

pub mod auth;
pub mod devices;
pub mod telegram;
