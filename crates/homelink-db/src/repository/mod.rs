//! Repository functions, grouped per table.

pub mod users;
