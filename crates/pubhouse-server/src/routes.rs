//! HTTP route handlers

pub mod admin;
pub mod archives;
pub mod packages;
