//! Todo frontend: serves a page and an image kept in a local TTL cache with
//! a single-use grace period after expiry.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod presentation;
