//! Tagcache Library
//!
//! A persistent, single-slot validity cache for tag group lookup responses,
//! the lookup manager that serves requests from it, and the CLI used to
//! inspect it.

pub mod cache;
pub mod cli;
pub mod data;
pub mod refresh;
