//! Core infrastructure: options, errors, identity, shutdown plumbing.

pub mod config;
pub mod error;
pub mod hostname;
pub mod ident;
pub mod shutdown;
