//! # Service Layer
//!
//! The two roles built on top of [`Connection`](crate::transport::Connection):
//! - **Client**: one outbound connection with optional identity sync
//! - **Server**: accept loop, identity table and per-type packet handlers

pub mod client;
pub mod server;

pub use client::Client;
pub use server::Server;
