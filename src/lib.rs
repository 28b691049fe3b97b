//! VidRelay Server Library
//!
//! Accepts video uploads over HTTP and forwards them to YouTube.
//!
//! # Modules
//!
//! - `upload`: Chunked upload driver and retry policy
//! - `auth`: OAuth2 credential acquisition and persistence
//! - `platform`: YouTube resumable upload session
//! - `routes`: HTTP ingress (upload, consent, health)

pub mod auth;
pub mod config;
pub mod error;
pub mod platform;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
