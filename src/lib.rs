//! podexec - exec session lifecycle and multiplexing daemon.
//!
//! Runs commands inside containers on behalf of remote clients, multiplexes
//! the terminal streams to any number of WebSocket viewers, and shuts itself
//! down when idle. The cluster-facing transport is pluggable; this crate
//! ships a local-process provider used for development and tests.

pub mod activity;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod events;
pub mod local;
pub mod manager;
pub mod provider;
pub mod remote;
pub mod ring;
pub mod session;
pub mod shutdown;
