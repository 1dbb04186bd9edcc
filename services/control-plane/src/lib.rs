//! Corral control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose the
//! service and its collaborators to enable integration testing and reuse.

pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod configuration;
pub mod error;
pub mod model;
pub mod rewrite;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod store;
pub mod updates;
pub mod views;
