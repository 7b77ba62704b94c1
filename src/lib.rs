//! Local LLM web server using WGPU - Library exports for testing
//!
//! (c) Softlandia 2025

pub mod api;
pub mod config;
pub mod core;
pub mod infrastructure;
pub mod loadtest;
