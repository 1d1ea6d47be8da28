//! pollencast library
//!
//! Weather and pollen data behind a tiered, stale-tolerant TTL cache, with
//! cache warming for popular locations and weather/pollen correlation
//! insights. The binary is a thin layer over [`app::App`].

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod correlation;
pub mod data;
pub mod fetcher;
pub mod maintenance;
