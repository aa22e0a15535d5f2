// src/core/mod.rs

pub mod bootstrap;
pub mod bundle;
pub mod cache;
pub mod config_loader;
pub mod library;
pub mod paths;
pub mod platform;
pub mod timer;
