// src/cli/handlers/mod.rs

// One module per probe command.

pub mod load;
pub mod platform;
pub mod spawn;
