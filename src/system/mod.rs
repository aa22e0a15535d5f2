//! # System Interaction Layer
//!
//! Owned OS resources and the child processes that use them. Everything above the
//! private `sys` module is platform independent.
//!
//! ## Modules
//!
//! - **`handle`**: [`handle::ResourceHandle`], the single owner of a native descriptor.
//!   Releasing is explicit, idempotent and backed up by `Drop`.
//! - **`descriptor`**: pipes, socket pairs and adoption of std I/O objects. New
//!   descriptors are never inheritable.
//! - **`process`**: spawning with an explicit descriptor whitelist, a waiter thread per
//!   child, and kill/release semantics that never leak a process-table entry.
//! - **`completion`**: the single-assignment exit-code slot shared by a child's observers.
//! - **`listener`**: callback registries whose subscriptions are disposed synchronously.

pub mod completion;
pub mod descriptor;
pub mod handle;
pub mod listener;
pub mod process;
mod sys;
