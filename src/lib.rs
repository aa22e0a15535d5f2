//! Native resource lifecycle and process control for cross-platform desktop runtimes.
//!
//! The crate has two halves:
//!
//! - **`core`**: locating, extracting and loading the one platform-specific native
//!   module exactly once per process (`state::ensure_loaded`).
//! - **`system`**: owned native handles, pipes and socket pairs, and a process
//!   controller that spawns children with an explicit descriptor whitelist.

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod state;
pub mod system;

pub use crate::core::bootstrap::{Bootstrap, BootstrapError, LoadOrigin};
pub use crate::core::library::NativeLibrary;
pub use crate::models::{MenuId, MenuItem, NotifierEvent, PlatformTarget, ThemeEvent};
pub use crate::state::{ensure_loaded, is_available, set_override_extract_dir};
pub use crate::system::descriptor::{
    DescriptorPair, IntoResourceHandle, Pipe, create_pipe, create_socket_pair, into_resource_handle,
};
pub use crate::system::completion::ExitFuture;
pub use crate::system::handle::ResourceHandle;
pub use crate::system::listener::{ListenerRegistry, Subscription};
pub use crate::system::process::{ProcessBuilder, ProcessHandle, ProcessState, SpawnError};
