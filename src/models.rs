// src/models.rs

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// --- PLATFORM MODELS ---
// Computed once from the host, then used to pick the native module file name.

/// Operating systems a native module is built for.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Windows,
    Linux,
}

/// CPU architectures a native module is built for.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Amd64,
    Arm64,
}

/// The (OS, architecture) pair selecting exactly one native module.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformTarget {
    pub os: Os,
    pub arch: Arch,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => f.write_str("windows"),
            Self::Linux => f.write_str("linux"),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amd64 => f.write_str("amd64"),
            Self::Arm64 => f.write_str("arm64"),
        }
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Where the native module comes from, once resolved.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LibraryLocation {
    /// A module already on disk. Loaded in place, never copied.
    File { path: PathBuf },
    /// A module packaged inside a container (the executable, an archive) that has
    /// to be extracted before it can be loaded. `container` is the file whose
    /// modification time invalidates previous extractions, when known.
    Packaged { container: Option<PathBuf> },
}

// --- MENU MODELS ---
// The shape handed to the native tray/notifier implementation.

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MenuError {
    #[error("Invalid menu item id {0}: ids must be non-negative.")]
    NegativeId(i16),
}

/// A validated, non-negative menu item id.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MenuId(i16);

impl MenuId {
    pub fn new(id: i16) -> Result<Self, MenuError> {
        if id < 0 {
            return Err(MenuError::NegativeId(id));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i16 {
        self.0
    }
}

/// A node of a tray/notifier menu tree.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum MenuItem {
    Item { label: String, id: MenuId },
    SubMenu { label: String, children: Vec<MenuItem> },
}

impl MenuItem {
    /// Builds a clickable entry. Negative ids are rejected here rather than at marshaling time.
    pub fn item(label: impl Into<String>, id: i16) -> Result<Self, MenuError> {
        Ok(Self::Item {
            label: label.into(),
            id: MenuId::new(id)?,
        })
    }

    pub fn submenu(label: impl Into<String>, children: Vec<Self>) -> Self {
        Self::SubMenu {
            label: label.into(),
            children,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Item { label, .. } | Self::SubMenu { label, .. } => label,
        }
    }

    /// Finds the label of the item carrying `id`, searching submenus depth-first.
    pub fn find(&self, id: MenuId) -> Option<&str> {
        match self {
            Self::Item { label, id: own } => (*own == id).then_some(label.as_str()),
            Self::SubMenu { children, .. } => children.iter().find_map(|child| child.find(id)),
        }
    }
}

/// The flat record layout the native side consumes. Submenus carry id `-1`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NativeMenuItem {
    pub title: String,
    pub id: i16,
    pub sub_items: Option<Vec<NativeMenuItem>>,
}

/// Converts a menu tree into the native record layout.
pub fn to_native_menu(items: &[MenuItem]) -> Vec<NativeMenuItem> {
    items
        .iter()
        .map(|item| match item {
            MenuItem::Item { label, id } => NativeMenuItem {
                title: label.clone(),
                id: id.get(),
                sub_items: None,
            },
            MenuItem::SubMenu { label, children } => NativeMenuItem {
                title: label.clone(),
                id: -1,
                sub_items: Some(to_native_menu(children)),
            },
        })
        .collect()
}

// --- EVENT PAYLOADS ---
// Delivered by native callbacks through `system::listener::ListenerRegistry`.

/// Desktop theme notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeEvent {
    Changed { night: bool },
    Exited,
    Error(String),
}

/// Tray/notifier interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierEvent {
    Activated,
    MenuActivated(MenuId),
}
