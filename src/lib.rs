//! PCI Express root bridge description for SoCs with several independently
//! enabled host controllers.
//!
//! [`RootBridgeTableBuilder`] brings up the enabled controllers and produces
//! the [`RootBridgeTable`] a generic PCI bus allocation layer enumerates from.
//! When that layer cannot satisfy some resource request, it hands back a
//! report that [`report_resource_conflict`] turns into log output.

#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]
#![warn(macro_use_extern_crate, meta_variable_misuse, missing_abi)]
#![warn(unused_lifetimes, unused_macro_rules, unused_qualifications)]

extern crate alloc;

pub mod bringup;
pub mod conflict;
pub mod device_path;
pub mod error;
pub mod platform;
pub mod root_bridge;

pub use bringup::{enable_controllers, HostInitParams, PcieHostInit};
pub use conflict::{decode_conflicts, report_resource_conflict, HostBridgeHandle};
pub use error::{Error, HostInitError};
pub use platform::{ControllerKind, ControllerSet, ControllerSlot, PlatformConfig, ResourceWindows};
pub use root_bridge::{RootBridge, RootBridgeTable, RootBridgeTableBuilder};
