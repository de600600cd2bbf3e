//! Driver initiators.
//!
//! An initiator registers one driver (`deinit = false`) or removes it
//! again (`deinit = true`). Both directions are idempotent, so a failed
//! startup can be rolled back by running the succeeded ones in reverse.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::driver::FsDriver;
use crate::drivers;
use crate::error::VfsResult;
use crate::vfs::Vfs;

/// Registers (`false`) or unregisters (`true`) a driver.
pub type Initiator = fn(&Vfs, bool) -> VfsResult<()>;

/// Where the VFS is running.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Early Linux userspace: host directories and sockets.
    #[default]
    Hosted,
    /// UEFI application: firmware file-system protocols.
    Firmware,
}

fn toggle<D: FsDriver + Default + 'static>(vfs: &Vfs, deinit: bool, name: &str) -> VfsResult<()> {
    match (deinit, vfs.has_driver(name)) {
        (false, false) => vfs.register_driver(Arc::new(D::default())),
        (true, true) => vfs.unregister_driver(name),
        _ => Ok(()),
    }
}

pub fn assets(vfs: &Vfs, deinit: bool) -> VfsResult<()> {
    toggle::<drivers::AssetDriver>(vfs, deinit, drivers::assets::DRIVER_NAME)
}

#[cfg(unix)]
pub fn posix(vfs: &Vfs, deinit: bool) -> VfsResult<()> {
    toggle::<drivers::PosixDriver>(vfs, deinit, drivers::posix::DRIVER_NAME)
}

#[cfg(unix)]
pub fn socket(vfs: &Vfs, deinit: bool) -> VfsResult<()> {
    toggle::<drivers::SocketDriver>(vfs, deinit, drivers::socket::DRIVER_NAME)
}

pub fn uefi(vfs: &Vfs, deinit: bool) -> VfsResult<()> {
    toggle::<drivers::UefiDriver>(vfs, deinit, drivers::uefi::DRIVER_NAME)
}

#[cfg(feature = "zip")]
pub fn zip(vfs: &Vfs, deinit: bool) -> VfsResult<()> {
    toggle::<drivers::ZipDriver>(vfs, deinit, drivers::zip::DRIVER_NAME)
}

pub fn overlay(vfs: &Vfs, deinit: bool) -> VfsResult<()> {
    toggle::<drivers::OverlayDriver>(vfs, deinit, drivers::overlay::DRIVER_NAME)
}

pub fn template(vfs: &Vfs, deinit: bool) -> VfsResult<()> {
    toggle::<drivers::TemplateDriver>(vfs, deinit, drivers::template::DRIVER_NAME)
}

/// The standard initiator list for a platform, in registration order.
///
/// Leaf drivers come first, layer drivers last.
pub fn initiators_for(platform: Platform) -> Vec<Initiator> {
    let mut list = vec![assets as Initiator];
    match platform {
        Platform::Hosted => {
            #[cfg(unix)]
            list.extend([socket as Initiator, posix]);
        }
        Platform::Firmware => list.push(uefi),
    }
    #[cfg(feature = "zip")]
    list.push(zip);
    list.extend([overlay as Initiator, template]);
    list
}
