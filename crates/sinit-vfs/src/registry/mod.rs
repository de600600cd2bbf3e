//! The three process-wide registries.
//!
//! Each registry owns its table behind one named [`Locked`](crate::locked::Locked)
//! mutex. They are fields of [`Vfs`](crate::Vfs) rather than globals, so a
//! process builds exactly one context at startup and tears it down
//! explicitly.

mod drivers;
mod infos;
mod volumes;

pub use drivers::DriverRegistry;
pub use infos::{PartitionInfo, VolumeInfo, VolumeInfoRegistry};
pub use volumes::VolumeRegistry;
