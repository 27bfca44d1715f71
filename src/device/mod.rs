//! Host implementations of the device-side collaborators

mod restart;
mod slot;

pub use restart::{ExitRestarter, RESTART_EXIT_CODE};
pub use slot::FileFirmwareSlot;
