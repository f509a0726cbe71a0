//! Device Actions
//!
//! A device action is a long-running operation on a connected device
//! (read an address, produce a signature). It reports progress as a stream
//! of [`DeviceActionState`] values and ends with exactly one terminal state.
//!
//! [`run_device_action_once`] turns such a stream into a single future.

mod bridge;
mod error;
mod state;

pub use bridge::*;
pub use error::*;
pub use state::*;
