pub mod protocol;
pub mod registry;

pub use protocol::*;
pub use registry::{Delivery, Registry, RegistryLimits, RegistryStats, RelayError, RoomSnapshot};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
