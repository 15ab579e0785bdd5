pub mod mock;
#[cfg(feature = "sysfs")]
pub mod sysfs;

pub use mock::{MockAttribute, MockEdgeSource, MockGpioBackend, MockWait, MockWrite, WatchOp};
#[cfg(feature = "sysfs")]
pub use sysfs::{SysfsBackend, SysfsValueWatch};
