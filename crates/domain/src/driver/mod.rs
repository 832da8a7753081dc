mod digital;
mod driver_kind;
mod driver_state;
mod io_driver;

#[cfg(test)]
pub use digital::MockEventListener;
pub use digital::{DigitalInput, DigitalOutput, EventListener, PushEvent};
pub use driver_kind::DriverKind;
pub use driver_state::DriverState;
pub use io_driver::IoDriver;
