//! Application layer - logical devices and the hub that drives them

pub mod devices;
pub mod hub;

pub use devices::{
    ButtonDevice, Controllable, LogicalDevice, MotionSensorDevice, OnOffDevice, ShutterDevice,
    SwitchDevice, ThermostatDevice,
};
pub use hub::{Hub, IoStatus};
