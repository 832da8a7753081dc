mod mock;

pub use mock::{MockSensorConfig, MockSensorDriver, MockTemperatureSensor};
