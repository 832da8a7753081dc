//! Gen2 Shelly relays over JSON-RPC/WebSocket

mod components;
mod device;
mod discovery;
mod driver;
mod rpc;

pub use components::{
    ComponentEvent, ComponentKey, DeviceInfo, InputStatus, NotifyEventParams, ShellyStatus,
    SwitchStatus,
};
pub use device::{InputListeners, ShellyDevice};
pub use discovery::{MAX_CANDIDATES, candidate_hosts, probe, probe_all};
pub use driver::{ShellyConfig, ShellyDriver, ShellyInputMapping, ShellyOutputMapping};
pub use rpc::{RpcClient, RpcErrorBody, RpcMessage, RpcRequest};
