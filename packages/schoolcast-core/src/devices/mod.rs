//! Device addressing: grid registry, receiver frames, state cache, transport.

pub mod packet;
pub mod registry;
pub mod state_store;
pub mod transport;

pub use packet::{CommandPacket, PacketBuilder, PacketLayout, PacketTarget, PowerCommand};
pub use registry::{
    Device, DeviceGroup, DeviceId, DeviceRegistry, DeviceSet, GridCell, GridConfig, GridPosition,
    GridRow,
};
pub use state_store::{DeviceStateSnapshot, DeviceStateStore, PowerState, RestoreInfo};
pub use transport::{CommandTransport, SendOutcome, UdpTransport};
