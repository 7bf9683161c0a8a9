//! # BLE transport
//!
//! | Module     | Purpose                                               |
//! |------------|-------------------------------------------------------|
//! | `state`    | `LinkState` lifecycle of the display connection       |
//! | `link`     | `GattLink` seam and the `btleplug`-backed `BtleLink`  |
//! | `resolver` | Shared-adapter and local-scan resolution, discovery   |
//! | `memory`   | In-memory link for dry runs and tests                 |
//! | `manager`  | `ConnectionManager`: connect, chunked send, read      |

pub mod link;
pub mod manager;
pub mod memory;
pub mod resolver;
pub mod state;

pub use link::{
    BtleLink, DEFAULT_MAX_WRITE_LEN, GattLink, GattProfile, IDM_NAME_PREFIX,
    IDM_READ_CHARACTERISTIC, IDM_WRITE_CHARACTERISTIC, WriteMode,
};
pub use manager::{ConnectionConfig, ConnectionManager, SendReport};
pub use memory::{LinkProbe, MemoryLink, MemoryResolver};
pub use resolver::{
    DiscoveredDevice, LinkResolver, LocalAdapterResolver, SharedAdapterResolver, discover,
    first_adapter,
};
pub use state::LinkState;
