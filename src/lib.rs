//! UFS Query Request/Response over the Linux bsg interface
//!
//! This library encodes UFS Query Request UPIUs (flags, attributes and
//! descriptors), submits them through the `SG_IO` ioctl on a UFS bsg node,
//! and validates the Query Response UPIU the device returns.
//!
//! Users implement the `UfsTransport` trait to plug in another channel;
//! `BsgDevice` talks to real hardware and `SimulatedDevice` answers from
//! memory.
//!
//! # Example
//!
//! ```no_run
//! use ufs_query::{BsgDevice, QueryConfig, UfsQuery};
//! use ufs_query::idn::{AttributeIdn, FlagIdn};
//! use ufs_query::desc::DescriptorKind;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueryConfig::builder().timeout_ms(5_000).build()?;
//! let device = BsgDevice::open("/dev/bsg/ufs-bsg0", &config)?;
//! let mut query = UfsQuery::with_config(device, &config);
//!
//! let init_done = !query.read_flag(FlagIdn::DeviceInit)?;
//! let boot_lun = query.read_attribute(AttributeIdn::BootLunEn, 0, 0)?;
//! let device_desc = query.read_descriptor(DescriptorKind::Device, 0, 0)?;
//! println!("init done: {}, boot LUN: {}, {} descriptor bytes",
//!     init_done, boot_lun, device_desc.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod desc;
pub mod error;
pub mod idn;
pub mod query;
pub mod sim;
pub mod transport;
pub mod upiu;

pub use config::{QueryConfig, QueryConfigBuilder, ReservedPolicy};
pub use desc::{max_size, DescriptorBuffer, DescriptorKind};
pub use error::{UfsError, UfsResult};
pub use idn::{AttributeIdn, FlagIdn, Idn, QueryOpcode};
pub use query::{GlobalLogger, NopLogger, QueryStage, UfsQuery};
pub use sim::SimulatedDevice;
pub use transport::{BsgDevice, TransferBuffer, UfsTransport, MAX_IOCTL_BUF_SIZE};
pub use upiu::{QueryPayload, QueryRequest, QueryResponse, QueryValue, UpiuCodec};

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
