//! Client side of the nRF Secure DFU transfer protocol.
//!
//! An init packet and a firmware image are pushed to the target as a
//! sequence of objects. Each object is created, streamed in small packets
//! over the data point, checked against the target's CRC32 report and
//! executed, with the whole object retried on failure.
//!
//! The link itself (BLE GATT, serial, ...) is abstracted by [`DfuLink`];
//! [`transport_btleplug`] provides a BLE implementation.

pub mod config;
pub mod control;
pub mod dfu;
pub mod error;
pub mod notification;
pub mod object_writer;
pub mod package;
pub mod packet_writer;
pub mod protocol;
pub mod transport;
pub mod transport_btleplug;

#[cfg(test)]
mod testing;

pub use config::DfuConfig;
pub use dfu::DfuTransport;
pub use error::{DfuError, DfuResult};
pub use object_writer::AbortHandle;
pub use protocol::TransferProgress;
pub use transport::{DfuLink, DfuLinkManager};
