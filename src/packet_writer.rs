use crate::control::ControlPoint;
use crate::error::{DfuError, DfuResult};
use crate::protocol::{self, TransferProgress};
use crate::transport::DfuLink;

use tracing::debug;
use uuid::Uuid;

/// Sink for the packets of one object
#[allow(async_fn_in_trait)]
pub trait PacketSink {
    /// Send one packet. Returns the local progress when a checksum request
    /// was issued after it.
    async fn write_packet(&mut self, packet: &[u8]) -> DfuResult<Option<TransferProgress>>;
    /// Ask the target for its checksum of everything written so far and
    /// return the local progress to compare it against
    async fn request_checksum(&mut self) -> DfuResult<TransferProgress>;
    fn offset(&self) -> u32;
    fn crc32(&self) -> u32;
}

/// Streams one object over the data point, tracking offset and CRC32
pub struct PacketWriter<'a, L: DfuLink> {
    link: &'a L,
    control: ControlPoint<'a, L>,
    data_point: Uuid,
    prn: u16,
    prn_count: u16,
    offset: u32,
    crc32: u32,
}

impl<'a, L: DfuLink> PacketWriter<'a, L> {
    pub fn new(link: &'a L, control: ControlPoint<'a, L>, data_point: Uuid, prn: u16) -> Self {
        PacketWriter {
            link,
            control,
            data_point,
            prn,
            prn_count: 0,
            offset: 0,
            crc32: 0,
        }
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            offset: self.offset,
            crc32: self.crc32,
        }
    }
}

impl<L: DfuLink> PacketSink for PacketWriter<'_, L> {
    async fn write_packet(&mut self, packet: &[u8]) -> DfuResult<Option<TransferProgress>> {
        self.link
            .write(self.data_point, packet, false)
            .await
            .map_err(DfuError::Link)?;
        self.offset += packet.len() as u32;
        self.crc32 = protocol::crc32(packet, self.crc32);

        if self.prn == 0 {
            return Ok(None);
        }
        self.prn_count += 1;
        if self.prn_count < self.prn {
            return Ok(None);
        }
        self.request_checksum().await.map(Some)
    }

    async fn request_checksum(&mut self) -> DfuResult<TransferProgress> {
        self.prn_count = 0;
        debug!(offset = self.offset, crc32 = self.crc32, "requesting checksum");
        self.control.calculate_crc().await?;
        Ok(self.progress())
    }

    fn offset(&self) -> u32 {
        self.offset
    }

    fn crc32(&self) -> u32 {
        self.crc32
    }
}
