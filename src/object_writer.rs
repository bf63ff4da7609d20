use crate::config::DfuConfig;
use crate::control::ControlPoint;
use crate::error::{DfuError, DfuResult};
use crate::notification::{Listening, NotificationQueue, NotificationSource};
use crate::packet_writer::{PacketSink, PacketWriter};
use crate::protocol::{self, OpCode, TransferProgress};
use crate::transport::DfuLink;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::timeout;
use tracing::debug;

/// Cancels the transfer before the next object write starts
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Writes the packets of one object and validates the target's checksums
pub struct ObjectWriter<'a, L: DfuLink> {
    link: &'a L,
    config: &'a DfuConfig,
    abort: AbortHandle,
}

impl<'a, L: DfuLink> ObjectWriter<'a, L> {
    pub fn new(link: &'a L, config: &'a DfuConfig, abort: AbortHandle) -> Self {
        ObjectWriter { link, config, abort }
    }

    /// Only takes effect on the next `write_object` call
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Stream `packets` as one object and return the validated progress
    pub async fn write_object<P: AsRef<[u8]>>(&self, packets: &[P]) -> DfuResult<TransferProgress> {
        let mut queue = NotificationQueue::new(self.link, self.config.control_point);
        let control = ControlPoint::new(self.link, self.config.control_point, self.config.command_timeout);
        let mut writer = PacketWriter::new(self.link, control, self.config.data_point, self.config.prn);
        self.write_object_with(&mut queue, &mut writer, packets).await
    }

    async fn write_object_with<Q, W, P>(&self, queue: &mut Q, writer: &mut W, packets: &[P]) -> DfuResult<TransferProgress>
    where
        Q: NotificationSource,
        W: PacketSink,
        P: AsRef<[u8]>,
    {
        if self.abort.is_aborted() {
            return Err(DfuError::Aborted);
        }
        let mut listening = Listening::start(queue).await?;

        let mut checkpoint = None;
        for packet in packets {
            checkpoint = writer.write_packet(packet.as_ref()).await?;
            if let Some(expected) = &checkpoint {
                self.validate_progress(&mut *listening, expected).await?;
            }
        }

        // Packets after the last receipt have not been confirmed yet
        let progress = match checkpoint {
            Some(progress) => progress,
            None => {
                let expected = writer.request_checksum().await?;
                self.validate_progress(&mut *listening, &expected).await?;
                expected
            }
        };
        debug!(offset = writer.offset(), crc32 = writer.crc32(), "object written");
        Ok(progress)
    }

    /// Check `expected` against the next CRC report queued from the target
    async fn validate_progress<Q: NotificationSource>(&self, queue: &mut Q, expected: &TransferProgress) -> DfuResult<()> {
        let frame = timeout(self.config.command_timeout, async {
            loop {
                let frame = queue.read_next().await?;
                if protocol::is_response_to(&frame, OpCode::CalculateCrc) {
                    return Ok::<_, DfuError>(frame);
                }
            }
        })
        .await
        .map_err(|_| DfuError::Timeout {
            opcode: OpCode::CalculateCrc,
        })??;

        let payload = protocol::parse_response(OpCode::CalculateCrc, &frame)?;
        let reported = TransferProgress::from_payload(OpCode::CalculateCrc, payload)?;
        debug!(?expected, ?reported, "validating checksum");
        expected.validate(&reported)
    }
}
