use crate::config::DfuConfig;
use crate::control::ControlPoint;
use crate::error::{DfuError, DfuResult};
use crate::object_writer::{AbortHandle, ObjectWriter};
use crate::protocol::{ObjectType, TransferProgress};
use crate::transport::DfuLink;

use std::future::Future;
use tracing::{debug, info, warn};

/// Called with (bytes done, bytes total) after each firmware object
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Drives init packet and firmware transfers over a [`DfuLink`]
pub struct DfuTransport<L: DfuLink> {
    link: L,
    config: DfuConfig,
    abort: AbortHandle,
    progress: Option<ProgressCallback>,
}

impl<L: DfuLink> DfuTransport<L> {
    pub fn new(link: L, config: DfuConfig) -> Self {
        DfuTransport {
            link,
            config,
            abort: AbortHandle::default(),
            progress: None,
        }
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Handle for cancelling from another task
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Stop before the next object; an object already streaming runs to completion
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Run the DFU procedure as specified in
    /// [DFU Protocol](https://infocenter.nordicsemi.com/topic/sdk_nrf5_v17.1.0/lib_dfu_transport_ble.html)
    pub async fn run(&self, init_pkt: &[u8], fw_pkt: &[u8]) -> DfuResult<()> {
        // Checksums are requested explicitly, the target must not send its own receipts
        self.set_receipt_notification(0).await?;
        self.send_init_packet(init_pkt).await?;
        self.send_firmware(fw_pkt).await
    }

    pub async fn set_receipt_notification(&self, value: u16) -> DfuResult<()> {
        self.with_control_notifications(self.control().set_prn(value)).await
    }

    pub async fn send_init_packet(&self, init_pkt: &[u8]) -> DfuResult<()> {
        self.with_control_notifications(async {
            let selected = self.control().select_object(ObjectType::Command).await?;
            self.stream_object(ObjectType::Command, init_pkt, selected.max_size)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn send_firmware(&self, fw_pkt: &[u8]) -> DfuResult<()> {
        self.with_control_notifications(async {
            let selected = self.control().select_object(ObjectType::Data).await?;
            if selected.offset != 0 {
                debug!(offset = selected.offset, "target holds a partial object, starting over");
            }
            let objects = create_chunks(fw_pkt, selected.max_size as usize)?;
            let total = fw_pkt.len() as u64;
            let mut done = 0u64;
            for (index, object) in objects.iter().enumerate() {
                debug!(index, count = objects.len(), "sending firmware object");
                self.stream_object(ObjectType::Data, object, selected.max_size)
                    .await?;
                done += object.len() as u64;
                if let Some(progress) = &self.progress {
                    progress(done, total);
                }
            }
            Ok(())
        })
        .await
    }

    /// Create, write and execute one object, starting over from its first
    /// byte on failure
    async fn stream_object(&self, obj_type: ObjectType, data: &[u8], max_size: u32) -> DfuResult<TransferProgress> {
        validate_object_size(data.len(), max_size)?;
        let packets = create_chunks(data, self.config.packet_size)?;
        let mut attempt = 1;
        loop {
            match self.try_stream_object(obj_type, data.len() as u32, &packets).await {
                Ok(progress) => {
                    info!(?obj_type, offset = progress.offset, crc32 = progress.crc32, "object executed");
                    return Ok(progress);
                }
                Err(err) if err.is_retriable() && attempt < self.config.max_retries => {
                    warn!(?obj_type, attempt, "object transfer failed, retrying: {}", err);
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_stream_object(&self, obj_type: ObjectType, len: u32, packets: &[&[u8]]) -> DfuResult<TransferProgress> {
        self.control().create_object(obj_type, len).await?;
        let progress = self.object_writer().write_object(packets).await?;
        self.control().execute().await?;
        Ok(progress)
    }

    /// Keep control point notifications enabled for the duration of `body`
    async fn with_control_notifications<T>(&self, body: impl Future<Output = DfuResult<T>>) -> DfuResult<T> {
        let channel = self.config.control_point;
        self.link.subscribe(channel).await.map_err(DfuError::Link)?;
        let result = body.await;
        let released = self.link.unsubscribe(channel).await.map_err(DfuError::Link);
        if let (Err(_), Err(err)) = (&result, &released) {
            warn!("failed to disable control point notifications: {}", err);
        }
        let value = result?;
        released?;
        Ok(value)
    }

    fn control(&self) -> ControlPoint<'_, L> {
        ControlPoint::new(&self.link, self.config.control_point, self.config.command_timeout)
    }

    fn object_writer(&self) -> ObjectWriter<'_, L> {
        ObjectWriter::new(&self.link, &self.config, self.abort.clone())
    }
}

/// Split `data` into `size` byte chunks, the last one holding the remainder
pub fn create_chunks(data: &[u8], size: usize) -> DfuResult<Vec<&[u8]>> {
    if size < 1 {
        return Err(DfuError::InvalidArgument(format!("Invalid chunk size: {}", size)));
    }
    Ok(data.chunks(size).collect())
}

fn validate_object_size(size: usize, max_size: u32) -> DfuResult<()> {
    if size > max_size as usize {
        return Err(DfuError::InvalidArgument(format!(
            "Object size ({}) is larger than max size ({})",
            size, max_size
        )));
    }
    Ok(())
}
