use anyhow::Result;
use futures::stream::BoxStream;

/// Value change reported by the target on a characteristic
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Notification {
    pub channel: uuid::Uuid,
    pub value: Vec<u8>,
}

/// Every notification delivered after the stream was created, in arrival order
pub type NotificationStream = BoxStream<'static, Notification>;

/// nRF DFU link interface
#[allow(async_fn_in_trait)]
pub trait DfuLink {
    /// Write to the given characteristic, with or without response
    async fn write(&self, channel: uuid::Uuid, bytes: &[u8], with_response: bool) -> Result<()>;
    /// Enable notifications on the given characteristic
    async fn subscribe(&self, channel: uuid::Uuid) -> Result<()>;
    /// Disable notifications on the given characteristic
    async fn unsubscribe(&self, channel: uuid::Uuid) -> Result<()>;
    /// Start receiving notifications; dropping the stream stops delivery to it
    async fn notifications(&self) -> Result<NotificationStream>;
}

/// Finds and connects DFU targets
#[allow(async_fn_in_trait)]
pub trait DfuLinkManager {
    type Link: DfuLink;

    /// Connect to the device with the given name or address
    async fn connect(&self, target: &str) -> Result<Self::Link>;
}
