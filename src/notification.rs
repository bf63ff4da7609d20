use crate::error::{DfuError, DfuResult};
use crate::transport::{DfuLink, NotificationStream};

use futures::StreamExt;
use std::ops::{Deref, DerefMut};
use uuid::Uuid;

/// Buffered source of control point frames
#[allow(async_fn_in_trait)]
pub trait NotificationSource {
    async fn start_listening(&mut self) -> DfuResult<()>;
    /// Next frame in arrival order, waiting for one if none is buffered
    async fn read_next(&mut self) -> DfuResult<Vec<u8>>;
    /// Must be harmless when listening never started
    fn stop_listening(&mut self);
}

/// FIFO of control point notifications received while listening.
///
/// Frames are buffered by the link's notification stream from the moment
/// listening starts, so nothing is lost between `read_next` calls.
pub struct NotificationQueue<'a, L: DfuLink> {
    link: &'a L,
    channel: Uuid,
    frames: Option<NotificationStream>,
}

impl<'a, L: DfuLink> NotificationQueue<'a, L> {
    pub fn new(link: &'a L, channel: Uuid) -> Self {
        NotificationQueue { link, channel, frames: None }
    }
}

impl<L: DfuLink> NotificationSource for NotificationQueue<'_, L> {
    async fn start_listening(&mut self) -> DfuResult<()> {
        let stream = self.link.notifications().await.map_err(DfuError::Link)?;
        self.frames = Some(stream);
        Ok(())
    }

    async fn read_next(&mut self) -> DfuResult<Vec<u8>> {
        let frames = self
            .frames
            .as_mut()
            .ok_or_else(|| DfuError::Link(anyhow::anyhow!("not listening to notifications")))?;
        while let Some(ntf) = frames.next().await {
            if ntf.channel == self.channel {
                return Ok(ntf.value);
            }
        }
        Err(DfuError::Link(anyhow::anyhow!("Notifications stopped unexpectedly")))
    }

    fn stop_listening(&mut self) {
        self.frames = None;
    }
}

/// Listening session on a [`NotificationSource`], stopped when dropped
pub struct Listening<'q, Q: NotificationSource> {
    queue: &'q mut Q,
}

impl<'q, Q: NotificationSource> Listening<'q, Q> {
    /// Start listening. The queue is stopped again if starting fails.
    pub async fn start(queue: &'q mut Q) -> DfuResult<Self> {
        let listening = Listening { queue };
        listening.queue.start_listening().await?;
        Ok(listening)
    }
}

impl<Q: NotificationSource> Deref for Listening<'_, Q> {
    type Target = Q;

    fn deref(&self) -> &Q {
        &*self.queue
    }
}

impl<Q: NotificationSource> DerefMut for Listening<'_, Q> {
    fn deref_mut(&mut self) -> &mut Q {
        &mut *self.queue
    }
}

impl<Q: NotificationSource> Drop for Listening<'_, Q> {
    fn drop(&mut self) {
        self.queue.stop_listening();
    }
}
