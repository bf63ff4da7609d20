use crate::error::{DfuError, DfuResult};
use crate::protocol::{self, ObjectType, OpCode, SelectResponse, TransferProgress};
use crate::transport::{DfuLink, NotificationStream};

use futures::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

/// Request/response procedures on the DFU control point
pub struct ControlPoint<'a, L: DfuLink> {
    link: &'a L,
    channel: Uuid,
    timeout: Duration,
}

impl<'a, L: DfuLink> ControlPoint<'a, L> {
    pub fn new(link: &'a L, channel: Uuid, timeout: Duration) -> Self {
        ControlPoint { link, channel, timeout }
    }

    /// Write a command and wait for the response echoing its opcode.
    ///
    /// Frames for other opcodes are ignored. The notification stream backing
    /// this call is dropped before returning, whichever way it settles.
    pub async fn send_command(&self, opcode: OpCode, payload: &[u8]) -> DfuResult<Vec<u8>> {
        let frame = protocol::encode_command(opcode, payload);
        let mut responses = self.link.notifications().await.map_err(DfuError::Link)?;
        debug!(%opcode, ?frame, "control point request");
        let exchange = async {
            self.link
                .write(self.channel, &frame, true)
                .await
                .map_err(DfuError::Link)?;
            self.next_response(&mut responses, opcode).await
        };
        let response = timeout(self.timeout, exchange)
            .await
            .map_err(|_| DfuError::Timeout { opcode })??;
        drop(responses);

        let payload = protocol::parse_response(opcode, &response)?;
        Ok(payload.to_vec())
    }

    async fn next_response(&self, responses: &mut NotificationStream, opcode: OpCode) -> DfuResult<Vec<u8>> {
        while let Some(ntf) = responses.next().await {
            if ntf.channel == self.channel && protocol::is_response_to(&ntf.value, opcode) {
                return Ok(ntf.value);
            }
        }
        Err(DfuError::Link(anyhow::anyhow!("Notifications stopped unexpectedly")))
    }

    pub async fn select_object(&self, obj_type: ObjectType) -> DfuResult<SelectResponse> {
        let response = self.send_command(OpCode::Select, &[obj_type.into()]).await?;
        SelectResponse::from_payload(&response)
    }

    pub async fn create_object(&self, obj_type: ObjectType, len: u32) -> DfuResult<()> {
        let mut payload: Vec<u8> = vec![obj_type.into()];
        payload.extend_from_slice(&len.to_le_bytes());
        self.send_command(OpCode::Create, &payload).await?;
        Ok(())
    }

    pub async fn set_prn(&self, value: u16) -> DfuResult<()> {
        self.send_command(OpCode::SetPrn, &value.to_le_bytes()).await?;
        Ok(())
    }

    pub async fn calculate_crc(&self) -> DfuResult<TransferProgress> {
        let response = self.send_command(OpCode::CalculateCrc, &[]).await?;
        TransferProgress::from_payload(OpCode::CalculateCrc, &response)
    }

    pub async fn execute(&self) -> DfuResult<()> {
        self.send_command(OpCode::Execute, &[]).await?;
        Ok(())
    }
}
