//! Scripted nRF DFU target for tests

use crate::protocol::{self, ObjectType, OpCode, dfu_uuids};
use crate::transport::{DfuLink, Notification, NotificationStream};

use anyhow::{Result, bail};
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Copy)]
enum Reaction {
    Reject(u8),
    Silence,
}

struct Fault {
    opcode: OpCode,
    countdown: Countdown,
    reaction: Reaction,
}

#[derive(Default)]
struct Countdown {
    skip: usize,
    times: usize,
}

impl Countdown {
    fn fire(&mut self) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            return false;
        }
        if self.times > 0 {
            self.times -= 1;
            return true;
        }
        false
    }
}

struct State {
    listeners: Vec<UnboundedSender<Notification>>,
    notification_requests: usize,
    subscribes: usize,
    unsubscribes: usize,
    control_writes: Vec<Vec<u8>>,
    data_writes: Vec<Vec<u8>>,
    faults: Vec<Fault>,
    extra_frames: Vec<(OpCode, Vec<u8>)>,
    fail_subscribe: Countdown,
    fail_notifications: Countdown,
    fail_control_writes: Countdown,
    stall_control_writes: Countdown,
    fail_data_writes: Countdown,
    corrupt_crc: Countdown,
    max_command_size: u32,
    max_data_size: u32,
    object: Vec<u8>,
    executed: Vec<(ObjectType, Vec<u8>)>,
    current_type: Option<ObjectType>,
    crc_reports: Vec<(u32, u32)>,
}

/// In-memory link answering control point requests like a DFU bootloader
pub struct MockLink {
    state: Mutex<State>,
}

impl MockLink {
    pub fn new() -> Self {
        MockLink {
            state: Mutex::new(State {
                listeners: Vec::new(),
                notification_requests: 0,
                subscribes: 0,
                unsubscribes: 0,
                control_writes: Vec::new(),
                data_writes: Vec::new(),
                faults: Vec::new(),
                extra_frames: Vec::new(),
                fail_subscribe: Countdown::default(),
                fail_notifications: Countdown::default(),
                fail_control_writes: Countdown::default(),
                stall_control_writes: Countdown::default(),
                fail_data_writes: Countdown::default(),
                corrupt_crc: Countdown::default(),
                max_command_size: 256,
                max_data_size: 4096,
                object: Vec::new(),
                executed: Vec::new(),
                current_type: None,
                crc_reports: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_max_size(&self, obj_type: ObjectType, max_size: u32) {
        match obj_type {
            ObjectType::Command => self.state().max_command_size = max_size,
            ObjectType::Data => self.state().max_data_size = max_size,
        }
    }

    /// Answer the next `times` requests for `opcode` with result `code`
    pub fn reject(&self, opcode: OpCode, code: u8, times: usize) {
        self.reject_after(opcode, code, 0, times);
    }

    pub fn reject_after(&self, opcode: OpCode, code: u8, skip: usize, times: usize) {
        self.state().faults.push(Fault {
            opcode,
            countdown: Countdown { skip, times },
            reaction: Reaction::Reject(code),
        });
    }

    /// Leave the next `times` requests for `opcode` unanswered
    pub fn silence(&self, opcode: OpCode, times: usize) {
        self.state().faults.push(Fault {
            opcode,
            countdown: Countdown { skip: 0, times },
            reaction: Reaction::Silence,
        });
    }

    /// Emit `frame` right before the next response to `opcode`
    pub fn push_response_before(&self, opcode: OpCode, frame: Vec<u8>) {
        self.state().extra_frames.push((opcode, frame));
    }

    /// Report a wrong CRC for the next `times` checksum requests
    pub fn corrupt_crc(&self, times: usize) {
        self.corrupt_crc_after(0, times);
    }

    pub fn corrupt_crc_after(&self, skip: usize, times: usize) {
        self.state().corrupt_crc = Countdown { skip, times };
    }

    pub fn fail_subscribe(&self, times: usize) {
        self.state().fail_subscribe = Countdown { skip: 0, times };
    }

    pub fn fail_notifications(&self, times: usize) {
        self.state().fail_notifications = Countdown { skip: 0, times };
    }

    pub fn fail_control_writes(&self, times: usize) {
        self.state().fail_control_writes = Countdown { skip: 0, times };
    }

    /// Never complete the next `times` control point writes
    pub fn stall_control_writes(&self, times: usize) {
        self.state().stall_control_writes = Countdown { skip: 0, times };
    }

    pub fn fail_data_writes(&self, times: usize) {
        self.fail_data_writes_after(0, times);
    }

    pub fn fail_data_writes_after(&self, skip: usize, times: usize) {
        self.state().fail_data_writes = Countdown { skip, times };
    }

    /// Deliver a notification to every live listener
    pub fn notify(&self, channel: uuid::Uuid, value: Vec<u8>) {
        Self::broadcast(&mut self.state(), channel, value);
    }

    pub fn control_writes(&self) -> Vec<Vec<u8>> {
        self.state().control_writes.clone()
    }

    pub fn data_writes(&self) -> Vec<Vec<u8>> {
        self.state().data_writes.clone()
    }

    pub fn executed(&self) -> Vec<(ObjectType, Vec<u8>)> {
        self.state().executed.clone()
    }

    /// (offset, crc32) pairs reported for checksum requests
    pub fn crc_reports(&self) -> Vec<(u32, u32)> {
        self.state().crc_reports.clone()
    }

    /// Notification streams not yet dropped
    pub fn listener_count(&self) -> usize {
        self.state().listeners.iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn notification_requests(&self) -> usize {
        self.state().notification_requests
    }

    /// (subscribe, unsubscribe) calls on the control point
    pub fn subscriptions(&self) -> (usize, usize) {
        let state = self.state();
        (state.subscribes, state.unsubscribes)
    }

    fn broadcast(state: &mut State, channel: uuid::Uuid, value: Vec<u8>) {
        let ntf = Notification { channel, value };
        state.listeners.retain(|tx| tx.unbounded_send(ntf.clone()).is_ok());
    }

    fn handle_command(state: &mut State, frame: &[u8]) {
        let Some(opcode) = frame.first().and_then(|&op| OpCode::try_from(op).ok()) else {
            return;
        };

        let reaction = state
            .faults
            .iter_mut()
            .filter(|fault| fault.opcode == opcode)
            .find_map(|fault| fault.countdown.fire().then_some(fault.reaction));

        let extra: Vec<Vec<u8>> = state
            .extra_frames
            .iter()
            .filter(|(op, _)| *op == opcode)
            .map(|(_, frame)| frame.clone())
            .collect();
        state.extra_frames.retain(|(op, _)| *op != opcode);
        for frame in extra {
            Self::broadcast(state, dfu_uuids::CTRL_PT, frame);
        }

        let mut response = vec![OpCode::Response as u8, opcode as u8];
        match reaction {
            Some(Reaction::Silence) => return,
            Some(Reaction::Reject(code)) => response.push(code),
            None => {
                response.push(0x01);
                response.extend(Self::execute(state, opcode, &frame[1..]));
            }
        }
        Self::broadcast(state, dfu_uuids::CTRL_PT, response);
    }

    /// Apply a successful request and return its response payload
    fn execute(state: &mut State, opcode: OpCode, args: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        match opcode {
            OpCode::Select => {
                let max_size = match args.first().and_then(|&t| ObjectType::try_from(t).ok()) {
                    Some(ObjectType::Command) => state.max_command_size,
                    _ => state.max_data_size,
                };
                payload.extend_from_slice(&max_size.to_le_bytes());
                payload.extend_from_slice(&[0; 8]);
            }
            OpCode::Create => {
                state.current_type = args.first().and_then(|&t| ObjectType::try_from(t).ok());
                state.object.clear();
            }
            OpCode::CalculateCrc => {
                let offset = state.object.len() as u32;
                let mut crc = protocol::crc32(&state.object, 0);
                if state.corrupt_crc.fire() {
                    crc ^= 1;
                }
                state.crc_reports.push((offset, crc));
                payload.extend_from_slice(&offset.to_le_bytes());
                payload.extend_from_slice(&crc.to_le_bytes());
            }
            OpCode::Execute => {
                if let Some(obj_type) = state.current_type {
                    state.executed.push((obj_type, state.object.clone()));
                }
            }
            OpCode::SetPrn | OpCode::Response => {}
        }
        payload
    }
}

impl DfuLink for MockLink {
    async fn write(&self, channel: uuid::Uuid, bytes: &[u8], _with_response: bool) -> Result<()> {
        if channel == dfu_uuids::CTRL_PT && self.state().stall_control_writes.fire() {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if channel == dfu_uuids::CTRL_PT {
            if state.fail_control_writes.fire() {
                bail!("control point write failed");
            }
            state.control_writes.push(bytes.to_vec());
            Self::handle_command(&mut state, bytes);
        } else {
            if state.fail_data_writes.fire() {
                bail!("data point write failed");
            }
            state.data_writes.push(bytes.to_vec());
            state.object.extend_from_slice(bytes);
        }
        Ok(())
    }

    async fn subscribe(&self, _channel: uuid::Uuid) -> Result<()> {
        let mut state = self.state();
        if state.fail_subscribe.fire() {
            bail!("failed to enable notifications");
        }
        state.subscribes += 1;
        Ok(())
    }

    async fn unsubscribe(&self, _channel: uuid::Uuid) -> Result<()> {
        self.state().unsubscribes += 1;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let mut state = self.state();
        state.notification_requests += 1;
        if state.fail_notifications.fire() {
            bail!("notification stream unavailable");
        }
        let (tx, rx) = unbounded();
        state.listeners.push(tx);
        Ok(rx.boxed())
    }
}
