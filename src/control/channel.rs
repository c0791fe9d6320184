//! Control Channel (spec §4.D): bi-directional message service between the
//! HA worker and its parent process.
//!
//! The wire format (`Frame { opcode, payload }`, length-prefixed) is kept
//! separate from the transport so it can be unit-tested on its own; the
//! transport itself is `tokio::sync::mpsc` + `oneshot`, the idiomatic
//! in-process substitute for the original's local socket.

use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

use crate::error::HaError;
use crate::model::NodeStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Register = 1,
    Status = 2,
    Pause = 3,
    Stop = 4,
    ReportNodes = 5,
}

impl TryFrom<u32> for Opcode {
    type Error = HaError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::Register),
            2 => Ok(Opcode::Status),
            3 => Ok(Opcode::Pause),
            4 => Ok(Opcode::Stop),
            5 => Ok(Opcode::ReportNodes),
            other => Err(HaError::Channel(format!("unknown opcode {other}"))),
        }
    }
}

/// A single `{ opcode, payload }` frame, length-prefixed on the wire:
/// 4-byte big-endian opcode, 4-byte big-endian payload length, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.payload.len());
        buf.extend_from_slice(&(self.opcode as u32).to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes one frame from the front of `buf`, returning the frame and
    /// the number of bytes consumed. `Ok(None)` means more bytes are
    /// needed (a partial frame).
    pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, HaError> {
        if buf.len() < 8 {
            return Ok(None);
        }
        let opcode = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let len = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
        if buf.len() < 8 + len {
            return Ok(None);
        }
        let opcode = Opcode::try_from(opcode)?;
        let payload = buf[8..8 + len].to_vec();
        Ok(Some((Frame { opcode, payload }, 8 + len)))
    }
}

/// `{status: int, info: string}` payload carried by `STATUS` replies and
/// pushes (spec §4.D).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPayload {
    pub status: i32,
    pub info: String,
}

impl StatusPayload {
    pub fn encode(&self) -> Vec<u8> {
        let info_bytes = self.info.as_bytes();
        let mut buf = Vec::with_capacity(8 + info_bytes.len());
        buf.extend_from_slice(&self.status.to_be_bytes());
        buf.extend_from_slice(&(info_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(info_bytes);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, HaError> {
        if buf.len() < 8 {
            return Err(HaError::Channel("status payload too short".to_string()));
        }
        let status = i32::from_be_bytes(buf[0..4].try_into().unwrap());
        let len = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
        let info_bytes = buf.get(8..8 + len).ok_or_else(|| {
            HaError::Channel("status payload length exceeds buffer".to_string())
        })?;
        let info = String::from_utf8(info_bytes.to_vec())
            .map_err(|e| HaError::Channel(e.to_string()))?;
        Ok(StatusPayload { status, info })
    }

    pub fn from_status(status: NodeStatus, info: &str) -> Self {
        StatusPayload {
            status: status.into(),
            info: if status == NodeStatus::Error {
                info.to_string()
            } else {
                String::new()
            },
        }
    }
}

/// Requests the HA-side `ControlService` receives from the parent.
pub enum ControlRequest {
    Register,
    Status { reply: oneshot::Sender<StatusPayload> },
    Pause,
    Stop,
    ReportNodes,
}

/// HA-worker side of the channel: receives requests, pushes unsolicited
/// status notifications.
pub struct ControlService {
    requests: mpsc::Receiver<ControlRequest>,
    push: mpsc::Sender<StatusPayload>,
}

impl ControlService {
    pub async fn recv(&mut self) -> Option<ControlRequest> {
        self.requests.recv().await
    }

    /// Pushes a `STATUS` notification on every observed status change
    /// (spec §4.C). Send failure (parent gone) is not fatal; it is
    /// swallowed like the rest of the notification path.
    pub async fn notify_status(&self, status: NodeStatus, info: &str) {
        let _ = self.push.send(StatusPayload::from_status(status, info)).await;
    }
}

/// Parent-process side of the channel.
pub struct ControlHandle {
    requests: mpsc::Sender<ControlRequest>,
    push: mpsc::Receiver<StatusPayload>,
}

/// Send/flush failure is fatal to the caller (spec §4.D: "cannot send
/// message to HA manager service").
const SEND_ERROR: &str = "cannot send message to HA manager service";

impl ControlHandle {
    pub fn new_pair(buffer: usize) -> (ControlHandle, ControlService) {
        let (req_tx, req_rx) = mpsc::channel(buffer);
        let (push_tx, push_rx) = mpsc::channel(buffer);
        (
            ControlHandle {
                requests: req_tx,
                push: push_rx,
            },
            ControlService {
                requests: req_rx,
                push: push_tx,
            },
        )
    }

    pub async fn register(&self) -> Result<(), HaError> {
        self.requests
            .send(ControlRequest::Register)
            .await
            .map_err(|_| HaError::Channel(SEND_ERROR.to_string()))
    }

    /// Requests current status with a caller-provided timeout; on timeout
    /// the observed status is `UNKNOWN` (spec §4.D "Receive policy").
    pub async fn status(&self, timeout: Duration) -> StatusPayload {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .requests
            .send(ControlRequest::Status { reply: reply_tx })
            .await
            .is_err()
        {
            return StatusPayload::from_status(NodeStatus::Unknown, "");
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(payload)) => payload,
            _ => StatusPayload::from_status(NodeStatus::Unknown, ""),
        }
    }

    pub async fn pause(&self) -> Result<(), HaError> {
        self.requests
            .send(ControlRequest::Pause)
            .await
            .map_err(|_| HaError::Channel(SEND_ERROR.to_string()))
    }

    pub async fn stop(&self) -> Result<(), HaError> {
        self.requests
            .send(ControlRequest::Stop)
            .await
            .map_err(|_| HaError::Channel(SEND_ERROR.to_string()))
    }

    pub async fn report_nodes(&self) -> Result<(), HaError> {
        self.requests
            .send(ControlRequest::ReportNodes)
            .await
            .map_err(|_| HaError::Channel(SEND_ERROR.to_string()))
    }

    /// Waits for the next unsolicited `STATUS` push from the HA worker.
    pub async fn recv_push(&mut self) -> Option<StatusPayload> {
        self.push.recv().await
    }
}
