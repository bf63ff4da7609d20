//! nRF Secure DFU control point framing
//!
//! As defined in nRF5_SDK_17.1.0_ddde560/components/libraries/bootloader/dfu/nrf_dfu_req_handler.h

use crate::error::{DfuError, DfuResult};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use thiserror::Error;

/// DFU Object variants
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ObjectType {
    /// Init packet
    Command = 0x01,
    /// Firmware image
    Data = 0x02,
}

/// DFU Control point opcodes
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum OpCode {
    Create = 0x01,
    /// Set packet receipt notification
    SetPrn = 0x02,
    CalculateCrc = 0x03,
    Execute = 0x04,
    Select = 0x06,
    /// Only ever sent by the target
    Response = 0x60,
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Create => "CREATE",
            OpCode::SetPrn => "SET_PRN",
            OpCode::CalculateCrc => "CALCULATE_CRC",
            OpCode::Execute => "EXECUTE",
            OpCode::Select => "SELECT",
            OpCode::Response => "RESPONSE",
        };
        f.write_str(name)
    }
}

/// DFU Response codes
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ResultCode {
    #[error("Invalid code.")]
    Invalid = 0x00,
    #[error("Success.")]
    Success = 0x01,
    #[error("Opcode not supported.")]
    OpCodeNotSupported = 0x02,
    #[error("Invalid parameter.")]
    InvalidParameter = 0x03,
    #[error("Insufficient resources.")]
    InsufficientResources = 0x04,
    #[error("Invalid object.")]
    InvalidObject = 0x05,
    #[error("Unsupported type.")]
    UnsupportedType = 0x07,
    #[error("Operation not permitted.")]
    OperationNotPermitted = 0x08,
    #[error("Operation failed.")]
    OperationFailed = 0x0A,
    #[error("Extended error.")]
    ExtError = 0x0B,
}

/// DFU Extended Error codes, following an `ExtError` result code
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ExtError {
    #[error("no extended error (bad implementation)")]
    NoError = 0x00,
    #[error("invalid error code")]
    InvalidErrorCode = 0x01,
    #[error("wrong command format")]
    WrongCommandFormat = 0x02,
    #[error("unknown command")]
    UnknownCommand = 0x03,
    #[error("invalid init command")]
    InitCommandInvalid = 0x04,
    #[error("firmware version is too low")]
    FwVersionFailure = 0x05,
    #[error("hardware version mismatch")]
    HwVersionFailure = 0x06,
    #[error("required softdevice version mismatch")]
    SdVersionFailure = 0x07,
    #[error("missing signature")]
    SignatureMissing = 0x08,
    #[error("wrong hash type")]
    WrongHashType = 0x09,
    #[error("hash calculation failed")]
    HashFailed = 0x0A,
    #[error("wrong signature type")]
    WrongSignatureType = 0x0B,
    #[error("hash verification failed")]
    VerificationFailed = 0x0C,
    #[error("insufficient space")]
    InsufficientSpace = 0x0D,
}

/// Cumulative byte count and CRC32 of the object being written
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct TransferProgress {
    pub offset: u32,
    pub crc32: u32,
}

impl TransferProgress {
    /// Decode a CALCULATE_CRC response payload: offset ++ crc32, both little-endian
    pub fn from_payload(opcode: OpCode, payload: &[u8]) -> DfuResult<Self> {
        Ok(TransferProgress {
            offset: read_u32_le(opcode, payload, 0)?,
            crc32: read_u32_le(opcode, payload, 4)?,
        })
    }

    /// Check `actual` (reported by the target) against `self`
    pub fn validate(&self, actual: &TransferProgress) -> DfuResult<()> {
        if self.crc32 != actual.crc32 {
            return Err(DfuError::ValidationFailed {
                field: ProgressField::Crc32,
                expected: self.crc32,
                actual: actual.crc32,
            });
        }
        if self.offset != actual.offset {
            return Err(DfuError::ValidationFailed {
                field: ProgressField::Offset,
                expected: self.offset,
                actual: actual.offset,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProgressField {
    Offset,
    Crc32,
}

impl fmt::Display for ProgressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressField::Offset => f.write_str("offset"),
            ProgressField::Crc32 => f.write_str("CRC"),
        }
    }
}

/// Decoded SELECT response
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SelectResponse {
    pub max_size: u32,
    pub offset: u32,
    pub crc32: u32,
}

impl SelectResponse {
    pub fn from_payload(payload: &[u8]) -> DfuResult<Self> {
        Ok(SelectResponse {
            max_size: read_u32_le(OpCode::Select, payload, 0)?,
            offset: read_u32_le(OpCode::Select, payload, 4)?,
            crc32: read_u32_le(OpCode::Select, payload, 8)?,
        })
    }
}

pub fn crc32(buf: &[u8], init: u32) -> u32 {
    let mut h = crc32fast::Hasher::new_with_initial(init);
    h.update(buf);
    h.finalize()
}

pub fn encode_command(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(opcode.into());
    frame.extend_from_slice(payload);
    frame
}

/// Whether a control point frame is the target's response to `opcode`
pub fn is_response_to(frame: &[u8], opcode: OpCode) -> bool {
    frame.len() >= 2 && frame[0] == OpCode::Response as u8 && frame[1] == opcode as u8
}

/// Check the result code of a response frame and return its payload
pub fn parse_response(opcode: OpCode, frame: &[u8]) -> DfuResult<&[u8]> {
    let invalid = |reason: String| DfuError::InvalidResponse { opcode, reason };
    if frame.len() < 3 {
        return Err(invalid(format!("too short ({:x?})", frame)));
    }
    if !is_response_to(frame, opcode) {
        return Err(invalid(format!("unexpected frame ({:x?})", frame)));
    }
    let result =
        ResultCode::try_from(frame[2]).map_err(|_| invalid(format!("unknown result code 0x{:02X}", frame[2])))?;
    match result {
        ResultCode::Success => Ok(&frame[3..]),
        ResultCode::ExtError => Err(DfuError::CommandRejected {
            opcode,
            result,
            ext: frame.get(3).and_then(|&code| ExtError::try_from(code).ok()),
        }),
        _ => Err(DfuError::CommandRejected { opcode, result, ext: None }),
    }
}

fn read_u32_le(opcode: OpCode, payload: &[u8], at: usize) -> DfuResult<u32> {
    payload
        .get(at..at + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| DfuError::InvalidResponse {
            opcode,
            reason: format!("payload too short ({:x?})", payload),
        })
}

/// nRF DFU service & characteristic UUIDs
///
/// from [DFU BLE Service](https://infocenter.nordicsemi.com/topic/sdk_nrf5_v17.1.0/group__nrf__dfu__ble.html)
pub mod dfu_uuids {
    use uuid::Uuid;
    /// DFU Service (16 bit UUID 0xFE59)
    pub const SERVICE: Uuid = Uuid::from_u128(0x0000FE59_0000_1000_8000_00805F9B34FB);
    /// Control Point Characteristic
    pub const CTRL_PT: Uuid = Uuid::from_u128(0x8EC90001_F315_4F60_9FB8_838830DAEA50);
    /// Data Characteristic
    pub const DATA_PT: Uuid = Uuid::from_u128(0x8EC90002_F315_4F60_9FB8_838830DAEA50);
}
