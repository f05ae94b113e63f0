//! Frame codec
//!
//! Wire format: `[0xAA][0x55][LEN][PAYLOAD; LEN][CRC_LO][CRC_HI]`, where the
//! CRC16/MODBUS covers header, length and payload. Readings travel as eight
//! little-endian `f32`, commands as one little-endian `i32`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{FrameError, LinkError, Result};

pub const HEADER: [u8; 2] = [0xAA, 0x55];
/// Header, length byte and checksum
pub const FRAME_OVERHEAD: usize = 5;
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;
pub const READING_FIELDS: usize = 8;
pub const READING_PAYLOAD_LEN: usize = READING_FIELDS * 4;
pub const READING_FRAME_LEN: usize = READING_PAYLOAD_LEN + FRAME_OVERHEAD;
pub const COMMAND_PAYLOAD_LEN: usize = 4;
pub const COMMAND_FRAME_LEN: usize = COMMAND_PAYLOAD_LEN + FRAME_OVERHEAD;

/// CRC16/MODBUS (reflected poly 0xA001, init 0xFFFF, no final xor)
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// One decoded sensor reading, fields in wire order
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    pub air_temperature: f32,
    pub air_humidity: f32,
    pub co2: f32,
    pub insolation: f32,
    pub weight_raw: f32,
    pub ph_voltage: f32,
    pub ec_voltage: f32,
    pub water_temperature: f32,
}

impl Reading {
    pub fn from_array(v: [f32; READING_FIELDS]) -> Self {
        Self {
            air_temperature: v[0],
            air_humidity: v[1],
            co2: v[2],
            insolation: v[3],
            weight_raw: v[4],
            ph_voltage: v[5],
            ec_voltage: v[6],
            water_temperature: v[7],
        }
    }

    pub fn to_array(&self) -> [f32; READING_FIELDS] {
        [
            self.air_temperature,
            self.air_humidity,
            self.co2,
            self.insolation,
            self.weight_raw,
            self.ph_voltage,
            self.ec_voltage,
            self.water_temperature,
        ]
    }

    /// Parse a reading payload; anything but 32 bytes is rejected
    pub fn from_payload(payload: &[u8]) -> std::result::Result<Self, FrameError> {
        if payload.len() != READING_PAYLOAD_LEN {
            return Err(FrameError::UnexpectedLength {
                expected: READING_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let mut fields = [0f32; READING_FIELDS];
        let mut cursor = payload;
        for field in fields.iter_mut() {
            *field = cursor.get_f32_le();
        }
        Ok(Self::from_array(fields))
    }

    pub fn to_payload(&self) -> [u8; READING_PAYLOAD_LEN] {
        let mut out = [0u8; READING_PAYLOAD_LEN];
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.to_array()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

/// Opcode sent to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command(pub i32);

impl Command {
    pub fn opcode(self) -> i32 {
        self.0
    }
}

impl From<i32> for Command {
    fn from(opcode: i32) -> Self {
        Self(opcode)
    }
}

/// Result of one decode step
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Reading(Reading),
    NeedMoreData,
    Corrupt(FrameError),
}

/// Outcome of [`decode`] plus how many bytes it removed from the buffer
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeStep {
    /// Total bytes removed (discarded garbage plus any frame)
    pub consumed: usize,
    /// Leading bytes dropped while searching for a header
    pub discarded: usize,
    pub outcome: DecodeOutcome,
}

impl DecodeStep {
    fn need_more(discarded: usize) -> Self {
        Self {
            consumed: discarded,
            discarded,
            outcome: DecodeOutcome::NeedMoreData,
        }
    }
}

/// Try to take one frame off the front of `buf`
///
/// Call repeatedly until the outcome is `NeedMoreData`. Garbage before a
/// header is dropped even when the frame behind it is still incomplete.
pub fn decode(buf: &mut BytesMut) -> DecodeStep {
    if buf.len() < FRAME_OVERHEAD {
        return DecodeStep::need_more(0);
    }

    let mut discarded = 0;
    while buf.len() >= HEADER.len() && buf[..HEADER.len()] != HEADER {
        buf.advance(1);
        discarded += 1;
    }
    if discarded > 0 {
        trace!("Resync: discarded {} bytes", discarded);
    }
    if buf.len() < HEADER.len() + 1 {
        return DecodeStep::need_more(discarded);
    }

    let length = buf[HEADER.len()] as usize;
    let needed = length + FRAME_OVERHEAD;
    if buf.len() < needed {
        return DecodeStep::need_more(discarded);
    }

    let frame = buf.split_to(needed);
    let consumed = discarded + needed;
    let end = frame.len();
    let received = u16::from_le_bytes([frame[end - 2], frame[end - 1]]);
    let computed = crc16_modbus(&frame[..end - 2]);

    let outcome = if computed != received {
        warn!(
            "Checksum failure: computed {:#06X}, received {:#06X}, dropping {} byte frame",
            computed, received, needed
        );
        DecodeOutcome::Corrupt(FrameError::ChecksumMismatch { computed, received })
    } else {
        match Reading::from_payload(&frame[HEADER.len() + 1..end - 2]) {
            Ok(reading) => DecodeOutcome::Reading(reading),
            Err(e) => {
                warn!("Dropping frame: {}", e);
                DecodeOutcome::Corrupt(e)
            },
        }
    };

    DecodeStep {
        consumed,
        discarded,
        outcome,
    }
}

fn build_frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    out.put_slice(&HEADER);
    out.put_u8(payload.len() as u8);
    out.put_slice(payload);
    let crc = crc16_modbus(&out);
    out.put_u16_le(crc);
    out.freeze()
}

/// Frame an arbitrary payload (at most 255 bytes)
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(LinkError::EncodingInvariantViolation(format!(
            "payload of {} bytes exceeds the {} byte frame limit",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    Ok(build_frame(payload))
}

/// Encode a command frame (LEN = 4)
pub fn encode_command(command: Command) -> Bytes {
    build_frame(&command.0.to_le_bytes())
}

/// Encode a reading frame the way the device does (LEN = 32)
pub fn encode_reading(reading: &Reading) -> Bytes {
    build_frame(&reading.to_payload())
}

/// Parse one complete command frame, as the device would
///
/// `None` unless `frame` is exactly a well-formed LEN = 4 frame.
pub fn decode_command(frame: &[u8]) -> Option<Command> {
    if frame.len() != COMMAND_FRAME_LEN
        || frame[..HEADER.len()] != HEADER
        || frame[HEADER.len()] as usize != COMMAND_PAYLOAD_LEN
    {
        return None;
    }
    let end = frame.len();
    let received = u16::from_le_bytes([frame[end - 2], frame[end - 1]]);
    if crc16_modbus(&frame[..end - 2]) != received {
        return None;
    }
    let payload: [u8; COMMAND_PAYLOAD_LEN] = frame[3..3 + COMMAND_PAYLOAD_LEN].try_into().ok()?;
    Some(Command(i32::from_le_bytes(payload)))
}

/// Counters kept by a [`FrameDecoder`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderCounters {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub bytes_discarded: u64,
}

/// Accumulation buffer plus [`decode`]
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    counters: DecoderCounters,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            counters: DecoderCounters::default(),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn next_step(&mut self) -> DecodeStep {
        let step = decode(&mut self.buf);
        self.counters.bytes_discarded += step.discarded as u64;
        match step.outcome {
            DecodeOutcome::Reading(_) => self.counters.frames_decoded += 1,
            DecodeOutcome::Corrupt(_) => self.counters.frames_dropped += 1,
            DecodeOutcome::NeedMoreData => {},
        }
        step
    }

    /// Bytes waiting for more data
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn counters(&self) -> DecoderCounters {
        self.counters
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
