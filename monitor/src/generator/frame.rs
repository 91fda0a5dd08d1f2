//! Compact test framing carried by the synthetic front-end.
//!
//! `SYNC | kind | endpoint (BE u32) | consumption (BE u32) | crc16 (BE)`

use powermoncore::protocol::{
    Idm, MeterMessage, NetIdm, ParserRegistry, ProtocolParams, ProtocolParser, Scm, ScmPlus, R900,
};

pub const SYNC: [u8; 4] = [0xE2, 0x1D, 0xF0, 0x0F];
pub const FRAME_LEN: usize = 15;
pub const PROTOCOL_NAME: &str = "frame";

const CENTER_FREQ: u32 = 912_600_155;
const DATA_RATE: u32 = 32_768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterKind {
    Scm = 0,
    ScmPlus = 1,
    Idm = 2,
    NetIdm = 3,
    R900 = 4,
    R900Bcd = 5,
}

impl MeterKind {
    pub const ALL: [MeterKind; 6] = [
        MeterKind::Scm,
        MeterKind::ScmPlus,
        MeterKind::Idm,
        MeterKind::NetIdm,
        MeterKind::R900,
        MeterKind::R900Bcd,
    ];

    fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as u8 == tag)
    }
}

/// CRC-16/CCITT-FALSE.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

pub fn encode(kind: MeterKind, endpoint_id: u32, consumption: u32) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&SYNC);
    frame[4] = kind as u8;
    frame[5..9].copy_from_slice(&endpoint_id.to_be_bytes());
    frame[9..13].copy_from_slice(&consumption.to_be_bytes());
    let crc = crc16(&frame[4..13]);
    frame[13..].copy_from_slice(&crc.to_be_bytes());
    frame
}

/// Decodes a frame starting at the sync word; `None` on bad length, tag or CRC.
pub fn decode(frame: &[u8]) -> Option<MeterMessage> {
    if frame.len() < FRAME_LEN || frame[..4] != SYNC {
        return None;
    }
    let crc = u16::from_be_bytes([frame[13], frame[14]]);
    if crc16(&frame[4..13]) != crc {
        return None;
    }
    let kind = MeterKind::from_tag(frame[4])?;
    let id = u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]);
    let consumption = u32::from_be_bytes([frame[9], frame[10], frame[11], frame[12]]);

    let message = match kind {
        MeterKind::Scm => MeterMessage::Scm(Scm {
            id,
            ert_type: 7,
            tamper_phy: 0,
            tamper_enc: 0,
            consumption,
            checksum: crc,
        }),
        MeterKind::ScmPlus => MeterMessage::ScmPlus(ScmPlus {
            frame_sync: 0x16A3,
            protocol_id: 0x1E,
            endpoint_type: 0xAB,
            endpoint_id: id,
            consumption,
            tamper: 0,
            packet_crc: crc,
        }),
        MeterKind::Idm => MeterMessage::Idm(Idm {
            preamble: 0x5555_16A3,
            packet_type_id: 0x1C,
            packet_length: 0x5C,
            hamming_code: 0xC6,
            application_version: 4,
            ert_type: 7,
            ert_serial_number: id,
            consumption_interval_count: 0,
            module_programming_state: 0,
            tamper_counters: vec![0; 6],
            asynchronous_counters: 0,
            power_outage_flags: vec![0; 6],
            last_consumption_count: consumption,
            differential_consumption_intervals: vec![0; 47],
            transmit_time_offset: 0,
            serial_number_crc: 0,
            packet_crc: crc,
        }),
        MeterKind::NetIdm => MeterMessage::NetIdm(NetIdm {
            preamble: 0x5555_16A3,
            protocol_id: 0x1C,
            packet_length: 0x5C,
            hamming_code: 0xC6,
            application_version: 4,
            ert_type: 8,
            ert_serial_number: id,
            consumption_interval_count: 0,
            programming_state: 0,
            last_generation: 0,
            last_consumption: consumption,
            last_consumption_net: consumption,
            differential_consumption_intervals: vec![0; 27],
            transmit_time_offset: 0,
            serial_number_crc: 0,
            packet_crc: crc,
        }),
        MeterKind::R900 | MeterKind::R900Bcd => {
            let reading = R900 {
                id,
                unkn1: 0,
                no_use: 0,
                back_flow: 0,
                consumption,
                unkn3: 0,
                leak: 0,
                leak_now: 0,
                checksum: crc.to_be_bytes().to_vec(),
            };
            if kind == MeterKind::R900 {
                MeterMessage::R900(reading)
            } else {
                MeterMessage::R900Bcd(reading)
            }
        }
    };
    Some(message)
}

/// Finds every valid frame in a window of raw bytes.
pub struct FrameParser {
    symbol_length: usize,
}

impl FrameParser {
    pub fn new(symbol_length: usize) -> Self {
        Self { symbol_length }
    }
}

impl ProtocolParser for FrameParser {
    fn name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn params(&self) -> ProtocolParams {
        ProtocolParams {
            center_freq: CENTER_FREQ,
            data_rate: DATA_RATE,
            symbol_length: self.symbol_length,
            packet_symbols: FRAME_LEN * 8,
        }
    }

    fn parse(&mut self, window: &[u8], out: &mut Vec<MeterMessage>) {
        let mut offset = 0;
        while offset + FRAME_LEN <= window.len() {
            if window[offset..offset + 4] == SYNC {
                if let Some(message) = decode(&window[offset..offset + FRAME_LEN]) {
                    out.push(message);
                    offset += FRAME_LEN;
                    continue;
                }
            }
            offset += 1;
        }
    }
}

/// Parsers available to this binary.
pub fn registry() -> ParserRegistry {
    let mut registry = ParserRegistry::new();
    registry.register(PROTOCOL_NAME, |symbol_length| {
        Box::new(FrameParser::new(symbol_length))
    });
    registry
}
