//! C6: PES packet codec (spec §4.6).

use crate::clock;
use crate::{Error, ErrorKind, Result, SliceReader};
use modular_bitfield_msb::prelude::*;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PesHeaderBits {
    start_code: B24,
    stream_id: B8,
    packet_length: B16,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PesOptionalHeaderBits {
    marker_bits: B2,
    scrambling_control: B2,
    priority: bool,
    data_alignment_indicator: bool,
    copyright: bool,
    original: bool,
    has_pts: bool,
    has_dts: bool,
    escr: bool,
    es_rate: bool,
    dsm_trick_mode: bool,
    has_additional_copy_info: bool,
    has_crc: bool,
    has_extension: bool,
    additional_header_length: B8,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct TimestampBits {
    marker_prefix: B4,
    ts_32_30: B3,
    marker_bit_1: bool,
    ts_29_15: B15,
    marker_bit_2: bool,
    ts_14_0: B15,
    marker_bit_3: bool,
}

const START_CODE: u32 = 0x000001;

/// `stream_id` values whose PES packets never carry the optional header
/// (spec §4.6; `program_stream_map`, `padding_stream`, `private_stream_2`,
/// ECM/EMM, `program_stream_directory`, and DSMCC/H.222.1 type E streams).
pub fn has_optional_header(stream_id: u8) -> bool {
    !matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF)
}

fn parse_timestamp(bytes: [u8; 5]) -> i64 {
    let bits = TimestampBits::from_bytes(bytes);
    let ticks = ((bits.ts_32_30() as u64) << 30) | ((bits.ts_29_15() as u64) << 15) | (bits.ts_14_0() as u64);
    clock::ts90khz_to_ns(ticks)
}

fn write_timestamp(ns: i64, marker_prefix: u8) -> [u8; 5] {
    let ticks = clock::ns_to_ts90khz(ns) & ((1u64 << 33) - 1);
    let mut bits = TimestampBits::new();
    bits.set_marker_prefix(marker_prefix);
    bits.set_ts_32_30(((ticks >> 30) & 0x7) as u8);
    bits.set_marker_bit_1(true);
    bits.set_ts_29_15(((ticks >> 15) & 0x7FFF) as u16);
    bits.set_marker_bit_2(true);
    bits.set_ts_14_0((ticks & 0x7FFF) as u16);
    bits.set_marker_bit_3(true);
    bits.into_bytes()
}

/// A fully reassembled PES packet (spec §3 `Pes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pes {
    pub stream_id: u8,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub data_alignment_indicator: bool,
    pub payload: Vec<u8>,
}

impl Pes {
    /// Read the 6-byte fixed PES header and return the total packet length
    /// declared by the encoder, including those 6 bytes (spec §4.6).
    ///
    /// Returns `Ok(None)` when `pes_packet_length == 0`, which is only legal
    /// for video stream_ids and means "read until the next start code"
    /// (spec §9 Open Question 2).
    pub fn peek_declared_length(data: &[u8]) -> Result<Option<usize>> {
        let mut reader = SliceReader::new(data);
        let header = PesHeaderBits::from_bytes(reader.read_array_ref::<6>()?);
        if header.start_code() != START_CODE {
            return Err(Error::new(ErrorKind::InvalidPacket, "missing PES start code"));
        }
        let declared = header.packet_length() as usize;
        if declared == 0 {
            if !(0xE0..=0xEF).contains(&header.stream_id()) {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "pes_packet_length=0 is only legal for video stream_ids",
                ));
            }
            Ok(None)
        } else {
            Ok(Some(6 + declared))
        }
    }

    /// Decode a complete PES packet: 6-byte header, optional header, payload
    /// (spec §4.6).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(data);
        let header = PesHeaderBits::from_bytes(reader.read_array_ref::<6>()?);
        if header.start_code() != START_CODE {
            return Err(Error::new(ErrorKind::InvalidPacket, "missing PES start code"));
        }
        let stream_id = header.stream_id();

        let mut pts = None;
        let mut dts = None;
        let mut data_alignment_indicator = false;

        if has_optional_header(stream_id) {
            if reader.remaining_len() < 3 {
                return Err(Error::with_pid(ErrorKind::InvalidData, 0, "short read of PES optional header"));
            }
            let optional = PesOptionalHeaderBits::from_bytes(reader.read_array_ref::<3>()?);
            data_alignment_indicator = optional.data_alignment_indicator();
            let additional_length = optional.additional_header_length() as usize;
            let mut sub = reader.new_sub_reader(additional_length)?;

            if optional.has_pts() {
                if sub.remaining_len() < 5 {
                    return Err(Error::new(ErrorKind::InvalidData, "short read of PTS"));
                }
                pts = Some(parse_timestamp(sub.read_array_ref::<5>()?));
            }
            if optional.has_dts() {
                if sub.remaining_len() < 5 {
                    return Err(Error::new(ErrorKind::InvalidData, "short read of DTS"));
                }
                dts = Some(parse_timestamp(sub.read_array_ref::<5>()?));
            }
            // ESCR, ES rate, DSM trick mode, additional copy info, PES CRC,
            // and the PES extension fields are not surfaced; `sub`'s
            // remaining bytes (already bounded by additional_header_length)
            // are simply skipped.
        }

        let payload = reader.read_to_end()?.to_vec();
        Ok(Pes { stream_id, pts, dts, data_alignment_indicator, payload })
    }

    /// Encode back to a complete PES packet.
    pub fn encode(&self) -> Vec<u8> {
        let mut optional_bytes = Vec::new();
        let needs_optional = has_optional_header(self.stream_id);
        if needs_optional {
            let mut additional = Vec::new();
            if let Some(pts) = self.pts {
                let marker_prefix = if self.dts.is_some() { 0b0011 } else { 0b0010 };
                additional.extend_from_slice(&write_timestamp(pts, marker_prefix));
            }
            if let Some(dts) = self.dts {
                additional.extend_from_slice(&write_timestamp(dts, 0b0001));
            }

            let mut optional = PesOptionalHeaderBits::new();
            optional.set_marker_bits(0b10);
            optional.set_data_alignment_indicator(self.data_alignment_indicator);
            optional.set_has_pts(self.pts.is_some());
            optional.set_has_dts(self.dts.is_some());
            optional.set_additional_header_length(additional.len() as u8);
            optional_bytes.extend_from_slice(&optional.into_bytes());
            optional_bytes.extend_from_slice(&additional);
        }

        let total_len = optional_bytes.len() + self.payload.len();
        let mut header = PesHeaderBits::new();
        header.set_start_code(START_CODE);
        header.set_stream_id(self.stream_id);
        header.set_packet_length(if total_len > u16::MAX as usize { 0 } else { total_len as u16 });

        let mut out = header.into_bytes().to_vec();
        out.extend_from_slice(&optional_bytes);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// A PES fragment recovered from one leader TS packet's payload: the fixed
/// and optional headers, plus whatever elementary payload bytes followed in
/// that same packet (spec §3 `PartialPes`, §4.8 `finalisation`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialPes {
    pub stream_id: u8,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub data_alignment_indicator: bool,
    /// Expected elementary payload length for the whole unit, once every
    /// fragment's bytes are concatenated. `None` when unbounded
    /// (`pes_packet_length == 0`, legal only for video).
    pub declared_length: Option<usize>,
    /// Elementary payload bytes that followed the header in this fragment.
    pub payload_so_far: Vec<u8>,
}

impl PartialPes {
    /// Best-effort decode of whatever header bytes are available; never
    /// fails on a short buffer, since this is only used to surface
    /// in-progress state to callers (spec §4.8).
    pub fn from_incomplete(data: &[u8]) -> Option<Self> {
        let mut reader = SliceReader::new(data);
        let header_bytes = reader.read_array_ref::<6>().ok()?;
        let header = PesHeaderBits::from_bytes(header_bytes);
        if header.start_code() != START_CODE {
            return None;
        }
        let stream_id = header.stream_id();
        let declared = header.packet_length() as usize;

        let mut pts = None;
        let mut dts = None;
        let mut data_alignment_indicator = false;
        let mut optional_header_len = 0usize;
        if has_optional_header(stream_id) {
            if let Ok(optional_bytes) = reader.read_array_ref::<3>() {
                let optional = PesOptionalHeaderBits::from_bytes(optional_bytes);
                data_alignment_indicator = optional.data_alignment_indicator();
                let additional_length = optional.additional_header_length() as usize;
                optional_header_len = 3 + additional_length;
                if let Ok(mut sub) = reader.new_sub_reader(additional_length.min(reader.remaining_len())) {
                    if optional.has_pts() {
                        if let Ok(bytes) = sub.read_array_ref::<5>() {
                            pts = Some(parse_timestamp(bytes));
                        }
                    }
                    if optional.has_dts() {
                        if let Ok(bytes) = sub.read_array_ref::<5>() {
                            dts = Some(parse_timestamp(bytes));
                        }
                    }
                }
            }
        }

        let declared_length = if declared == 0 { None } else { Some(declared.saturating_sub(optional_header_len)) };
        let payload_so_far = reader.read_to_end().unwrap_or(&[]).to_vec();

        Some(PartialPes {
            stream_id,
            pts,
            dts,
            data_alignment_indicator,
            declared_length,
            payload_so_far,
        })
    }
}
