//! C7: 188-byte TS packet framing, adaptation field, PCR (spec §4.7).

use crate::clock;
use crate::{Error, ErrorKind, Result, SliceReader};
use modular_bitfield_msb::prelude::*;
use smallvec::SmallVec;

/// Size in bytes of every TS packet on the wire.
pub const PACKET_LEN: usize = 188;
/// Bytes available for adaptation field + payload after the 4-byte link header.
const BODY_LEN: usize = PACKET_LEN - 4;

/// Transport scrambling control (spec §3: `scrambling`).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum Scrambling {
    /// Not scrambled.
    None,
    /// Reserved; do not use.
    Reserved,
    /// Scrambled with the even key.
    EvenKey,
    /// Scrambled with the odd key.
    OddKey,
}

/// Which logical family a PID belongs to (spec §4.7 "PID class").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidClass {
    /// PID 0x0000, always the PAT.
    Pat,
    /// PID 0x1FFF, stuffing; dropped silently by the demuxer.
    NullPacket,
    /// A PID range that may carry PSI tables (PMT/CAT/SCTE-35/...).
    Psi,
    /// Reserved or application-defined PID outside the PSI ranges.
    Unsupported,
}

/// Classify a PID per spec §4.7.
pub fn classify_pid(pid: u16) -> PidClass {
    match pid {
        0x0000 => PidClass::Pat,
        0x1FFF => PidClass::NullPacket,
        0x0020..=0x1FFA | 0x1FFC..=0x1FFE => PidClass::Psi,
        _ => PidClass::Unsupported,
    }
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PacketHeader {
    sync_byte: B8,
    transport_error: bool,
    pusi: bool,
    priority: bool,
    pid: B13,
    scrambling: Scrambling,
    has_adaptation_field: bool,
    has_payload: bool,
    continuity_counter: B4,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct AdaptationFlags {
    discontinuity: bool,
    random_access: bool,
    es_priority: bool,
    has_pcr: bool,
    has_opcr: bool,
    has_splicing_point: bool,
    has_transport_private_data: bool,
    has_extension: bool,
}

fn parse_pcr_bytes(b: [u8; 6]) -> (u64, u16) {
    let mut base: u64 = (b[0] as u64) << 25;
    base |= (b[1] as u64) << 17;
    base |= (b[2] as u64) << 9;
    base |= (b[3] as u64) << 1;
    base |= (b[4] as u64) >> 7;

    let mut extension: u16 = ((b[4] & 0x1) as u16) << 8;
    extension |= b[5] as u16;
    (base, extension)
}

fn write_pcr_bytes(base: u64, extension: u16) -> [u8; 6] {
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 0x1) << 7) as u8) | 0x7E | (((extension >> 8) & 0x1) as u8),
        (extension & 0xFF) as u8,
    ]
}

/// Extra adaptation-field data that isn't flattened onto [`TsPacket`]
/// (SPEC_FULL §E: the original PCR is additive, decode-only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    /// Original Program Clock Reference, in nanoseconds.
    pub opcr: Option<i64>,
    /// Elementary stream priority indicator.
    pub es_priority: bool,
    /// Splicing point flag (splice countdown itself is not decoded).
    pub splicing_point: bool,
}

/// One 188-byte MPEG-TS packet, fully decoded (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPacket {
    /// 13-bit packet identifier.
    pub pid: u16,
    /// PID family, derived from `pid`.
    pub pid_class: PidClass,
    /// Payload-unit-start indicator.
    pub pusi: bool,
    /// 4-bit per-PID continuity counter.
    pub continuity_counter: u8,
    /// Transport scrambling control.
    pub scrambling: Scrambling,
    /// Discontinuity indicator (adaptation field).
    pub discontinuity_indicator: bool,
    /// Random access indicator (adaptation field).
    pub random_access_indicator: bool,
    /// Program Clock Reference, in nanoseconds.
    pub pcr: Option<i64>,
    /// Secondary adaptation-field data not promoted to top-level fields.
    pub adaptation: Option<AdaptationField>,
    /// Payload bytes (up to 184).
    pub payload: SmallVec<[u8; 184]>,
}

impl TsPacket {
    /// Decode exactly one 188-byte frame (spec §4.7).
    pub fn decode(frame: &[u8; PACKET_LEN]) -> Result<Self> {
        let mut reader = SliceReader::new(frame);
        let header_bytes = reader.read_array_ref::<4>()?;
        let header = PacketHeader::from_bytes(header_bytes);
        if header.sync_byte() != 0x47 {
            return Err(Error::new(ErrorKind::InvalidPacket, "missing 0x47 sync byte"));
        }
        let pid = header.pid();
        let pid_class = classify_pid(pid);

        let mut discontinuity_indicator = false;
        let mut random_access_indicator = false;
        let mut pcr = None;
        let mut adaptation = None;
        let mut payload = SmallVec::<[u8; 184]>::new();

        match (header.has_adaptation_field(), header.has_payload()) {
            (false, false) => {
                return Err(Error::with_pid(
                    ErrorKind::UnsupportedPacket,
                    pid,
                    "reserved adaptation_field_control 00",
                ));
            }
            (false, true) => {
                payload.extend_from_slice(reader.read_to_end()?);
            }
            (true, has_payload) => {
                let length = reader.read_u8()? as usize;
                if length > 0 {
                    let mut a_reader = reader.new_sub_reader(length)?;
                    let flags = AdaptationFlags::from_bytes(a_reader.read_array_ref::<1>()?);
                    discontinuity_indicator = flags.discontinuity();
                    random_access_indicator = flags.random_access();
                    if flags.has_pcr() {
                        if a_reader.remaining_len() < 6 {
                            return Err(Error::with_pid(
                                ErrorKind::InvalidData,
                                pid,
                                "short read of PCR",
                            ));
                        }
                        let (base, ext) = parse_pcr_bytes(a_reader.read_array_ref::<6>()?);
                        pcr = Some(clock::pcr_to_ns(base, ext));
                    }
                    let mut opcr = None;
                    if flags.has_opcr() {
                        if a_reader.remaining_len() < 6 {
                            return Err(Error::with_pid(
                                ErrorKind::InvalidData,
                                pid,
                                "short read of OPCR",
                            ));
                        }
                        let (base, ext) = parse_pcr_bytes(a_reader.read_array_ref::<6>()?);
                        opcr = Some(clock::pcr_to_ns(base, ext));
                    }
                    // Splice countdown, transport private data, and the
                    // adaptation extension are not consumed downstream; the
                    // remainder of `a_reader` (including stuffing) is
                    // skipped as a block.
                    adaptation = Some(AdaptationField {
                        opcr,
                        es_priority: flags.es_priority(),
                        splicing_point: flags.has_splicing_point(),
                    });
                }
                if has_payload {
                    payload.extend_from_slice(reader.read_to_end()?);
                }
            }
        }

        Ok(TsPacket {
            pid,
            pid_class,
            pusi: header.pusi(),
            continuity_counter: header.continuity_counter(),
            scrambling: header.scrambling(),
            discontinuity_indicator,
            random_access_indicator,
            pcr,
            adaptation,
            payload,
        })
    }

    /// Encode this packet back into exactly 188 bytes (spec §4.7).
    pub fn encode(&self) -> Result<[u8; PACKET_LEN]> {
        if self.payload.len() > 184 {
            return Err(Error::with_pid(
                ErrorKind::InvalidData,
                self.pid,
                "payload exceeds 184 bytes",
            ));
        }
        let opcr = self.adaptation.and_then(|a| a.opcr);
        let needs_adaptation = self.discontinuity_indicator
            || self.random_access_indicator
            || self.pcr.is_some()
            || opcr.is_some()
            || self.payload.len() < 184;
        let has_payload = !self.payload.is_empty();

        let mut header = PacketHeader::new();
        header.set_sync_byte(0x47);
        header.set_transport_error(false);
        header.set_pusi(self.pusi);
        header.set_priority(false);
        header.set_pid(self.pid);
        header.set_scrambling(self.scrambling);
        header.set_has_adaptation_field(needs_adaptation);
        header.set_has_payload(has_payload);
        header.set_continuity_counter(self.continuity_counter & 0x0F);

        let mut out = [0u8; PACKET_LEN];
        out[0..4].copy_from_slice(&header.into_bytes());

        if !needs_adaptation {
            out[4..188].copy_from_slice(&self.payload);
            return Ok(out);
        }

        let adaptation_field_length = 183usize
            .checked_sub(self.payload.len())
            .ok_or_else(|| Error::with_pid(ErrorKind::InvalidData, self.pid, "payload too large for adaptation field"))?;
        out[4] = adaptation_field_length as u8;
        if adaptation_field_length == 0 {
            out[5..188].copy_from_slice(&self.payload);
            return Ok(out);
        }

        let mut flags = AdaptationFlags::new();
        flags.set_discontinuity(self.discontinuity_indicator);
        flags.set_random_access(self.random_access_indicator);
        flags.set_es_priority(self.adaptation.map(|a| a.es_priority).unwrap_or(false));
        flags.set_has_pcr(self.pcr.is_some());
        flags.set_has_opcr(opcr.is_some());
        flags.set_has_splicing_point(self.adaptation.map(|a| a.splicing_point).unwrap_or(false));
        flags.set_has_transport_private_data(false);
        flags.set_has_extension(false);

        let mut cursor = 5usize;
        out[cursor] = flags.into_bytes()[0];
        cursor += 1;
        if let Some(pcr_ns) = self.pcr {
            let (base, ext) = clock::ns_to_pcr(pcr_ns);
            out[cursor..cursor + 6].copy_from_slice(&write_pcr_bytes(base, ext));
            cursor += 6;
        }
        if let Some(opcr_ns) = opcr {
            let (base, ext) = clock::ns_to_pcr(opcr_ns);
            out[cursor..cursor + 6].copy_from_slice(&write_pcr_bytes(base, ext));
            cursor += 6;
        }
        let stuffing_end = 5 + adaptation_field_length;
        for b in &mut out[cursor..stuffing_end] {
            *b = 0xFF;
        }
        out[stuffing_end..188].copy_from_slice(&self.payload);
        Ok(out)
    }
}

/// Result of cutting an input buffer into as many 188-byte frames as fit
/// (spec §4.7 `parse_many`).
#[derive(Debug, Default)]
pub struct ParseManyResult {
    /// One decode result per complete 188-byte frame consumed, in order.
    pub packets: Vec<Result<TsPacket>>,
    /// The 0..187 trailing bytes that didn't fill a whole frame.
    pub tail: Vec<u8>,
}

/// Cut `data` into as many 188-byte frames as fit, decoding each.
///
/// This performs no resynchronisation: a malformed frame is reported as an
/// error for that frame and parsing continues at the next 188-byte
/// boundary. Resync-on-corruption is the demuxer's job (spec §4.9), because
/// it requires scanning for the next `0x47` at arbitrary byte offsets, not
/// just at frame boundaries.
pub fn parse_many(data: &[u8]) -> ParseManyResult {
    let mut packets = Vec::with_capacity(data.len() / PACKET_LEN);
    let mut offset = 0;
    while data.len() - offset >= PACKET_LEN {
        let mut frame = [0u8; PACKET_LEN];
        frame.copy_from_slice(&data[offset..offset + PACKET_LEN]);
        packets.push(TsPacket::decode(&frame));
        offset += PACKET_LEN;
    }
    ParseManyResult {
        packets,
        tail: data[offset..].to_vec(),
    }
}
