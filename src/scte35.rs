//! C5: SCTE-35 `splice_info_section` / `splice_insert` codec (spec §4.5).

use crate::clock;
use crate::{Error, ErrorKind, Result, SliceReader};
use modular_bitfield_msb::prelude::*;

const PTS_33BIT_MASK: u64 = (1u64 << 33) - 1;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct Scte35HeaderBits {
    protocol_version: B8,
    encrypted_packet: bool,
    encryption_algorithm: B6,
    pts_adjustment: B33,
    cw_index: B8,
    tier: B12,
    splice_command_length: B12,
    splice_command_type: B8,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct SpliceInsertHeaderBits {
    splice_event_id: B32,
    splice_event_cancel_indicator: bool,
    reserved: B7,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct SpliceInsertFlagsBits {
    out_of_network_indicator: bool,
    program_splice_flag: bool,
    duration_flag: bool,
    splice_immediate_flag: bool,
    reserved: B4,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct SpliceTimeBits {
    time_specified_flag: bool,
    reserved: B6,
    pts_time: B33,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct BreakDurationBits {
    auto_return: bool,
    reserved: B6,
    duration: B33,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct SpliceInsertTailBits {
    unique_program_id: B16,
    avail_num: B8,
    avails_expected: B8,
}

/// `splice_command_type` values (spec §3, §4.5). Every other value is
/// genuinely unknown and fails decode with `unknown_splice_type`.
const SPLICE_NULL: u8 = 0x00;
const SPLICE_SCHEDULE: u8 = 0x04;
const SPLICE_INSERT: u8 = 0x05;
const TIME_SIGNAL: u8 = 0x06;
const BANDWIDTH_RESERVATION: u8 = 0x07;
const PRIVATE_COMMAND: u8 = 0xFF;

/// Present only when `encrypted_packet` is set; decrypting the ciphertext
/// command/descriptor bytes is out of scope (spec §9 Open Question 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub encryption_algorithm: u8,
    pub cw_index: u8,
}

/// `break_duration()` (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceBreakDuration {
    pub auto_return: bool,
    /// Duration in nanoseconds.
    pub duration: i64,
}

/// Decoded `splice_insert()` command (spec §3 `SpliceInsert`).
///
/// Only single-program splices (`program_splice_flag == 1`) are modelled;
/// a component-level splice fails decode with `ErrorKind::UnsupportedPacket`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceInsert {
    pub splice_event_id: u32,
    pub splice_event_cancel_indicator: bool,
    pub out_of_network_indicator: bool,
    pub splice_immediate_flag: bool,
    /// Splice point, in nanoseconds. `None` when immediate or unspecified.
    pub splice_time_pts: Option<i64>,
    pub break_duration: Option<SpliceBreakDuration>,
    pub unique_program_id: u16,
    pub avail_num: u8,
    pub avails_expected: u8,
}

impl SpliceInsert {
    fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(data);
        let header = SpliceInsertHeaderBits::from_bytes(reader.read_array_ref::<5>()?);
        let cancel = header.splice_event_cancel_indicator();
        if cancel {
            return Ok(SpliceInsert {
                splice_event_id: header.splice_event_id(),
                splice_event_cancel_indicator: true,
                out_of_network_indicator: false,
                splice_immediate_flag: false,
                splice_time_pts: None,
                break_duration: None,
                unique_program_id: 0,
                avail_num: 0,
                avails_expected: 0,
            });
        }

        let flags = SpliceInsertFlagsBits::from_bytes(reader.read_array_ref::<1>()?);
        if !flags.program_splice_flag() {
            return Err(Error::new(
                ErrorKind::UnsupportedPacket,
                "component-level splice_insert is not supported",
            ));
        }

        let splice_time_pts = if flags.splice_immediate_flag() {
            None
        } else {
            parse_splice_time(&mut reader)?
        };

        let break_duration = if flags.duration_flag() {
            let bits = BreakDurationBits::from_bytes(reader.read_array_ref::<5>()?);
            Some(SpliceBreakDuration {
                auto_return: bits.auto_return(),
                duration: clock::ts90khz_to_ns(bits.duration() as u64),
            })
        } else {
            None
        };

        let tail = SpliceInsertTailBits::from_bytes(reader.read_array_ref::<4>()?);

        Ok(SpliceInsert {
            splice_event_id: header.splice_event_id(),
            splice_event_cancel_indicator: false,
            out_of_network_indicator: flags.out_of_network_indicator(),
            splice_immediate_flag: flags.splice_immediate_flag(),
            splice_time_pts,
            break_duration,
            unique_program_id: tail.unique_program_id(),
            avail_num: tail.avail_num(),
            avails_expected: tail.avails_expected(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut header = SpliceInsertHeaderBits::new();
        header.set_splice_event_id(self.splice_event_id);
        header.set_splice_event_cancel_indicator(self.splice_event_cancel_indicator);
        header.set_reserved(0x7F);
        let mut out = header.into_bytes().to_vec();
        if self.splice_event_cancel_indicator {
            return out;
        }

        let mut flags = SpliceInsertFlagsBits::new();
        flags.set_out_of_network_indicator(self.out_of_network_indicator);
        flags.set_program_splice_flag(true);
        flags.set_duration_flag(self.break_duration.is_some());
        flags.set_splice_immediate_flag(self.splice_immediate_flag);
        flags.set_reserved(0x0F);
        out.extend_from_slice(&flags.into_bytes());

        if !self.splice_immediate_flag {
            out.extend_from_slice(&encode_splice_time(self.splice_time_pts));
        }

        if let Some(break_duration) = self.break_duration {
            let mut bits = BreakDurationBits::new();
            bits.set_auto_return(break_duration.auto_return);
            bits.set_reserved(0x3F);
            bits.set_duration((clock::ns_to_ts90khz(break_duration.duration) & PTS_33BIT_MASK) as u64);
            out.extend_from_slice(&bits.into_bytes());
        }

        let mut tail = SpliceInsertTailBits::new();
        tail.set_unique_program_id(self.unique_program_id);
        tail.set_avail_num(self.avail_num);
        tail.set_avails_expected(self.avails_expected);
        out.extend_from_slice(&tail.into_bytes());
        out
    }
}

fn parse_splice_time(reader: &mut SliceReader) -> Result<Option<i64>> {
    let flag_byte = reader.peek_array_ref::<1>()?[0];
    if flag_byte & 0x80 != 0 {
        let bits = SpliceTimeBits::from_bytes(reader.read_array_ref::<5>()?);
        Ok(Some(clock::ts90khz_to_ns(bits.pts_time() as u64)))
    } else {
        reader.read_array_ref::<1>()?;
        Ok(None)
    }
}

fn encode_splice_time(pts_ns: Option<i64>) -> [u8; 5] {
    match pts_ns {
        Some(ns) => {
            let mut bits = SpliceTimeBits::new();
            bits.set_time_specified_flag(true);
            bits.set_reserved(0x3F);
            bits.set_pts_time(clock::ns_to_ts90khz(ns) & PTS_33BIT_MASK);
            bits.into_bytes()
        }
        None => [0x7F, 0, 0, 0, 0],
    }
}

/// The decoded `splice_command()`, tagged by `splice_command_type` (spec §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpliceCommand {
    /// `splice_null()`: no fields, used as a heartbeat/keepalive.
    SpliceNull,
    SpliceInsert(SpliceInsert),
    /// `splice_schedule`, `time_signal`, `bandwidth_reservation`, or
    /// `private_command` — a recognised command type this crate doesn't
    /// model structurally. The body is discarded; the type is retained
    /// (spec §4.5).
    Known(u8),
    /// Ciphertext command body under `encrypted_packet`, kept byte-for-byte
    /// since this crate has no key material to decode it.
    Encrypted { splice_command_type: u8, data: Vec<u8> },
}

/// Decoded `splice_info_section` (spec §3 `Scte35`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scte35 {
    /// Adjustment to apply to embedded PTS values, in nanoseconds.
    pub pts_adjustment: i64,
    pub tier: u16,
    pub encryption: Option<EncryptionInfo>,
    pub command: SpliceCommand,
}

impl Scte35 {
    /// Decode a `splice_info_section` table body, spanning from
    /// `protocol_version` through the end of the splice command (the
    /// descriptor loop and any alignment stuffing are not modelled and are
    /// dropped; spec §4.5).
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(body);
        let header = Scte35HeaderBits::from_bytes(reader.read_array_ref::<11>()?);

        let encryption = if header.encrypted_packet() {
            Some(EncryptionInfo {
                encryption_algorithm: header.encryption_algorithm(),
                cw_index: header.cw_index(),
            })
        } else {
            None
        };

        let command_len = header.splice_command_length() as usize;
        let command_type = header.splice_command_type();
        let command_bytes = reader.read(command_len)?;

        let command = if encryption.is_some() {
            SpliceCommand::Encrypted {
                splice_command_type: command_type,
                data: command_bytes.to_vec(),
            }
        } else {
            match command_type {
                SPLICE_NULL => SpliceCommand::SpliceNull,
                SPLICE_INSERT => SpliceCommand::SpliceInsert(SpliceInsert::decode(command_bytes)?),
                SPLICE_SCHEDULE | TIME_SIGNAL | BANDWIDTH_RESERVATION | PRIVATE_COMMAND => {
                    SpliceCommand::Known(command_type)
                }
                other => {
                    return Err(Error::new(
                        ErrorKind::UnknownSpliceType,
                        format!("unknown splice_command_type {:#04x}", other),
                    ))
                }
            }
        };

        Ok(Scte35 {
            pts_adjustment: clock::ts90khz_to_ns(header.pts_adjustment() as u64),
            tier: header.tier(),
            encryption,
            command,
        })
    }

    /// Encode back to a `splice_info_section` table body, with an empty
    /// descriptor loop (spec §4.5).
    pub fn encode(&self) -> Vec<u8> {
        let (command_type, command_bytes) = match &self.command {
            SpliceCommand::SpliceNull => (SPLICE_NULL, Vec::new()),
            SpliceCommand::SpliceInsert(insert) => (SPLICE_INSERT, insert.encode()),
            SpliceCommand::Known(splice_command_type) => (*splice_command_type, Vec::new()),
            SpliceCommand::Encrypted { splice_command_type, data } => (*splice_command_type, data.clone()),
        };

        let mut header = Scte35HeaderBits::new();
        header.set_protocol_version(0);
        header.set_encrypted_packet(self.encryption.is_some());
        header.set_encryption_algorithm(self.encryption.map(|e| e.encryption_algorithm).unwrap_or(0));
        header.set_pts_adjustment(clock::ns_to_ts90khz(self.pts_adjustment) & PTS_33BIT_MASK);
        header.set_cw_index(self.encryption.map(|e| e.cw_index).unwrap_or(0xFF));
        header.set_tier(self.tier);
        header.set_splice_command_length(command_bytes.len() as u16);
        header.set_splice_command_type(command_type);

        let mut out = header.into_bytes().to_vec();
        out.extend_from_slice(&command_bytes);
        out.extend_from_slice(&[0, 0]); // splice_descriptor_loop_length = 0
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_immediate_splice_insert() {
        let scte35 = Scte35 {
            pts_adjustment: 0,
            tier: 0xFFF,
            encryption: None,
            command: SpliceCommand::SpliceInsert(SpliceInsert {
                splice_event_id: 42,
                splice_event_cancel_indicator: false,
                out_of_network_indicator: true,
                splice_immediate_flag: true,
                splice_time_pts: None,
                break_duration: Some(SpliceBreakDuration { auto_return: true, duration: 30_000_000_000 }),
                unique_program_id: 7,
                avail_num: 0,
                avails_expected: 0,
            }),
        };
        let body = scte35.encode();
        let decoded = Scte35::decode(&body).unwrap();
        assert_eq!(decoded, scte35);
    }

    #[test]
    fn round_trips_scheduled_splice_insert_with_pts() {
        let scte35 = Scte35 {
            pts_adjustment: 0,
            tier: 0,
            encryption: None,
            command: SpliceCommand::SpliceInsert(SpliceInsert {
                splice_event_id: 1,
                splice_event_cancel_indicator: false,
                out_of_network_indicator: false,
                splice_immediate_flag: false,
                splice_time_pts: Some(900_000_000),
                break_duration: None,
                unique_program_id: 1,
                avail_num: 1,
                avails_expected: 1,
            }),
        };
        let body = scte35.encode();
        let decoded = Scte35::decode(&body).unwrap();
        if let SpliceCommand::SpliceInsert(insert) = decoded.command {
            assert!((insert.splice_time_pts.unwrap() - 900_000_000).abs() <= 1);
        } else {
            panic!("expected SpliceInsert");
        }
    }

    #[test]
    fn cancel_indicator_short_circuits_remaining_fields() {
        let scte35 = Scte35 {
            pts_adjustment: 0,
            tier: 0,
            encryption: None,
            command: SpliceCommand::SpliceInsert(SpliceInsert {
                splice_event_id: 99,
                splice_event_cancel_indicator: true,
                out_of_network_indicator: false,
                splice_immediate_flag: false,
                splice_time_pts: None,
                break_duration: None,
                unique_program_id: 0,
                avail_num: 0,
                avails_expected: 0,
            }),
        };
        let body = scte35.encode();
        let decoded = Scte35::decode(&body).unwrap();
        assert_eq!(decoded, scte35);
    }

    #[test]
    fn splice_null_round_trips_as_empty_command() {
        let scte35 = Scte35 {
            pts_adjustment: 0,
            tier: 0,
            encryption: None,
            command: SpliceCommand::SpliceNull,
        };
        let body = scte35.encode();
        let decoded = Scte35::decode(&body).unwrap();
        assert_eq!(decoded, scte35);
    }

    #[test]
    fn known_unmodelled_command_retains_type_and_drops_body() {
        let scte35 = Scte35 {
            pts_adjustment: 0,
            tier: 0,
            encryption: None,
            command: SpliceCommand::Known(TIME_SIGNAL),
        };
        let body = scte35.encode();
        let decoded = Scte35::decode(&body).unwrap();
        assert_eq!(decoded, scte35);
    }

    #[test]
    fn unknown_command_type_fails_decode() {
        // `encode` never refuses a type; only `decode`'s dispatch does, so a
        // reserved splice_command_type (e.g. 0x08) round-trips out but not
        // back in.
        let scte35 = Scte35 {
            pts_adjustment: 0,
            tier: 0,
            encryption: None,
            command: SpliceCommand::Known(0x08),
        };
        let body = scte35.encode();
        let err = Scte35::decode(&body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownSpliceType);
    }

    #[test]
    fn encrypted_packet_keeps_command_raw() {
        let scte35 = Scte35 {
            pts_adjustment: 0,
            tier: 0,
            encryption: Some(EncryptionInfo { encryption_algorithm: 1, cw_index: 3 }),
            command: SpliceCommand::Encrypted { splice_command_type: SPLICE_INSERT, data: vec![0xAA; 14] },
        };
        let body = scte35.encode();
        let decoded = Scte35::decode(&body).unwrap();
        assert_eq!(decoded, scte35);
    }
}
