//! C3: Program Association Table codec (spec §4.3).

use crate::{Error, ErrorKind, Result, SliceReader};
use modular_bitfield_msb::prelude::*;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PatEntryBits {
    program_number: B16,
    reserved: B3,
    pmt_pid: B13,
}

/// One `program_number → pmt_pid` mapping (spec §3).
///
/// `program_number == 0` conventionally names the network PID rather than a
/// program; this crate surfaces it as an ordinary entry and leaves any
/// special handling to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Decoded Program Association Table (spec §3 `Pat`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub entries: Vec<PatEntry>,
}

impl Pat {
    /// Decode a PAT table body (the bytes after the PSI header/table syntax,
    /// before the CRC). Each entry is exactly 4 bytes (spec §4.3).
    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() % 4 != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("PAT body length {} is not a multiple of 4", body.len()),
            ));
        }
        let mut reader = SliceReader::new(body);
        let mut entries = Vec::with_capacity(body.len() / 4);
        while reader.remaining_len() > 0 {
            let bits = PatEntryBits::from_bytes(reader.read_array_ref::<4>()?);
            entries.push(PatEntry {
                program_number: bits.program_number(),
                pmt_pid: bits.pmt_pid(),
            });
        }
        Ok(Pat { entries })
    }

    /// Encode back to the 4-bytes-per-entry table body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 4);
        for entry in &self.entries {
            let mut bits = PatEntryBits::new();
            bits.set_program_number(entry.program_number);
            bits.set_reserved(0b111);
            bits.set_pmt_pid(entry.pmt_pid);
            out.extend_from_slice(&bits.into_bytes());
        }
        out
    }
}
