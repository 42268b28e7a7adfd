//! C2: PSI section framing — header, CRC-32/MPEG-2, table dispatch (spec §4.2, §6).

use crate::pat::Pat;
use crate::pmt::Pmt;
use crate::scte35::Scte35;
use crate::{Error, ErrorKind, Result, SliceReader};
use crc::{Crc, CRC_32_MPEG_2};
use modular_bitfield_msb::prelude::*;

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// `section_length` is a 12-bit field; this is its maximum legal value
/// (spec §3: `section_length ∈ 0..4093`).
const MAX_SECTION_LENGTH: u16 = 4093;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PsiHeaderBits {
    table_id: B8,
    section_syntax_indicator: bool,
    private_bit: bool,
    reserved: B2,
    section_length: B12,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PsiTableSyntaxBits {
    table_id_extension: B16,
    reserved: B2,
    version: B5,
    current_next_indicator: bool,
    section_number: B8,
    last_section_number: B8,
}

/// Table identity derived from `table_id` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    /// Program Association Table.
    Pat,
    /// Program Map Table.
    Pmt,
    /// SCTE-35 `splice_info_section`.
    Scte35,
    /// A recognised-but-undecoded or unknown table_id.
    Opaque(u8),
}

impl TableType {
    fn from_table_id(table_id: u8) -> Self {
        match table_id {
            0x00 => TableType::Pat,
            0x02 => TableType::Pmt,
            0xFC => TableType::Scte35,
            other => TableType::Opaque(other),
        }
    }

    fn table_id(&self) -> u8 {
        match self {
            TableType::Pat => 0x00,
            TableType::Pmt => 0x02,
            TableType::Scte35 => 0xFC,
            TableType::Opaque(id) => *id,
        }
    }
}

/// PSI section header, flattening the wire's fixed header and optional
/// long-form syntax (spec §3 `Psi`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiHeader {
    /// Raw `table_id` byte.
    pub table_id: u8,
    /// Whether the long-form table syntax (version/section numbers) follows.
    pub section_syntax_indicator: bool,
    /// Private section bit; meaning is table-specific.
    pub private_bit: bool,
    /// `transport_stream_id` (PAT) / `program_number` (PMT) / similar.
    pub table_id_extension: Option<u16>,
    /// 5-bit version number.
    pub version: Option<u8>,
    /// Whether this section is currently applicable.
    pub current_next_indicator: Option<bool>,
    pub section_number: Option<u8>,
    pub last_section_number: Option<u8>,
}

/// Decoded table body, tagged by [`TableType`] (spec §9 "tagged variant").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsiTable {
    Pat(Pat),
    Pmt(Pmt),
    Scte35(Scte35),
    /// Raw table body, either an unrecognised table_id or one whose
    /// table-specific decoder failed (spec §4.2).
    Opaque(Vec<u8>),
}

/// One decoded PSI section: header plus table body (spec §3, §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psi {
    pub header: PsiHeader,
    pub table: PsiTable,
    /// Whether the trailing CRC-32/MPEG-2 matched on decode. Ingest-side CRC
    /// validation is an explicit non-goal (spec §1) — a mismatch is surfaced
    /// here and logged, not treated as a decode failure.
    pub crc_valid: bool,
}

impl Psi {
    /// Decode one PSI section starting at the `pointer_field` byte of a
    /// PUSI-marked TS payload (spec §4.2).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(data);
        let pointer_field = reader.read_u8()?;
        reader.skip(pointer_field as usize)?;

        let header_bytes = reader.read_array_ref::<3>()?;
        let header_bits = PsiHeaderBits::from_bytes(header_bytes);
        let section_length = header_bits.section_length();
        if section_length > MAX_SECTION_LENGTH {
            return Err(Error::new(
                ErrorKind::InvalidHeader,
                format!("section_length {} exceeds {}", section_length, MAX_SECTION_LENGTH),
            ));
        }

        let mut section = reader.new_sub_reader(section_length as usize)?;
        if section.remaining_len() < 4 {
            return Err(Error::new(
                ErrorKind::InvalidHeader,
                "section shorter than its own CRC",
            ));
        }
        let body_and_crc = section.read_to_end()?;
        let (body, crc_bytes) = body_and_crc.split_at(body_and_crc.len() - 4);
        let expected_crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut digest = CRC.digest();
        digest.update(&header_bytes);
        digest.update(body);
        let actual_crc = digest.finalize();
        // Ingest-side CRC validation is an explicit non-goal: the mismatch is
        // surfaced to the caller rather than rejecting the section outright.
        let crc_valid = actual_crc == expected_crc;
        if !crc_valid {
            log::warn!(
                "PSI section CRC mismatch: expected {:#010x}, computed {:#010x}",
                expected_crc,
                actual_crc
            );
        }

        let mut body_reader = SliceReader::new(body);
        let table_syntax = if header_bits.section_syntax_indicator() {
            Some(PsiTableSyntaxBits::from_bytes(body_reader.read_array_ref::<5>()?))
        } else {
            None
        };
        let table_body = body_reader.read_to_end()?;

        let header = PsiHeader {
            table_id: header_bits.table_id(),
            section_syntax_indicator: header_bits.section_syntax_indicator(),
            private_bit: header_bits.private_bit(),
            table_id_extension: table_syntax.map(|s| s.table_id_extension()),
            version: table_syntax.map(|s| s.version()),
            current_next_indicator: table_syntax.map(|s| s.current_next_indicator()),
            section_number: table_syntax.map(|s| s.section_number()),
            last_section_number: table_syntax.map(|s| s.last_section_number()),
        };

        let table_type = TableType::from_table_id(header.table_id);
        // A table-specific decoder failure is not fatal to the section as a
        // whole: the CRC already proved the bytes are what the encoder sent,
        // so fall back to carrying them raw rather than discarding the section.
        let table = match table_type {
            TableType::Pat => Pat::decode(table_body)
                .map(PsiTable::Pat)
                .unwrap_or_else(|_| PsiTable::Opaque(table_body.to_vec())),
            TableType::Pmt => Pmt::decode(table_body)
                .map(PsiTable::Pmt)
                .unwrap_or_else(|_| PsiTable::Opaque(table_body.to_vec())),
            TableType::Scte35 => Scte35::decode(table_body)
                .map(PsiTable::Scte35)
                .unwrap_or_else(|_| PsiTable::Opaque(table_body.to_vec())),
            TableType::Opaque(_) => PsiTable::Opaque(table_body.to_vec()),
        };

        Ok(Psi { header, table, crc_valid })
    }

    /// Encode this section back to bytes, including the leading
    /// `pointer_field` byte and trailing CRC (spec §4.2).
    pub fn encode(&self) -> Vec<u8> {
        let table_id = match &self.table {
            PsiTable::Pat(_) => TableType::Pat.table_id(),
            PsiTable::Pmt(_) => TableType::Pmt.table_id(),
            PsiTable::Scte35(_) => TableType::Scte35.table_id(),
            PsiTable::Opaque(_) => self.header.table_id,
        };

        let mut body = Vec::new();
        if let (Some(table_id_extension), Some(version), Some(current_next_indicator), Some(section_number), Some(last_section_number)) = (
            self.header.table_id_extension,
            self.header.version,
            self.header.current_next_indicator,
            self.header.section_number,
            self.header.last_section_number,
        ) {
            let mut syntax = PsiTableSyntaxBits::new();
            syntax.set_table_id_extension(table_id_extension);
            syntax.set_reserved(0b11);
            syntax.set_version(version);
            syntax.set_current_next_indicator(current_next_indicator);
            syntax.set_section_number(section_number);
            syntax.set_last_section_number(last_section_number);
            body.extend_from_slice(&syntax.into_bytes());
        }
        match &self.table {
            PsiTable::Pat(pat) => body.extend_from_slice(&pat.encode()),
            PsiTable::Pmt(pmt) => body.extend_from_slice(&pmt.encode()),
            PsiTable::Scte35(scte) => body.extend_from_slice(&scte.encode()),
            PsiTable::Opaque(raw) => body.extend_from_slice(raw),
        }

        let section_length = (body.len() + 4) as u16;
        let mut header_bits = PsiHeaderBits::new();
        header_bits.set_table_id(table_id);
        header_bits.set_section_syntax_indicator(self.header.section_syntax_indicator);
        header_bits.set_private_bit(self.header.private_bit);
        header_bits.set_reserved(0b11);
        header_bits.set_section_length(section_length);
        let header_bytes = header_bits.into_bytes();

        let mut digest = CRC.digest();
        digest.update(&header_bytes);
        digest.update(&body);
        let crc = digest.finalize();

        let mut out = Vec::with_capacity(4 + body.len() + 4);
        out.push(0); // no stuffing bytes before this section
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pat::PatEntry;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_a_pat_section() {
        let psi = Psi {
            header: PsiHeader {
                table_id: 0x00,
                section_syntax_indicator: true,
                private_bit: false,
                table_id_extension: Some(1),
                version: Some(0),
                current_next_indicator: Some(true),
                section_number: Some(0),
                last_section_number: Some(0),
            },
            table: PsiTable::Pat(Pat {
                entries: vec![PatEntry { program_number: 1, pmt_pid: 0x100 }],
            }),
            crc_valid: true,
        };
        let bytes = psi.encode();
        let decoded = Psi::decode(&bytes).unwrap();
        assert_eq!(decoded, psi);
    }

    #[test]
    fn rejects_oversized_section_length() {
        let mut data = vec![0u8; 8];
        data[1] = 0x0F;
        data[2] = 0xFF; // section_length = 0xFFF, far above the 4093 cap
        let err = Psi::decode(&data).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidHeader);
    }

    #[test]
    fn crc_mismatch_is_advisory_not_fatal() {
        let psi = Psi {
            header: PsiHeader {
                table_id: 0x00,
                section_syntax_indicator: true,
                private_bit: false,
                table_id_extension: Some(1),
                version: Some(0),
                current_next_indicator: Some(true),
                section_number: Some(0),
                last_section_number: Some(0),
            },
            table: PsiTable::Pat(Pat { entries: vec![] }),
            crc_valid: true,
        };
        let mut bytes = psi.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let decoded = Psi::decode(&bytes).unwrap();
        assert!(!decoded.crc_valid);
        assert_eq!(decoded.table, psi.table);
    }

    #[test]
    fn unknown_table_id_is_opaque() {
        let psi = Psi {
            header: PsiHeader {
                table_id: 0x4E,
                section_syntax_indicator: false,
                private_bit: true,
                table_id_extension: None,
                version: None,
                current_next_indicator: None,
                section_number: None,
                last_section_number: None,
            },
            table: PsiTable::Opaque(vec![1, 2, 3]),
            crc_valid: true,
        };
        let bytes = psi.encode();
        let decoded = Psi::decode(&bytes).unwrap();
        assert_eq!(decoded.table, PsiTable::Opaque(vec![1, 2, 3]));
    }
}
