//! C4: Program Map Table codec (spec §4.4, §6).

use crate::{Error, ErrorKind, Result, SliceReader};
use modular_bitfield_msb::prelude::*;
use smallvec::SmallVec;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PmtHeaderBits {
    reserved: B3,
    pcr_pid: B13,
    reserved2: B4,
    program_info_length: B12,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct EsInfoHeaderBits {
    stream_type: B8,
    reserved: B3,
    elementary_pid: B13,
    reserved2: B4,
    es_info_length: B12,
}

/// One descriptor TLV (tag, length, data), reused by the PMT's program-level
/// and per-stream descriptor loops (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: SmallVec<[u8; 8]>,
}

impl Descriptor {
    fn decode(reader: &mut SliceReader) -> Result<Self> {
        let tag = reader.read_u8()?;
        let len = reader.read_u8()?;
        let mut data = SmallVec::<[u8; 8]>::new();
        data.extend_from_slice(reader.read(len as usize)?);
        Ok(Self { tag, data })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
    }

    fn encoded_len(&self) -> usize {
        2 + self.data.len()
    }
}

/// Coarse elementary stream family, derived from `stream_type` and, for the
/// DVB private-data case, the stream's own descriptors (SPEC_FULL §E; spec
/// §3, §6 stream-type table). Covers the full category set named by the
/// data model: video, audio, subtitles, cues, metadata, ipmp, data, other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCategory {
    Video,
    Audio,
    /// SCTE-35 splice cues (`stream_type` 0x86).
    Cues,
    /// DVB subtitles carried as private data (`stream_type` 0x06) tagged
    /// with descriptor 0x59.
    Subtitle,
    /// PES-carried metadata (`stream_type` 0x15).
    Metadata,
    /// IPMP stream (`stream_type` 0x1D).
    Ipmp,
    /// Private sections or other non-AV data (`stream_type` 0x05, 0x0B).
    Data,
    /// Private data (`stream_type` 0x06) without a recognised descriptor.
    Private(u8),
    /// Any other `stream_type`, carried through opaquely.
    Other(u8),
}

impl StreamCategory {
    /// Classify a stream_type using its own descriptor list (spec §6).
    pub fn classify(stream_type: u8, descriptors: &[Descriptor]) -> Self {
        const DVB_SUBTITLE_DESCRIPTOR_TAG: u8 = 0x59;
        match stream_type {
            0x01 | 0x02 | 0x1B | 0x24 | 0x33 => StreamCategory::Video,
            0x03 | 0x04 | 0x0F | 0x11 | 0x81 => StreamCategory::Audio,
            0x86 => StreamCategory::Cues,
            0x15 => StreamCategory::Metadata,
            0x1D => StreamCategory::Ipmp,
            0x05 | 0x0B => StreamCategory::Data,
            0x06 => {
                if descriptors.iter().any(|d| d.tag == DVB_SUBTITLE_DESCRIPTOR_TAG) {
                    StreamCategory::Subtitle
                } else {
                    StreamCategory::Private(stream_type)
                }
            }
            other => StreamCategory::Other(other),
        }
    }
}

/// One entry of the PMT's elementary stream loop (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub category: StreamCategory,
    pub elementary_pid: u16,
    pub descriptors: SmallVec<[Descriptor; 4]>,
}

/// Decoded Program Map Table (spec §3 `Pmt`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub streams: Vec<ElementaryStreamInfo>,
}

impl Pmt {
    /// Decode a PMT table body (spec §4.4).
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(body);
        let header = PmtHeaderBits::from_bytes(reader.read_array_ref::<4>()?);

        let mut program_descriptors = Vec::new();
        let mut program_reader = reader.new_sub_reader(header.program_info_length() as usize)?;
        while program_reader.remaining_len() > 0 {
            program_descriptors.push(Descriptor::decode(&mut program_reader)?);
        }

        let mut streams = Vec::new();
        while reader.remaining_len() > 0 {
            if reader.remaining_len() < 5 {
                return Err(Error::new(ErrorKind::InvalidData, "truncated elementary stream entry"));
            }
            let es_header = EsInfoHeaderBits::from_bytes(reader.read_array_ref::<5>()?);
            let mut es_reader = reader.new_sub_reader(es_header.es_info_length() as usize)?;
            let mut descriptors = SmallVec::<[Descriptor; 4]>::new();
            while es_reader.remaining_len() > 0 {
                descriptors.push(Descriptor::decode(&mut es_reader)?);
            }
            let stream_type = es_header.stream_type();
            streams.push(ElementaryStreamInfo {
                stream_type,
                category: StreamCategory::classify(stream_type, &descriptors),
                elementary_pid: es_header.elementary_pid(),
                descriptors,
            });
        }

        Ok(Pmt {
            pcr_pid: header.pcr_pid(),
            program_descriptors,
            streams,
        })
    }

    /// Encode back to the PMT table body.
    pub fn encode(&self) -> Vec<u8> {
        let mut program_info = Vec::new();
        for d in &self.program_descriptors {
            d.encode(&mut program_info);
        }

        let mut header = PmtHeaderBits::new();
        header.set_reserved(0b111);
        header.set_pcr_pid(self.pcr_pid);
        header.set_reserved2(0b1111);
        header.set_program_info_length(program_info.len() as u16);

        let mut out = Vec::new();
        out.extend_from_slice(&header.into_bytes());
        out.extend_from_slice(&program_info);

        for stream in &self.streams {
            let es_info_length: usize = stream.descriptors.iter().map(Descriptor::encoded_len).sum();
            let mut es_header = EsInfoHeaderBits::new();
            es_header.set_stream_type(stream.stream_type);
            es_header.set_reserved(0b111);
            es_header.set_elementary_pid(stream.elementary_pid);
            es_header.set_reserved2(0b1111);
            es_header.set_es_info_length(es_info_length as u16);
            out.extend_from_slice(&es_header.into_bytes());
            for d in &stream.descriptors {
                d.encode(&mut out);
            }
        }
        out
    }
}
