//! C10: stream multiplexer (spec §4.10).

use std::collections::HashMap;

use crate::pat::{Pat, PatEntry};
use crate::pes::Pes;
use crate::pmt::{Descriptor, ElementaryStreamInfo, Pmt, StreamCategory};
use crate::psi::{Psi, PsiHeader, PsiTable};
use crate::ts_packet::{classify_pid, Scrambling, TsPacket};
use crate::{Error, ErrorKind, Result};
use smallvec::SmallVec;

struct StreamEntry {
    pid: u16,
    stream_type: u8,
    category: StreamCategory,
    stream_id: u8,
    descriptors: Vec<Descriptor>,
}

/// Parameters for [`Muxer::add_elementary_stream`].
#[derive(Debug, Clone, Default)]
pub struct ElementaryStreamOptions {
    /// Explicit PID; when `None`, allocated as `0x100 + len(streams)`.
    pub pid: Option<u16>,
    /// Whether this stream's PID should become the program's PCR carrier.
    /// The first registered stream is used as a fallback when nothing has
    /// claimed it explicitly.
    pub is_pcr_carrier: bool,
    pub descriptors: Vec<Descriptor>,
}

/// Parameters for [`Muxer::mux_sample`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleOptions {
    pub dts: Option<i64>,
    pub data_alignment_indicator: bool,
}

/// Value-type encoder counterpart to [`crate::Demuxer`] (spec §3 `Muxer`).
///
/// Builds one program's worth of PAT/PMT/PES traffic. Callers drive the
/// cadence of PAT/PMT repetition and PCR insertion themselves by calling
/// [`Muxer::mux_pat`]/[`Muxer::mux_pmt`]/[`Muxer::mux_pcr`] as often as their
/// target bitrate and PCR interval require.
pub struct Muxer {
    program_number: u16,
    transport_stream_id: u16,
    pmt_pid: u16,
    pcr_pid: Option<u16>,
    streams: Vec<StreamEntry>,
    pat_version: u8,
    pmt_version: u8,
    continuity_counters: HashMap<u16, u8>,
}

impl Muxer {
    /// A muxer for a single program. The PCR PID defaults to the first
    /// elementary stream registered via [`Muxer::add_elementary_stream`].
    pub fn new(program_number: u16, transport_stream_id: u16, pmt_pid: u16) -> Self {
        Self {
            program_number,
            transport_stream_id,
            pmt_pid,
            pcr_pid: None,
            streams: Vec::new(),
            pat_version: 0,
            pmt_version: 0,
            continuity_counters: HashMap::new(),
        }
    }

    /// Register one elementary stream under this program's PMT and return
    /// the PID it was assigned (spec §4.10). PIDs not given explicitly are
    /// auto-allocated as `0x100 + len(streams)`; `stream_id` is derived from
    /// the stream's [`StreamCategory`] (video → `0xE0+idx`, audio →
    /// `0xC0+idx`, ipmp/metadata → `0xF0+idx`, everything else → `0xBD`).
    pub fn add_elementary_stream(&mut self, stream_type: u8, options: ElementaryStreamOptions) -> Result<u16> {
        let pid = options.pid.unwrap_or(0x100 + self.streams.len() as u16);
        if pid == 0x0000 || pid == self.pmt_pid || pid == 0x1FFF {
            return Err(Error::with_pid(ErrorKind::InvalidData, pid, "PID reserved for PAT/PMT/null"));
        }
        if self.streams.iter().any(|s| s.pid == pid) {
            return Err(Error::with_pid(ErrorKind::InvalidData, pid, "PID already registered"));
        }

        let category = StreamCategory::classify(stream_type, &options.descriptors);
        let same_category_count = self.streams.iter().filter(|s| s.category == category).count() as u8;
        let stream_id = match category {
            StreamCategory::Video => 0xE0 + same_category_count,
            StreamCategory::Audio => 0xC0 + same_category_count,
            StreamCategory::Metadata | StreamCategory::Ipmp => 0xF0 + same_category_count,
            StreamCategory::Subtitle
            | StreamCategory::Cues
            | StreamCategory::Data
            | StreamCategory::Private(_)
            | StreamCategory::Other(_) => 0xBD,
        };

        if options.is_pcr_carrier || self.pcr_pid.is_none() {
            self.pcr_pid = Some(pid);
        }
        self.streams.push(StreamEntry { pid, stream_type, category, stream_id, descriptors: options.descriptors });
        self.pmt_version = self.pmt_version.wrapping_add(1);
        Ok(pid)
    }

    fn next_continuity_counter(&mut self, pid: u16) -> u8 {
        let counter = self.continuity_counters.entry(pid).or_insert(0x0F);
        *counter = counter.wrapping_add(1) & 0x0F;
        *counter
    }

    fn chunk_into_packets(&mut self, pid: u16, data: &[u8], pcr_ns: Option<i64>) -> Vec<TsPacket> {
        let mut packets = Vec::new();
        let mut offset = 0;
        loop {
            // The first packet leaves room for a minimal adaptation field
            // carrying the PCR, when one will be attached (spec §4.10).
            let max_payload = if offset == 0 && pcr_ns.is_some() { 176 } else { 184 };
            let take = (data.len() - offset).min(max_payload);
            let mut payload = SmallVec::<[u8; 184]>::new();
            payload.extend_from_slice(&data[offset..offset + take]);
            packets.push(TsPacket {
                pid,
                pid_class: classify_pid(pid),
                pusi: offset == 0,
                continuity_counter: self.next_continuity_counter(pid),
                scrambling: Scrambling::None,
                discontinuity_indicator: false,
                random_access_indicator: false,
                pcr: if offset == 0 { pcr_ns } else { None },
                adaptation: None,
                payload,
            });
            offset += take;
            if offset >= data.len() {
                break;
            }
        }
        packets
    }

    fn long_form_psi(table: PsiTable, table_id_extension: u16, version: u8) -> Psi {
        let table_id = match &table {
            PsiTable::Pat(_) => 0x00,
            PsiTable::Pmt(_) => 0x02,
            PsiTable::Scte35(_) => 0xFC,
            PsiTable::Opaque(_) => 0xFF,
        };
        let long_form = matches!(table, PsiTable::Pat(_) | PsiTable::Pmt(_));
        Psi {
            header: PsiHeader {
                table_id,
                section_syntax_indicator: long_form,
                private_bit: false,
                table_id_extension: long_form.then_some(table_id_extension),
                version: long_form.then_some(version),
                current_next_indicator: long_form.then_some(true),
                section_number: long_form.then_some(0),
                last_section_number: long_form.then_some(0),
            },
            table,
            crc_valid: true,
        }
    }

    /// Build this program's PAT (a single-entry PAT naming this program's
    /// PMT PID; spec §4.10).
    pub fn mux_pat(&mut self) -> Vec<TsPacket> {
        let pat = Pat {
            entries: vec![PatEntry { program_number: self.program_number, pmt_pid: self.pmt_pid }],
        };
        let psi = Self::long_form_psi(PsiTable::Pat(pat), self.transport_stream_id, self.pat_version);
        self.chunk_into_packets(0x0000, &psi.encode(), None)
    }

    /// Build this program's PMT.
    pub fn mux_pmt(&mut self) -> Vec<TsPacket> {
        let pmt = Pmt {
            pcr_pid: self.pcr_pid.unwrap_or(0x1FFF),
            program_descriptors: Vec::new(),
            streams: self
                .streams
                .iter()
                .map(|s| ElementaryStreamInfo {
                    stream_type: s.stream_type,
                    category: s.category,
                    elementary_pid: s.pid,
                    descriptors: SmallVec::from_slice(&s.descriptors),
                })
                .collect(),
        };
        let psi = Self::long_form_psi(PsiTable::Pmt(pmt), self.program_number, self.pmt_version);
        let pmt_pid = self.pmt_pid;
        self.chunk_into_packets(pmt_pid, &psi.encode(), None)
    }

    /// Build an arbitrary PSI section on `pid` (e.g. an SCTE-35 splice
    /// cue). `table_id_extension`/`version` are only meaningful for
    /// long-form tables (PAT/PMT); SCTE-35 ignores them.
    pub fn mux_psi(&mut self, pid: u16, table: PsiTable, table_id_extension: u16, version: u8) -> Vec<TsPacket> {
        let psi = Self::long_form_psi(table, table_id_extension, version);
        self.chunk_into_packets(pid, &psi.encode(), None)
    }

    /// Build a zero-payload packet carrying only a PCR (spec §4.10). Fails
    /// when `pid` isn't this program's PCR carrier.
    pub fn mux_pcr(&mut self, pid: u16, pcr_ns: i64) -> Result<TsPacket> {
        if self.pcr_pid != Some(pid) {
            return Err(Error::with_pid(ErrorKind::InvalidData, pid, "PID is not this program's PCR carrier"));
        }
        Ok(TsPacket {
            pid,
            pid_class: classify_pid(pid),
            pusi: false,
            continuity_counter: self.next_continuity_counter(pid),
            scrambling: Scrambling::None,
            discontinuity_indicator: false,
            random_access_indicator: false,
            pcr: Some(pcr_ns),
            adaptation: None,
            payload: SmallVec::new(),
        })
    }

    /// Chunk one elementary sample into a PES-framed TS packet run on a
    /// registered PID. The `stream_id` is derived from the PID's
    /// registration rather than supplied by the caller. The PCR PID's first
    /// packet carries the sample's PTS as its PCR, since this muxer has no
    /// independent system clock to derive PCR from (DESIGN.md).
    pub fn mux_sample(&mut self, pid: u16, payload: &[u8], pts: Option<i64>, options: SampleOptions) -> Result<Vec<TsPacket>> {
        let stream_id = self
            .streams
            .iter()
            .find(|s| s.pid == pid)
            .map(|s| s.stream_id)
            .ok_or_else(|| Error::with_pid(ErrorKind::InvalidData, pid, "PID is not a registered elementary stream"))?;

        let pes = Pes {
            stream_id,
            pts,
            dts: options.dts,
            data_alignment_indicator: options.data_alignment_indicator,
            payload: payload.to_vec(),
        };
        let pcr_ns = if self.pcr_pid == Some(pid) { pts } else { None };
        let mut packets = self.chunk_into_packets(pid, &pes.encode(), pcr_ns);
        if let (Some(first), true) = (packets.first_mut(), options.data_alignment_indicator) {
            first.random_access_indicator = true;
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::{Demuxer, DemuxerConfig};
    use crate::ContainerPayload;
    use pretty_assertions::assert_eq;

    fn flatten(packets: &[TsPacket]) -> Vec<u8> {
        packets.iter().flat_map(|p| p.encode().unwrap()).collect()
    }

    #[test]
    fn muxed_pat_pmt_sample_round_trips_through_the_demuxer() {
        let mut muxer = Muxer::new(1, 0x10, 0x100);
        let pid = muxer
            .add_elementary_stream(0x1B, ElementaryStreamOptions { is_pcr_carrier: true, ..Default::default() })
            .unwrap();

        let mut bytes = Vec::new();
        bytes.extend(flatten(&muxer.mux_pat()));
        bytes.extend(flatten(&muxer.mux_pmt()));
        let payload = vec![7; 300];
        let packets = muxer
            .mux_sample(pid, &payload, Some(2_000_000_000), SampleOptions { data_alignment_indicator: true, ..Default::default() })
            .unwrap();
        bytes.extend(flatten(&packets));

        let mut demuxer = Demuxer::new(DemuxerConfig::default());
        let mut containers = demuxer.push(&bytes);
        containers.extend(demuxer.flush());

        let pes_containers: Vec<_> = containers
            .iter()
            .filter(|c| matches!(c.payload, ContainerPayload::Pes(_)))
            .collect();
        assert_eq!(pes_containers.len(), 1);
        if let ContainerPayload::Pes(decoded) = &pes_containers[0].payload {
            assert_eq!(decoded.payload, payload);
        }
    }

    #[test]
    fn rejects_duplicate_pid_registration() {
        let mut muxer = Muxer::new(1, 0x10, 0x100);
        let options = ElementaryStreamOptions { pid: Some(0x101), ..Default::default() };
        muxer.add_elementary_stream(0x1B, options.clone()).unwrap();
        let err = muxer.add_elementary_stream(0x0F, options).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidData);
    }

    #[test]
    fn pid_auto_allocates_when_not_given() {
        let mut muxer = Muxer::new(1, 0x10, 0x100);
        let first = muxer.add_elementary_stream(0x1B, ElementaryStreamOptions::default()).unwrap();
        let second = muxer.add_elementary_stream(0x0F, ElementaryStreamOptions::default()).unwrap();
        assert_eq!(first, 0x100);
        assert_eq!(second, 0x101);
    }

    #[test]
    fn stream_id_increments_within_a_category() {
        let mut muxer = Muxer::new(1, 0x10, 0x100);
        let video_a = muxer.add_elementary_stream(0x1B, ElementaryStreamOptions::default()).unwrap();
        let video_b = muxer.add_elementary_stream(0x02, ElementaryStreamOptions::default()).unwrap();
        let audio_a = muxer.add_elementary_stream(0x0F, ElementaryStreamOptions::default()).unwrap();
        assert_eq!(muxer.streams.iter().find(|s| s.pid == video_a).unwrap().stream_id, 0xE0);
        assert_eq!(muxer.streams.iter().find(|s| s.pid == video_b).unwrap().stream_id, 0xE1);
        assert_eq!(muxer.streams.iter().find(|s| s.pid == audio_a).unwrap().stream_id, 0xC0);
    }

    #[test]
    fn mux_pcr_rejects_non_pcr_pid() {
        let mut muxer = Muxer::new(1, 0x10, 0x100);
        let pcr_pid = muxer
            .add_elementary_stream(0x1B, ElementaryStreamOptions { is_pcr_carrier: true, ..Default::default() })
            .unwrap();
        let other_pid = muxer.add_elementary_stream(0x0F, ElementaryStreamOptions::default()).unwrap();
        assert!(muxer.mux_pcr(pcr_pid, 0).is_ok());
        let err = muxer.mux_pcr(other_pid, 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidData);
    }

    #[test]
    fn continuity_counters_increment_per_pid() {
        let mut muxer = Muxer::new(1, 0x10, 0x100);
        let first = muxer.mux_pat();
        let second = muxer.mux_pat();
        assert_eq!(first[0].continuity_counter, 0);
        assert_eq!(second[0].continuity_counter, 1);
    }

    #[test]
    fn pmt_version_bumps_on_each_registration() {
        let mut muxer = Muxer::new(1, 0x10, 0x100);
        assert_eq!(muxer.pmt_version, 0);
        muxer.add_elementary_stream(0x1B, ElementaryStreamOptions::default()).unwrap();
        assert_eq!(muxer.pmt_version, 1);
        muxer.add_elementary_stream(0x0F, ElementaryStreamOptions::default()).unwrap();
        assert_eq!(muxer.pmt_version, 2);
    }
}
