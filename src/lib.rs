//! Bidirectional codec for MPEG-2 Transport Streams.
//!
//! This crate parses a continuous byte stream of 188-byte TS packets into
//! structured program/table/elementary-stream events (see [`Demuxer`]), and
//! emits the same structure back as a valid TS byte stream (see [`Muxer`]).
//! It is designed for broadcast/streaming ingest-egress pipelines where the
//! input can be partial, mildly corrupted, or arrive in arbitrarily sized
//! chunks, and where low-overhead streaming throughput matters more than
//! exhaustive validation.
//!
//! # Usage
//! Simply add this crate as a dependency in your `Cargo.toml`.
//!
//! ```toml
//! [dependencies]
//! mpegts-codec = "~0.1.0"
//! ```
//!
//! File I/O, CLI tooling, packaging, and codecs for specific elementary
//! stream formats (H.264, AAC, ...) are out of scope; elementary payloads
//! are carried opaquely.

#![allow(unused)]
#![deny(unsafe_code)]

use std::fmt;

pub mod clock;
mod slice_reader;
pub use slice_reader::SliceReader;

pub mod psi;
pub mod pat;
pub mod pmt;
pub mod scte35;
pub mod pes;
pub mod ts_packet;
pub mod aggregator;
pub mod demux;
pub mod mux;

pub use aggregator::StreamAggregator;
pub use demux::{Demuxer, DemuxerConfig};
pub use mux::Muxer;
pub use pat::Pat;
pub use pes::{PartialPes, Pes};
pub use pmt::{Descriptor, ElementaryStreamInfo, Pmt, StreamCategory};
pub use psi::{Psi, PsiHeader, PsiTable, TableType};
pub use scte35::{Scte35, SpliceCommand, SpliceInsert};
pub use ts_packet::{AdaptationField, PidClass, Scrambling, TsPacket};

/// Stable, observable failure surface (spec §7).
///
/// Every variant here can occur while decoding bytes produced by a
/// conforming encoder, or while encoding a value this crate built itself;
/// this is deliberately a small closed set rather than one variant per
/// `SliceReader` call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Sync byte missing or structural failure in a 188-byte frame.
    InvalidPacket,
    /// A length field is inconsistent with the bytes actually available.
    InvalidData,
    /// Tail shorter than 188 bytes; caller should reprepend it to the next chunk.
    NotEnoughData,
    /// `adaptation_field_control` reserved, or PES found to be scrambled.
    UnsupportedPacket,
    /// PSI header malformed (bad `section_length`, etc).
    InvalidHeader,
    /// A PES being finalised has fragments with conflicting `stream_id`.
    MultiStreamId,
    /// Accumulated PES payload is shorter than the declared `pes_packet_length`.
    SizeMismatch,
    /// SCTE-35 body parsing failed.
    Scte35UnmarshalError,
    /// SCTE-35 `splice_command_type` is not in the known set.
    UnknownSpliceType,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error produced by any decode or encode operation in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// What kind of failure this was.
    pub kind: ErrorKind,
    /// PID the error was encountered on, when known.
    pub pid: Option<u16>,
    /// Human-readable detail, for logs only (never matched on).
    pub message: String,
}

impl Error {
    /// Build an [`Error`] with no PID context.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            pid: None,
            message: message.into(),
        }
    }

    /// Build an [`Error`] tagged with the PID it was observed on.
    pub fn with_pid(kind: ErrorKind, pid: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            pid: Some(pid),
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "{} (pid {:#06x}): {}", self.kind, pid, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {}

/// [`std::result::Result`] alias that uses [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Structured observer for warnings raised while the [`Demuxer`] recovers
/// from a non-fatal error in lenient mode (spec §9 "Observer channel").
///
/// `log::warn!` is always emitted regardless of whether an observer is
/// attached; this trait exists purely so tests (and callers who want
/// structured telemetry) can assert which recoverable errors fired without
/// scraping log output.
pub trait Observer {
    /// Called once per recoverable error, after the corresponding
    /// `log::warn!` has already fired.
    fn warn(&mut self, error: &Error);
}

/// [`Observer`] that discards every warning. The default for a fresh [`Demuxer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn warn(&mut self, _error: &Error) {}
}

/// The demuxer's output unit: one decoded PES or PSI payload, tagged with
/// its PID and a best-effort monotonic timestamp (spec §3, §4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// PID this payload arrived on.
    pub pid: u16,
    /// Best-effort monotonic timestamp in nanoseconds, after rollover
    /// correction. `None` when no timestamp could be derived.
    pub t: Option<i64>,
    /// The decoded payload.
    pub payload: ContainerPayload,
}

/// Either of the two payload families a [`Container`] can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerPayload {
    /// A fully reassembled PES packet.
    Pes(Pes),
    /// A decoded PSI section (PAT, PMT, SCTE-35, or an opaque table).
    Psi(Psi),
}
