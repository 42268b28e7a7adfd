//! C8: per-PID stream aggregator (spec §4.8).
//!
//! Reassembles consecutive TS packets on one PID into whole PES packets.
//! The aggregator holds parsed [`PartialPes`] fragments rather than raw
//! bytes, so the leader fragment's header fields (`stream_id`, `pts`, `dts`,
//! `data_alignment_indicator`, declared length) are known without
//! re-parsing at finalisation (spec §9 "Back-references").

use crate::pes::{Pes, PartialPes};
use crate::{Error, ErrorKind, Result};

/// Reassembly state for one PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No unit has started; waiting for a `payload_unit_start_indicator`
    /// packet that also carries the random access indicator, so assembly
    /// never begins mid-GOP. Only the initial state when `wait_rai` is set.
    WaitingRai,
    /// Collecting continuation packets for the unit currently queued.
    Accumulating,
    /// A unit was just finalised and handed off; nothing queued.
    IdleEmpty,
}

/// What happened as a result of one [`StreamAggregator::push`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorOutput {
    /// No unit is ready yet.
    Pending,
    /// The *previous* unit finalised, because a new one just started (or
    /// because the caller asked to finalise one early). `Err` carries a
    /// finalisation failure (spec §4.8 `multi_stream_id` / `size_mismatch`).
    Ready(Result<Pes>),
}

/// Result of pushing one TS packet's payload into the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    pub output: AggregatorOutput,
    /// Whether a continuity counter gap (dropped TS packets) was observed.
    pub discontinuity: bool,
}

/// Per-PID stream aggregator (spec §3 "Aggregator", §4.8).
#[derive(Debug, Clone)]
pub struct StreamAggregator {
    state: State,
    wait_rai: bool,
    leader: Option<PartialPes>,
    buffer: Vec<u8>,
    /// Set when a later fragment's own parsed header disagrees with the
    /// leader's `stream_id` (spec §4.8 finalisation guard).
    conflicting_stream_id: bool,
    last_continuity_counter: Option<u8>,
}

impl StreamAggregator {
    /// A fresh aggregator, not yet seeded by any TS packet.
    ///
    /// `wait_rai` selects the initial state: when true (the usual case for
    /// video, where assembly should never begin mid-GOP) the aggregator
    /// starts in `waiting_rai`; when false it starts `accumulating` and
    /// takes whatever pusi-marked unit arrives first (spec §3 `wait_rai?`).
    pub fn new(wait_rai: bool) -> Self {
        Self {
            state: if wait_rai { State::WaitingRai } else { State::Accumulating },
            wait_rai,
            leader: None,
            buffer: Vec::new(),
            conflicting_stream_id: false,
            last_continuity_counter: None,
        }
    }

    /// Feed one TS packet's payload bytes (spec §4.8).
    ///
    /// `random_access` should reflect the adaptation field's
    /// `random_access_indicator` on the packet that set `pusi`; it is
    /// ignored on continuation packets.
    pub fn push(&mut self, pusi: bool, random_access: bool, continuity_counter: u8, data: &[u8]) -> PushResult {
        let mut discontinuity = false;
        if let Some(last) = self.last_continuity_counter {
            if continuity_counter == last {
                // A repeated packet (legal, used to pad bitrate) carries no
                // new payload and must not be appended twice.
                return PushResult { output: AggregatorOutput::Pending, discontinuity: false };
            }
            if continuity_counter != (last + 1) & 0x0F {
                discontinuity = true;
            }
        }
        self.last_continuity_counter = Some(continuity_counter);

        if pusi {
            if self.state == State::WaitingRai && !random_access {
                return PushResult { output: AggregatorOutput::Pending, discontinuity };
            }
            let flushed = self.take_unit();
            self.start_unit(data);
            return PushResult {
                output: flushed.map(AggregatorOutput::Ready).unwrap_or(AggregatorOutput::Pending),
                discontinuity,
            };
        }

        if discontinuity {
            // Packets were lost mid-unit; the partial bytes can't be trusted.
            self.reset();
            return PushResult { output: AggregatorOutput::Pending, discontinuity };
        }

        if self.state == State::Accumulating {
            self.append_fragment(data);
        }
        // Continuation data arriving in WaitingRai/IdleEmpty has no unit to
        // attach to and is dropped.
        PushResult { output: AggregatorOutput::Pending, discontinuity }
    }

    fn start_unit(&mut self, data: &[u8]) {
        match PartialPes::from_incomplete(data) {
            Some(leader) => {
                self.buffer.clear();
                self.buffer.extend_from_slice(&leader.payload_so_far);
                self.leader = Some(leader);
                self.conflicting_stream_id = false;
                self.state = State::Accumulating;
            }
            None => {
                // No parseable PES header on a pusi packet; nothing to
                // reassemble into.
                self.reset();
            }
        }
    }

    fn append_fragment(&mut self, data: &[u8]) {
        if let Some(leader) = &self.leader {
            // A nil fragment (no PES start code of its own) inherits the
            // leader's stream_id; one that parses with a different
            // stream_id trips the finalisation guard (spec §4.8).
            if let Some(fragment) = PartialPes::from_incomplete(data) {
                if fragment.stream_id != leader.stream_id {
                    self.conflicting_stream_id = true;
                }
            }
        }
        self.buffer.extend_from_slice(data);
    }

    fn take_unit(&mut self) -> Option<Result<Pes>> {
        let leader = self.leader.take()?;
        let buffer = std::mem::take(&mut self.buffer);
        let conflicting_stream_id = std::mem::take(&mut self.conflicting_stream_id);
        self.state = State::IdleEmpty;
        Some(Self::finalize_unit(leader, buffer, conflicting_stream_id))
    }

    fn finalize_unit(leader: PartialPes, mut payload: Vec<u8>, conflicting_stream_id: bool) -> Result<Pes> {
        if conflicting_stream_id {
            return Err(Error::new(
                ErrorKind::MultiStreamId,
                "PES fragments carried conflicting stream_id values",
            ));
        }
        if let Some(expected) = leader.declared_length {
            if payload.len() > expected {
                payload.truncate(expected);
            } else if payload.len() < expected {
                return Err(Error::new(
                    ErrorKind::SizeMismatch,
                    format!("PES payload was {} bytes, pes_packet_length declared {}", payload.len(), expected),
                ));
            }
        }
        Ok(Pes {
            stream_id: leader.stream_id,
            pts: leader.pts,
            dts: leader.dts,
            data_alignment_indicator: leader.data_alignment_indicator,
            payload,
        })
    }

    fn reset(&mut self) {
        self.leader = None;
        self.buffer.clear();
        self.conflicting_stream_id = false;
        self.state = if self.wait_rai { State::WaitingRai } else { State::Accumulating };
    }

    /// Drain whatever has been collected so far, e.g. at end of stream or
    /// when the caller is dropping this PID (spec §4.8 finalisation).
    pub fn finalize(&mut self) -> Option<Result<Pes>> {
        self.take_unit()
    }

    /// Whether this aggregator is mid-unit.
    pub fn is_accumulating(&self) -> bool {
        self.state == State::Accumulating
    }
}
