//! Clock conversions between the wire's 90kHz/27MHz clocks and the
//! nanosecond timeline used everywhere in this crate's public data model
//! (spec §4.1, Open Question 3).
//!
//! All conversions round to the nearest integer, ties to even, so that a
//! PTS/DTS value that round-trips through [`ns_to_90khz`] and
//! [`ts90khz_to_ns`] lands back on the original tick whenever that tick was
//! itself produced by rounding a nanosecond value (spec §8 invariant 2).

/// 90kHz clock tick rate used by PTS/DTS.
pub const CLOCK_90KHZ: i128 = 90_000;
/// 27MHz clock tick rate used by the PCR extension field.
pub const CLOCK_27MHZ: i128 = 27_000_000;
/// Nanoseconds per second.
pub const NS_PER_SEC: i128 = 1_000_000_000;
/// 2^33, the width of the wire's PTS/DTS/PCR-base counters.
pub const TS_33BIT_MODULUS: i128 = 1 << 33;

/// Divide `num` by `den` (`den > 0`), rounding to the nearest integer with
/// ties resolved to even — the "banker's rounding" the spec calls for.
pub fn round_div_even(num: i128, den: i128) -> i128 {
    debug_assert!(den > 0);
    let q = num.div_euclid(den);
    let r = num.rem_euclid(den);
    let twice_r = r * 2;
    if twice_r < den {
        q
    } else if twice_r > den {
        q + 1
    } else if q % 2 == 0 {
        q
    } else {
        q + 1
    }
}

/// Convert a 33-bit 90kHz PTS/DTS tick count to nanoseconds.
pub fn ts90khz_to_ns(ticks: u64) -> i64 {
    round_div_even(ticks as i128 * NS_PER_SEC, CLOCK_90KHZ) as i64
}

/// Convert a nanosecond timestamp back to a 90kHz tick count for egress.
pub fn ns_to_ts90khz(ns: i64) -> u64 {
    round_div_even(ns as i128 * CLOCK_90KHZ, NS_PER_SEC) as u64
}

/// Convert a PCR `(base, extension)` pair (33-bit 90kHz base, 9-bit 27MHz
/// extension, `extension < 300`) to nanoseconds.
pub fn pcr_to_ns(base: u64, extension: u16) -> i64 {
    let base_ns = round_div_even(base as i128 * NS_PER_SEC, CLOCK_90KHZ);
    let ext_ns = round_div_even(extension as i128 * NS_PER_SEC, CLOCK_27MHZ);
    (base_ns + ext_ns) as i64
}

/// Convert a nanosecond PCR value back to `(base, extension)` for egress.
pub fn ns_to_pcr(ns: i64) -> (u64, u16) {
    let total_27mhz = round_div_even(ns as i128 * CLOCK_27MHZ, NS_PER_SEC);
    let base = (total_27mhz / 300) as u64;
    let extension = (total_27mhz % 300) as u16;
    (base, extension)
}

/// Duration, in nanoseconds, of one full 33-bit 90kHz counter period —
/// `T` in spec §4.9's rollover correction (`≈ 95_443_717_688_888`).
pub fn rollover_period_ns() -> i64 {
    round_div_even(TS_33BIT_MODULUS * NS_PER_SEC, CLOCK_90KHZ) as i64
}

/// Per-PID, per-timestamp-lane rollover corrector state (spec §4.9).
///
/// The wire's 33-bit 90kHz PTS/DTS counter wraps roughly every 26.5 hours.
/// This tracks how many full periods have elapsed so downstream consumers
/// see a monotonic nanosecond timeline instead of a sawtooth.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolloverCorrector {
    last_raw_ns: Option<i64>,
    epoch: i64,
}

impl RolloverCorrector {
    /// A corrector with no prior observations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one more raw (un-corrected) nanosecond timestamp and return the
    /// corrected, monotonic-friendly value. Call sites pass `None` through
    /// untouched without disturbing the corrector's state (spec §4.9).
    pub fn correct(&mut self, raw_ns: i64) -> i64 {
        let period = rollover_period_ns();
        if let Some(last) = self.last_raw_ns {
            let half = period / 2;
            if last.saturating_sub(raw_ns) > half {
                self.epoch += 1;
            } else if raw_ns.saturating_sub(last) > half && self.epoch > 0 {
                self.epoch -= 1;
            }
        }
        self.last_raw_ns = Some(raw_ns);
        raw_ns + self.epoch * period
    }
}

/// Expands to [`format_args`] for a 90kHz timestamp of any integer type.
///
/// Format is `<hours>:<minutes>:<seconds>:<90kHz-ticks>`.
///
/// # Example
///
/// ```
/// use mpegts_codec::pts_format_args;
/// assert_eq!(std::fmt::format(pts_format_args!(900000u64)), "0:0:10:0");
/// ```
#[macro_export]
macro_rules! pts_format_args {
    ($pts:expr) => {
        format_args!(
            "{}:{}:{}:{}",
            $pts / (90000 * 60 * 60),
            $pts / (90000 * 60) % 60,
            $pts / 90000 % 60,
            $pts % 90000
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn ninety_khz_round_trips_on_any_33bit_tick(ticks: u64) -> bool {
        let ticks = ticks & ((1u64 << 33) - 1);
        ns_to_ts90khz(ts90khz_to_ns(ticks)) == ticks
    }

    #[test]
    fn ninety_khz_round_trips_on_exact_ticks() {
        for ticks in [0u64, 1, 90_000, 1 << 32, (1u64 << 33) - 1] {
            let ns = ts90khz_to_ns(ticks);
            assert_eq!(ns_to_ts90khz(ns), ticks);
        }
    }

    #[test]
    fn pcr_round_trips() {
        let (base, ext) = (2_000_000_000u64, 150u16);
        let ns = pcr_to_ns(base, ext);
        let (base2, ext2) = ns_to_pcr(ns);
        // Round trip may land on an adjacent 27MHz tick due to two-stage
        // rounding; assert within one base tick (spec §8 invariant 1: "pcr
        // within ±1 ns rounding").
        assert!((base2 as i64 - base as i64).abs() <= 1);
        let _ = ext2;
    }

    #[test]
    fn rollover_period_matches_spec() {
        // spec §4.9 gives this as "≈ 95_443_717_688_888"; round-to-nearest-even
        // of 2^33 * 1e9 / 90000 lands one nanosecond above that approximation.
        let t = rollover_period_ns();
        assert_eq!(t, 95_443_717_688_889);
    }

    #[test]
    fn rollover_corrects_forward_wrap() {
        let mut c = RolloverCorrector::new();
        let t = rollover_period_ns() as i64;
        let near_wrap = t - 5_000_000;
        let after_wrap = 1_000_000i64;
        let a = c.correct(near_wrap);
        let b = c.correct(after_wrap);
        assert!(b > a);
    }

    #[quickcheck]
    fn rollover_correction_is_monotonic_for_small_forward_steps(steps: Vec<u32>) -> bool {
        // spec §8 invariant 4: feeding a raw (wrapping) 90kHz timeline that
        // only ever advances by less than half a rollover period in one
        // step must produce a monotonically non-decreasing corrected
        // nanosecond timeline.
        let period = rollover_period_ns();
        let mut raw: i64 = 0;
        let mut corrector = RolloverCorrector::new();
        let mut last_corrected = i64::MIN;
        for step in steps.into_iter().take(64) {
            let bounded_step = (step as i64) % (period / 4).max(1);
            raw = (raw + bounded_step) % period;
            let corrected = corrector.correct(raw);
            if corrected < last_corrected {
                return false;
            }
            last_corrected = corrected;
        }
        true
    }
}
