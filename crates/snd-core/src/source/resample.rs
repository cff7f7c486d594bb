//! Fixed-point resampling cursor
//!
//! Positions are an integer sample index plus a 28-bit fraction. Each call
//! copies exactly the source samples the frame needs (following loops and
//! zero-padding past the end) into a bounded copy buffer, then filters
//! from there. The pitch rate is clamped up front so a frame can never
//! need more samples than the copy buffer holds.

use crate::config::InterpolationMethod;
use crate::types::{
    SamplePair, COPY_BUFFER_BYTES, COPY_BUFFER_GUARD, COPY_BUFFER_SAMPLES, MAX_SAMPLE_SIZE,
    PAINTBUFFER_SIZE,
};

use super::mixer::WaveData;

pub const FIX_BITS: u32 = 28;
pub const FIX_ONE: u64 = 1 << FIX_BITS;
const FIX_MASK: u64 = FIX_ONE - 1;

/// Rates up to this need no clamping
const UNCLAMPED_RATE: f64 = 2.0;

/// Clamp a pitch rate so one frame fits in the copy buffer
pub fn max_rate(rate: f64) -> f64 {
    if rate <= UNCLAMPED_RATE {
        return rate;
    }
    let rate_max = (COPY_BUFFER_BYTES / (PAINTBUFFER_SIZE * MAX_SAMPLE_SIZE)) as f64;
    rate.min(rate_max)
}

#[inline]
pub fn rate_to_fixed(rate: f64) -> u64 {
    (rate.max(0.0) * FIX_ONE as f64) as u64
}

/// Source samples a frame of `count` outputs reads, lookahead included
#[inline]
pub fn samples_needed(frac: u32, count: usize, rate_fix: u64, lookahead: usize) -> usize {
    if count == 0 {
        return 0;
    }
    ((frac as u64 + (count as u64 - 1) * rate_fix) >> FIX_BITS) as usize + 1 + lookahead
}

/// How many outputs read only source samples below `limit`
#[inline]
fn outputs_within(frac: u32, rate_fix: u64, limit: usize, count: usize) -> usize {
    let bound = (limit as u64) << FIX_BITS;
    if bound <= frac as u64 {
        return 0;
    }
    if rate_fix == 0 {
        return count;
    }
    let n = (bound - frac as u64).div_ceil(rate_fix);
    (n as usize).min(count)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    /// Unity rate on a whole sample
    Copy,
    Linear,
    Cubic,
}

impl Filter {
    fn lookahead(self) -> usize {
        match self {
            Filter::Copy => 0,
            Filter::Linear => InterpolationMethod::Linear.lookahead(),
            Filter::Cubic => InterpolationMethod::Cubic.lookahead(),
        }
    }
}

#[inline]
fn lerp(a: i32, b: i32, frac: u64) -> i32 {
    a + (((b - a) as i64 * frac as i64) >> FIX_BITS) as i32
}

#[inline]
fn cubic(s0: i32, s1: i32, s2: i32, s3: i32, t: f32) -> i32 {
    let t2 = t * t;
    let t3 = t2 * t;

    // Catmull-Rom basis functions (tension = 0.5)
    let c0 = -0.5 * t3 + t2 - 0.5 * t;
    let c1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let c2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let c3 = 0.5 * t3 - 0.5 * t2;

    (s0 as f32 * c0 + s1 as f32 * c1 + s2 as f32 * c2 + s3 as f32 * c3).round() as i32
}

pub struct Resampler {
    sample_pos: u32,
    frac: u32,
    /// Source sample just before `sample_pos`, for the cubic filter
    history: SamplePair,
    /// Exclusive end of the playable range
    end: u32,
    loop_start: Option<u32>,
    loops: u32,
    method: InterpolationMethod,
    /// Slot 0 holds `history`, source samples follow
    copy_buf: Vec<SamplePair>,
}

impl Resampler {
    pub fn new(end: u32, loop_start: Option<u32>, method: InterpolationMethod) -> Self {
        Self {
            sample_pos: 0,
            frac: 0,
            history: SamplePair::ZERO,
            end,
            loop_start: loop_start.filter(|&s| s < end),
            loops: 0,
            method,
            copy_buf: vec![SamplePair::ZERO; COPY_BUFFER_SAMPLES + COPY_BUFFER_GUARD],
        }
    }

    pub fn position(&self) -> u32 {
        self.sample_pos
    }

    pub fn fraction(&self) -> u32 {
        self.frac
    }

    pub fn loops(&self) -> u32 {
        self.loops
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn copy_capacity(&self) -> usize {
        self.copy_buf.len()
    }

    /// Move to `pos`; the filter history restarts from silence
    pub fn seek(&mut self, pos: u32, frac: u32, loops: u32) {
        self.sample_pos = pos;
        self.frac = (frac as u64 & FIX_MASK) as u32;
        self.loops = loops;
        self.history = SamplePair::ZERO;
    }

    /// End playback at `end`; a forced end also stops looping
    pub fn set_end(&mut self, end: u32) {
        self.end = end;
        self.loop_start = None;
    }

    /// Shrink the range to data that turned out shorter than declared
    pub fn clamp_end(&mut self, len: u32) {
        if len < self.end {
            self.end = len;
            self.loop_start = self.loop_start.filter(|&s| s < len);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.loop_start.is_none() && self.sample_pos >= self.end
    }

    /// Produce (or with `out = None`, skip) up to `count` samples at `rate`
    pub fn process(
        &mut self,
        data: &mut dyn WaveData,
        rate: f64,
        count: usize,
        out: Option<&mut [SamplePair]>,
    ) -> usize {
        if count == 0 || self.is_finished() {
            return 0;
        }
        let count = count.min(PAINTBUFFER_SIZE);
        let rate_fix = rate_to_fixed(max_rate(rate));
        let filter = if rate_fix == FIX_ONE && self.frac == 0 {
            Filter::Copy
        } else {
            match self.method {
                InterpolationMethod::Linear => Filter::Linear,
                InterpolationMethod::Cubic => Filter::Cubic,
            }
        };
        let lookahead = filter.lookahead();
        let needed = samples_needed(self.frac, count, rate_fix, lookahead);
        debug_assert!(needed < self.copy_buf.len(), "copy buffer overrun: {}", needed);
        let needed = needed.min(self.copy_buf.len() - 1);

        let (real, end_reached) = self.fetch(data, needed);
        let limit = if end_reached {
            real
        } else if real < needed {
            real.saturating_sub(lookahead)
        } else {
            needed
        };
        let produced = outputs_within(self.frac, rate_fix, limit, count);

        if let Some(out) = out {
            self.filter(filter, rate_fix, &mut out[..produced]);
        }
        self.advance(produced, rate_fix, needed);
        produced
    }

    /// Fill the copy buffer with `needed` samples from the cursor on
    fn fetch(&mut self, data: &mut dyn WaveData, needed: usize) -> (usize, bool) {
        data.release_before(self.sample_pos);
        self.copy_buf[0] = self.history;
        let mut filled = 0;
        let mut pos = self.sample_pos;
        let mut end_reached = false;

        while filled < needed {
            if pos >= self.end {
                match self.loop_start {
                    Some(start) => pos = start,
                    None => {
                        end_reached = true;
                        break;
                    }
                }
            }
            let want = (needed - filled).min((self.end - pos) as usize);
            let got = data.read_samples(pos, &mut self.copy_buf[1 + filled..1 + filled + want]);
            filled += got;
            pos += got as u32;
            if got < want {
                break;
            }
        }

        self.copy_buf[1 + filled..1 + needed].fill(SamplePair::ZERO);
        (filled, end_reached)
    }

    fn filter(&self, filter: Filter, rate_fix: u64, out: &mut [SamplePair]) {
        let buf = &self.copy_buf;
        match filter {
            Filter::Copy => out.copy_from_slice(&buf[1..1 + out.len()]),
            Filter::Linear => {
                for (i, dst) in out.iter_mut().enumerate() {
                    let p = self.frac as u64 + i as u64 * rate_fix;
                    let idx = (p >> FIX_BITS) as usize + 1;
                    let f = p & FIX_MASK;
                    let (a, b) = (buf[idx], buf[idx + 1]);
                    *dst = SamplePair::new(lerp(a.left, b.left, f), lerp(a.right, b.right, f));
                }
            }
            Filter::Cubic => {
                for (i, dst) in out.iter_mut().enumerate() {
                    let p = self.frac as u64 + i as u64 * rate_fix;
                    let idx = (p >> FIX_BITS) as usize + 1;
                    let t = (p & FIX_MASK) as f32 / FIX_ONE as f32;
                    let (s0, s1, s2, s3) = (buf[idx - 1], buf[idx], buf[idx + 1], buf[idx + 2]);
                    *dst = SamplePair::new(
                        cubic(s0.left, s1.left, s2.left, s3.left, t),
                        cubic(s0.right, s1.right, s2.right, s3.right, t),
                    );
                }
            }
        }
    }

    fn advance(&mut self, produced: usize, rate_fix: u64, needed: usize) {
        let total = self.frac as u64 + produced as u64 * rate_fix;
        let consumed = total >> FIX_BITS;
        self.frac = (total & FIX_MASK) as u32;
        if consumed == 0 {
            return;
        }
        self.history = if consumed as usize <= needed {
            self.copy_buf[consumed as usize]
        } else {
            SamplePair::ZERO
        };

        let mut pos = self.sample_pos as u64 + consumed;
        let end = self.end as u64;
        if pos >= end {
            match self.loop_start {
                Some(start) => {
                    let start = start as u64;
                    let wraps = (pos - end) / (end - start);
                    pos = start + (pos - end) % (end - start);
                    self.loops = self.loops.wrapping_add(1 + wraps as u32);
                }
                None => {
                    pos = end;
                    self.frac = 0;
                }
            }
        }
        self.sample_pos = pos as u32;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory mono data with an optional "arrived so far" limit
    pub struct VecData {
        pub samples: Vec<i32>,
        pub available: usize,
    }

    impl VecData {
        pub fn new(samples: Vec<i32>) -> Self {
            let available = samples.len();
            Self { samples, available }
        }
    }

    impl WaveData for VecData {
        fn read_samples(&mut self, pos: u32, out: &mut [SamplePair]) -> usize {
            let start = pos as usize;
            let end = (start + out.len()).min(self.available);
            if start >= end {
                return 0;
            }
            for (dst, &s) in out.iter_mut().zip(&self.samples[start..end]) {
                *dst = SamplePair::mono(s);
            }
            end - start
        }

        fn is_ready_to_mix(&mut self) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::VecData;
    use super::*;

    fn ramp(len: usize) -> Vec<i32> {
        (0..len as i32).collect()
    }

    #[test]
    fn test_pitch_rate_bound_holds_for_every_frame_size() {
        let resampler = Resampler::new(1, None, InterpolationMethod::Cubic);
        let capacity = resampler.copy_capacity();
        for requested in [2.0001, 2.5, 7.99, 8.0, 9.0, 64.0, 1000.0, f64::MAX] {
            let rate_fix = rate_to_fixed(max_rate(requested));
            for count in [1, 2, 7, 511, PAINTBUFFER_SIZE - 1, PAINTBUFFER_SIZE] {
                for frac in [0u32, 1, (FIX_MASK / 2) as u32, FIX_MASK as u32] {
                    for lookahead in [0, 1, 2] {
                        // +1 for the history slot
                        let needed = samples_needed(frac, count, rate_fix, lookahead) + 1;
                        assert!(
                            needed <= capacity,
                            "rate {requested} count {count} frac {frac} needs {needed} > {capacity}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_low_rates_are_not_clamped() {
        assert_eq!(max_rate(0.5), 0.5);
        assert_eq!(max_rate(2.0), 2.0);
        assert_eq!(max_rate(100.0), 8.0);
    }

    #[test]
    fn test_unity_rate_copies_exactly() {
        let mut data = VecData::new(ramp(100));
        let mut r = Resampler::new(100, None, InterpolationMethod::Linear);
        let mut out = [SamplePair::ZERO; 10];
        assert_eq!(r.process(&mut data, 1.0, 10, Some(&mut out)), 10);
        assert_eq!(out[3], SamplePair::mono(3));
        assert_eq!(r.position(), 10);
        assert_eq!(r.fraction(), 0);
    }

    #[test]
    fn test_half_rate_interpolates() {
        let mut data = VecData::new(ramp(100).iter().map(|s| s * 2).collect());
        let mut r = Resampler::new(100, None, InterpolationMethod::Linear);
        let mut out = [SamplePair::ZERO; 4];
        assert_eq!(r.process(&mut data, 0.5, 4, Some(&mut out)), 4);
        let left: Vec<i32> = out.iter().map(|s| s.left).collect();
        assert_eq!(left, vec![0, 1, 2, 3]);
        assert_eq!(r.position(), 2);
    }

    #[test]
    fn test_cubic_passes_through_samples() {
        let mut data = VecData::new(vec![5, 10, 20, 40, 80, 160]);
        let mut r = Resampler::new(6, None, InterpolationMethod::Cubic);
        let mut out = [SamplePair::ZERO; 4];
        // Half rate takes the filter path from a whole sample
        r.seek(1, 0, 0);
        assert_eq!(r.process(&mut data, 0.5, 4, Some(&mut out)), 4);
        assert_eq!(out[0].left, 10);
        assert_eq!(out[2].left, 20);
    }

    #[test]
    fn test_non_looped_end_stops_and_pads() {
        let mut data = VecData::new(ramp(10));
        let mut r = Resampler::new(10, None, InterpolationMethod::Linear);
        let mut out = [SamplePair::ZERO; 32];
        assert_eq!(r.process(&mut data, 1.0, 32, Some(&mut out)), 10);
        assert!(r.is_finished());
        assert_eq!(r.process(&mut data, 1.0, 32, Some(&mut out)), 0);
    }

    #[test]
    fn test_loop_wraps_to_loop_start() {
        let mut data = VecData::new(ramp(10));
        let mut r = Resampler::new(10, Some(4), InterpolationMethod::Linear);
        let mut out = [SamplePair::ZERO; 14];
        assert_eq!(r.process(&mut data, 1.0, 14, Some(&mut out)), 14);
        let left: Vec<i32> = out.iter().map(|s| s.left).collect();
        assert_eq!(left, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 4, 5, 6, 7]);
        assert_eq!(r.position(), 8);
        assert_eq!(r.loops(), 1);
        assert!(!r.is_finished());
    }

    #[test]
    fn test_underrun_produces_partial_then_resumes() {
        let mut data = VecData::new(ramp(100));
        data.available = 5;
        let mut r = Resampler::new(100, None, InterpolationMethod::Linear);
        let mut out = [SamplePair::ZERO; 20];

        // Linear filter needs one sample of lookahead past the last output
        assert_eq!(r.process(&mut data, 0.5, 20, Some(&mut out)), 8);
        assert_eq!(r.position(), 4);

        data.available = 100;
        assert_eq!(r.process(&mut data, 0.5, 20, Some(&mut out)), 20);
        assert_eq!(out[0].left, 4);
        assert_eq!(r.position(), 14);
    }

    #[test]
    fn test_skip_advances_like_mix() {
        let mut mixed = Resampler::new(500, Some(100), InterpolationMethod::Cubic);
        let mut skipped = Resampler::new(500, Some(100), InterpolationMethod::Cubic);
        let mut a = VecData::new(ramp(500));
        let mut b = VecData::new(ramp(500));
        let mut out = [SamplePair::ZERO; PAINTBUFFER_SIZE];
        for _ in 0..7 {
            let n1 = mixed.process(&mut a, 1.37, PAINTBUFFER_SIZE, Some(&mut out));
            let n2 = skipped.process(&mut b, 1.37, PAINTBUFFER_SIZE, None);
            assert_eq!(n1, n2);
            assert_eq!(mixed.position(), skipped.position());
            assert_eq!(mixed.fraction(), skipped.fraction());
        }
    }

    #[test]
    fn test_forced_end_disables_loop() {
        let mut data = VecData::new(ramp(100));
        let mut r = Resampler::new(100, Some(0), InterpolationMethod::Linear);
        r.set_end(20);
        let mut out = [SamplePair::ZERO; 64];
        assert_eq!(r.process(&mut data, 1.0, 64, Some(&mut out)), 20);
        assert!(r.is_finished());
    }
}
