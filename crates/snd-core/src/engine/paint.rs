//! Bus buffers and per-channel volume application
//!
//! A frame is painted into six [`PaintBuffer`]s: the spatial sends (room,
//! facing, facing-away), dry, in-world speaker, and main, which receives
//! the sum of the others after their DSP stages. Accumulation is `i32`;
//! clipping happens only at transfer.

use crate::channel::SpeakerVolumes;
use crate::config::SurroundMode;
use crate::types::{SamplePair, PAINTBUFFER_SIZE, SPEAKER_COUNT};

/// Which bus a [`PaintBuffer`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusKind {
    Main,
    Room,
    Facing,
    FacingAway,
    Dry,
    Speaker,
}

pub const BUS_COUNT: usize = 6;

impl BusKind {
    /// Storage order in the engine's bus array
    pub const ALL: [BusKind; BUS_COUNT] = [
        BusKind::Main,
        BusKind::Room,
        BusKind::Facing,
        BusKind::FacingAway,
        BusKind::Dry,
        BusKind::Speaker,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One bus worth of accumulated samples
///
/// Rear and center storage exists only when the output layout has those
/// speakers.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintBuffer {
    kind: BusKind,
    pub front: Vec<SamplePair>,
    pub rear: Option<Vec<SamplePair>>,
    pub center: Option<Vec<i32>>,
}

impl PaintBuffer {
    pub fn new(kind: BusKind, surround: SurroundMode) -> Self {
        Self {
            kind,
            front: vec![SamplePair::ZERO; PAINTBUFFER_SIZE],
            rear: surround
                .has_rear()
                .then(|| vec![SamplePair::ZERO; PAINTBUFFER_SIZE]),
            center: surround.has_center().then(|| vec![0; PAINTBUFFER_SIZE]),
        }
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    pub fn clear(&mut self, count: usize) {
        self.front[..count].fill(SamplePair::ZERO);
        if let Some(rear) = &mut self.rear {
            rear[..count].fill(SamplePair::ZERO);
        }
        if let Some(center) = &mut self.center {
            center[..count].fill(0);
        }
    }

    /// Sum `other` into this bus
    pub fn add_from(&mut self, other: &PaintBuffer, count: usize) {
        for (d, s) in self.front[..count].iter_mut().zip(&other.front[..count]) {
            *d += *s;
        }
        if let (Some(d), Some(s)) = (&mut self.rear, &other.rear) {
            for (d, s) in d[..count].iter_mut().zip(&s[..count]) {
                *d += *s;
            }
        }
        if let (Some(d), Some(s)) = (&mut self.center, &other.center) {
            for (d, s) in d[..count].iter_mut().zip(&s[..count]) {
                *d += *s;
            }
        }
    }

    pub fn is_silent(&self, count: usize) -> bool {
        self.front[..count].iter().all(|s| *s == SamplePair::ZERO)
            && self
                .rear
                .as_ref()
                .map_or(true, |r| r[..count].iter().all(|s| *s == SamplePair::ZERO))
            && self.center.as_ref().map_or(true, |c| c[..count].iter().all(|&s| s == 0))
    }

    /// Sample-for-sample equality over the first `count` samples
    pub fn same_as(&self, other: &PaintBuffer, count: usize) -> bool {
        self.front[..count] == other.front[..count]
            && match (&self.rear, &other.rear) {
                (Some(a), Some(b)) => a[..count] == b[..count],
                (None, None) => true,
                _ => false,
            }
            && match (&self.center, &other.center) {
                (Some(a), Some(b)) => a[..count] == b[..count],
                (None, None) => true,
                _ => false,
            }
    }
}

/// Per-speaker contribution of one stereo sample
///
/// Returns (FL, FR, RL, RR, C). Centre takes the average of both sides.
#[inline]
fn contribution(s: SamplePair, v: &[i32; SPEAKER_COUNT]) -> [i32; SPEAKER_COUNT] {
    [
        (s.left * v[0]) >> 8,
        (s.right * v[1]) >> 8,
        (s.left * v[2]) >> 8,
        (s.right * v[3]) >> 8,
        (((s.left + s.right) >> 1) * v[4]) >> 8,
    ]
}

/// Doppler contribution: left (approach) with `v`, right (recede) with `sh`
#[inline]
fn doppler_contribution(s: SamplePair, v: &[i32; SPEAKER_COUNT], sh: &[i32; SPEAKER_COUNT]) -> [i32; SPEAKER_COUNT] {
    let mut out = [0; SPEAKER_COUNT];
    for i in 0..SPEAKER_COUNT {
        out[i] = ((s.left * v[i]) >> 8) + ((s.right * sh[i]) >> 8);
    }
    out
}

#[inline]
fn store(out: &mut PaintBuffer, i: usize, c: [i32; SPEAKER_COUNT]) {
    out.front[i] = SamplePair::new(c[0], c[1]);
    if let Some(rear) = &mut out.rear {
        rear[i] = SamplePair::new(c[2], c[3]);
    }
    if let Some(center) = &mut out.center {
        center[i] = c[4];
    }
}

/// Apply volumes sample by sample, stepping every ramp
pub fn apply_volumes_generic(
    raw: &[SamplePair],
    volumes: &mut SpeakerVolumes,
    doppler: bool,
    out: &mut PaintBuffer,
) {
    for (i, &s) in raw.iter().enumerate() {
        let (v, sh) = volumes.advance();
        let c = if doppler {
            doppler_contribution(s, &v, &sh)
        } else {
            contribution(s, &v)
        };
        store(out, i, c);
    }
}

/// Apply constant volumes; non-doppler only
pub fn apply_volumes_fixed(raw: &[SamplePair], v: &[i32; SPEAKER_COUNT], out: &mut PaintBuffer) {
    let n = raw.len();
    let [vfl, vfr, vrl, vrr, vc] = *v;

    let mut dst = out.front[..n].chunks_exact_mut(4);
    let mut src = raw.chunks_exact(4);
    for (d, s) in (&mut dst).zip(&mut src) {
        d[0] = SamplePair::new((s[0].left * vfl) >> 8, (s[0].right * vfr) >> 8);
        d[1] = SamplePair::new((s[1].left * vfl) >> 8, (s[1].right * vfr) >> 8);
        d[2] = SamplePair::new((s[2].left * vfl) >> 8, (s[2].right * vfr) >> 8);
        d[3] = SamplePair::new((s[3].left * vfl) >> 8, (s[3].right * vfr) >> 8);
    }
    for (d, s) in dst.into_remainder().iter_mut().zip(src.remainder()) {
        *d = SamplePair::new((s.left * vfl) >> 8, (s.right * vfr) >> 8);
    }

    if let Some(rear) = &mut out.rear {
        for (d, s) in rear[..n].iter_mut().zip(raw) {
            *d = SamplePair::new((s.left * vrl) >> 8, (s.right * vrr) >> 8);
        }
    }
    if let Some(center) = &mut out.center {
        for (d, s) in center[..n].iter_mut().zip(raw) {
            *d = (((s.left + s.right) >> 1) * vc) >> 8;
        }
    }
}

/// Where a channel's contribution goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dry,
    Speaker,
    /// Room share and facing-away share, 0 - 256
    Spatial { mix_q: i32, face_q: i32 },
}

impl Route {
    pub fn spatial(dsp_mix: f32, dsp_face: f32) -> Self {
        let q = |x: f32| (x.clamp(0.0, 1.0) * 256.0).round() as i32;
        Route::Spatial {
            mix_q: q(dsp_mix),
            face_q: q(dsp_face),
        }
    }
}

/// Room, facing and facing-away shares of `x`; they always sum to `x`
#[inline]
fn split(x: i32, mix_q: i32, face_q: i32) -> (i32, i32, i32) {
    let room = (x * mix_q) >> 8;
    let rest = x - room;
    let away = (rest * face_q) >> 8;
    (room, rest - away, away)
}

/// Add a channel's contribution to the buses it routes to
pub fn route(contrib: &PaintBuffer, buses: &mut [PaintBuffer; BUS_COUNT], route: Route, count: usize) {
    let [_, room, facing, away, dry, speaker] = buses;
    match route {
        Route::Dry => dry.add_from(contrib, count),
        Route::Speaker => speaker.add_from(contrib, count),
        Route::Spatial { mix_q, face_q } => {
            for i in 0..count {
                let s = contrib.front[i];
                let (rl, fl, al) = split(s.left, mix_q, face_q);
                let (rr, fr, ar) = split(s.right, mix_q, face_q);
                room.front[i] += SamplePair::new(rl, rr);
                facing.front[i] += SamplePair::new(fl, fr);
                away.front[i] += SamplePair::new(al, ar);
            }
            if let Some(src) = &contrib.rear {
                for (i, &s) in src[..count].iter().enumerate() {
                    let (rl, fl, al) = split(s.left, mix_q, face_q);
                    let (rr, fr, ar) = split(s.right, mix_q, face_q);
                    if let (Some(r), Some(f), Some(a)) = (&mut room.rear, &mut facing.rear, &mut away.rear) {
                        r[i] += SamplePair::new(rl, rr);
                        f[i] += SamplePair::new(fl, fr);
                        a[i] += SamplePair::new(al, ar);
                    }
                }
            }
            if let Some(src) = &contrib.center {
                for (i, &c) in src[..count].iter().enumerate() {
                    let (r, f, a) = split(c, mix_q, face_q);
                    if let (Some(rc), Some(fc), Some(ac)) = (&mut room.center, &mut facing.center, &mut away.center) {
                        rc[i] += r;
                        fc[i] += f;
                        ac[i] += a;
                    }
                }
            }
        }
    }
}

/// Per-bus processing hook run before the buses are summed into main
pub trait DspStage: Send {
    fn process(&mut self, bus: BusKind, buffer: &mut PaintBuffer, count: usize);
}

/// Pass-through stage
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDsp;

impl DspStage for NoDsp {
    fn process(&mut self, _bus: BusKind, _buffer: &mut PaintBuffer, _count: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(n: usize) -> Vec<SamplePair> {
        (0..n as i32)
            .map(|i| SamplePair::new(i * 37 - 9000, 5000 - i * 91))
            .collect()
    }

    fn constant(vols: [f32; SPEAKER_COUNT]) -> SpeakerVolumes {
        let mut v = SpeakerVolumes::default();
        v.set_targets(&vols, &vols, 0, true);
        v
    }

    #[test]
    fn test_fixed_path_matches_generic_bit_for_bit() {
        for surround in [SurroundMode::Stereo, SurroundMode::Quad, SurroundMode::FiveOne] {
            for n in [0, 1, 3, 4, 5, 1019, 1020] {
                let input = raw(n);
                let mut volumes = constant([255.0, 200.0, 17.0, 3.0, 128.0]);
                let mut fast = PaintBuffer::new(BusKind::Main, surround);
                let mut generic = PaintBuffer::new(BusKind::Main, surround);
                apply_volumes_fixed(&input, &volumes.int_volumes(), &mut fast);
                apply_volumes_generic(&input, &mut volumes, false, &mut generic);
                assert!(fast.same_as(&generic, n), "{surround:?} n={n}");
            }
        }
    }

    #[test]
    fn test_center_takes_average() {
        let mut out = PaintBuffer::new(BusKind::Main, SurroundMode::FiveOne);
        apply_volumes_fixed(&[SamplePair::new(1000, 3000)], &[0, 0, 0, 0, 256], &mut out);
        assert_eq!(out.center.as_ref().unwrap()[0], 2000);
    }

    #[test]
    fn test_generic_ramp_lands_on_target() {
        let mut volumes = constant([0.0; SPEAKER_COUNT]);
        volumes.set_targets(&[255.0; SPEAKER_COUNT], &[255.0; SPEAKER_COUNT], 8, false);
        let input = vec![SamplePair::mono(256); 8];
        let mut out = PaintBuffer::new(BusKind::Main, SurroundMode::Stereo);
        apply_volumes_generic(&input, &mut volumes, false, &mut out);
        assert!(out.front[0].left < out.front[7].left);
        assert_eq!(out.front[7].left, 255);
        assert!(volumes.is_constant());
    }

    #[test]
    fn test_doppler_mixes_halves_separately() {
        let mut volumes = SpeakerVolumes::default();
        volumes.set_targets(&[255.0; SPEAKER_COUNT], &[0.0; SPEAKER_COUNT], 0, true);
        let mut out = PaintBuffer::new(BusKind::Main, SurroundMode::Stereo);
        apply_volumes_generic(&[SamplePair::new(1024, 4096)], &mut volumes, true, &mut out);
        // Only the approaching (left) half is audible, on both speakers
        assert_eq!(out.front[0], SamplePair::new(1020, 1020));
    }

    #[test]
    fn test_split_conserves_signal() {
        for x in [-32768, -1, 0, 1, 255, 32767, 1 << 20] {
            for mix_q in [0, 1, 128, 255, 256] {
                for face_q in [0, 64, 256] {
                    let (r, f, a) = split(x, mix_q, face_q);
                    assert_eq!(r + f + a, x);
                }
            }
        }
    }

    #[test]
    fn test_route_targets_buses() {
        let mut buses = BusKind::ALL.map(|k| PaintBuffer::new(k, SurroundMode::Stereo));
        let mut contrib = PaintBuffer::new(BusKind::Main, SurroundMode::Stereo);
        contrib.front[0] = SamplePair::new(1000, -1000);

        route(&contrib, &mut buses, Route::Dry, 1);
        assert_eq!(buses[BusKind::Dry.index()].front[0], SamplePair::new(1000, -1000));

        route(&contrib, &mut buses, Route::spatial(0.5, 0.0), 1);
        assert_eq!(buses[BusKind::Room.index()].front[0].left, 500);
        assert_eq!(buses[BusKind::Facing.index()].front[0].left, 500);
        assert_eq!(buses[BusKind::FacingAway.index()].front[0].left, 0);
        assert!(buses[BusKind::Speaker.index()].is_silent(1));
    }
}
