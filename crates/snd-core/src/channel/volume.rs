//! Per-sample volume ramps
//!
//! Volumes are 0 - 255. Each frame the spatializer sets a new target and
//! the ramp walks toward it one sample at a time; the final step lands on
//! the target exactly, so a frame's last sample always plays at the
//! requested volume.

use crate::types::SPEAKER_COUNT;

/// Loudest channel volume
pub const VOLUME_MAX: f32 = 255.0;

/// Linear ramp from the current volume to a target
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumeRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
}

impl VolumeRamp {
    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }

    /// Ramp to `target` over exactly `samples` samples
    pub fn set_target(&mut self, target: f32, samples: usize) {
        let target = target.clamp(0.0, VOLUME_MAX);
        self.target = target;
        if samples == 0 || target == self.current {
            self.snap();
            return;
        }
        self.step = (target - self.current) / samples as f32;
        self.remaining = samples as u32;
    }

    /// Jump straight to `volume` with no ramp
    pub fn set_immediate(&mut self, volume: f32) {
        self.target = volume.clamp(0.0, VOLUME_MAX);
        self.snap();
    }

    fn snap(&mut self) {
        self.current = self.target;
        self.step = 0.0;
        self.remaining = 0;
    }

    /// Step one sample and return the volume to use for it
    #[inline]
    pub fn advance(&mut self) -> f32 {
        match self.remaining {
            0 => {}
            1 => self.snap(),
            _ => {
                let next = self.current + self.step;
                // Float error must never carry the ramp past its target
                self.current = if self.step > 0.0 {
                    next.min(self.target)
                } else {
                    next.max(self.target)
                };
                self.remaining -= 1;
            }
        }
        self.current
    }

    /// Step `n` samples without using the values
    pub fn advance_by(&mut self, n: usize) {
        let steps = n.min(self.remaining as usize);
        for _ in 0..steps {
            self.advance();
        }
    }

    /// Whether every sample until the ramp ends truncates to volume 0
    #[inline]
    pub fn is_silent(&self) -> bool {
        self.current < 1.0 && self.target < 1.0
    }
}

/// Volume ramps for every speaker of one channel
///
/// `shadow` holds the doppler copies: doppler sources carry the
/// approaching sound on the left channel and the receding sound on the
/// right, and the right channel is mixed with these volumes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeakerVolumes {
    pub ramps: [VolumeRamp; SPEAKER_COUNT],
    pub shadow: [VolumeRamp; SPEAKER_COUNT],
}

impl SpeakerVolumes {
    /// Set new targets for this frame; `immediate` skips the ramp
    pub fn set_targets(
        &mut self,
        targets: &[f32; SPEAKER_COUNT],
        shadow: &[f32; SPEAKER_COUNT],
        samples: usize,
        immediate: bool,
    ) {
        for (ramp, &t) in self.ramps.iter_mut().zip(targets) {
            if immediate {
                ramp.set_immediate(t);
            } else {
                ramp.set_target(t, samples);
            }
        }
        for (ramp, &t) in self.shadow.iter_mut().zip(shadow) {
            if immediate {
                ramp.set_immediate(t);
            } else {
                ramp.set_target(t, samples);
            }
        }
    }

    /// Step one sample; returns integer volumes for main and shadow sets
    #[inline]
    pub fn advance(&mut self) -> ([i32; SPEAKER_COUNT], [i32; SPEAKER_COUNT]) {
        let mut main = [0i32; SPEAKER_COUNT];
        let mut shadow = [0i32; SPEAKER_COUNT];
        for i in 0..SPEAKER_COUNT {
            main[i] = self.ramps[i].advance() as i32;
            shadow[i] = self.shadow[i].advance() as i32;
        }
        (main, shadow)
    }

    pub fn advance_by(&mut self, n: usize) {
        for ramp in self.ramps.iter_mut().chain(self.shadow.iter_mut()) {
            ramp.advance_by(n);
        }
    }

    /// No ramp in progress on any speaker
    pub fn is_constant(&self) -> bool {
        self.ramps
            .iter()
            .chain(self.shadow.iter())
            .all(|r| !r.is_ramping())
    }

    /// Every speaker stays below volume 1 for the whole frame
    pub fn is_silent(&self) -> bool {
        self.ramps
            .iter()
            .chain(self.shadow.iter())
            .all(VolumeRamp::is_silent)
    }

    /// Current integer volumes (main set)
    pub fn int_volumes(&self) -> [i32; SPEAKER_COUNT] {
        let mut out = [0i32; SPEAKER_COUNT];
        for (o, r) in out.iter_mut().zip(&self.ramps) {
            *o = r.current() as i32;
        }
        out
    }

    pub fn current(&self) -> [f32; SPEAKER_COUNT] {
        let mut out = [0.0f32; SPEAKER_COUNT];
        for (o, r) in out.iter_mut().zip(&self.ramps) {
            *o = r.current();
        }
        out
    }

    /// Loudest target across all speakers, used to rank duplicates
    pub fn max_target(&self) -> f32 {
        self.ramps
            .iter()
            .chain(self.shadow.iter())
            .map(VolumeRamp::target)
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(current: f32, target: f32, samples: usize) -> Vec<f32> {
        let mut ramp = VolumeRamp::default();
        ramp.set_immediate(current);
        ramp.set_target(target, samples);
        (0..samples).map(|_| ramp.advance()).collect()
    }

    #[test]
    fn test_ramp_reaches_target_exactly() {
        let cases = [
            (0.0, 255.0, 1020),
            (255.0, 0.0, 1020),
            (17.3, 200.9, 7),
            (200.0, 199.5, 1000),
            (0.0, 1.0, 3),
            (128.0, 128.0, 64),
            (3.0, 250.0, 1),
        ];
        for (current, target, samples) in cases {
            let values = run(current, target, samples);
            assert_eq!(*values.last().unwrap(), target, "{current} -> {target} over {samples}");
        }
    }

    #[test]
    fn test_ramp_is_monotonic_and_never_overshoots() {
        for (current, target) in [(0.0f32, 255.0f32), (255.0, 0.0), (0.1, 254.9), (99.0, 98.0)] {
            let values = run(current, target, 997);
            let (lo, hi) = (current.min(target), current.max(target));
            let mut prev = current;
            for v in values {
                assert!(v >= lo && v <= hi, "{v} outside [{lo}, {hi}]");
                if target > current {
                    assert!(v >= prev);
                } else {
                    assert!(v <= prev);
                }
                prev = v;
            }
        }
    }

    #[test]
    fn test_ramp_holds_after_completion() {
        let mut ramp = VolumeRamp::default();
        ramp.set_target(100.0, 4);
        ramp.advance_by(10);
        assert_eq!(ramp.current(), 100.0);
        assert!(!ramp.is_ramping());
        assert_eq!(ramp.advance(), 100.0);
    }

    #[test]
    fn test_target_is_clamped() {
        let mut ramp = VolumeRamp::default();
        ramp.set_immediate(400.0);
        assert_eq!(ramp.current(), VOLUME_MAX);
        ramp.set_immediate(-3.0);
        assert_eq!(ramp.current(), 0.0);
    }

    #[test]
    fn test_silence_detection() {
        let mut volumes = SpeakerVolumes::default();
        assert!(volumes.is_silent());
        volumes.set_targets(&[0.9; SPEAKER_COUNT], &[0.0; SPEAKER_COUNT], 100, false);
        assert!(volumes.is_silent());
        volumes.set_targets(&[1.0, 0.0, 0.0, 0.0, 0.0], &[0.0; SPEAKER_COUNT], 100, false);
        assert!(!volumes.is_silent());
        assert_eq!(volumes.max_target(), 1.0);
    }
}
