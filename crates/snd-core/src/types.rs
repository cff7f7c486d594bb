//! Common types for the mixer
//!
//! Sample containers and the fixed sizes the mixing pass is built around.

use bytemuck::{Pod, Zeroable};
use std::ops::{Add, AddAssign};

/// Default output rate of the mixing pass
pub const DEFAULT_OUTPUT_RATE: u32 = 44100;

/// Maximum number of sample pairs painted per frame
pub const PAINTBUFFER_SIZE: usize = 1020;

/// Largest source sample in bytes (16-bit stereo)
pub const MAX_SAMPLE_SIZE: usize = 4;

/// Size of the per-mixer temporary copy buffer in bytes
///
/// Together with [`PAINTBUFFER_SIZE`] this fixes the highest pitch rate a
/// mixer can resample in one frame (8x).
pub const COPY_BUFFER_BYTES: usize = PAINTBUFFER_SIZE * MAX_SAMPLE_SIZE * 8;

/// Copy buffer capacity in source samples
pub const COPY_BUFFER_SAMPLES: usize = COPY_BUFFER_BYTES / MAX_SAMPLE_SIZE;

/// Extra copy buffer samples for the history slot and filter lookahead
pub const COPY_BUFFER_GUARD: usize = 5;

/// Number of speaker volumes tracked per channel
pub const SPEAKER_COUNT: usize = 5;

/// Speaker slots in [`SpeakerVolumes`](crate::channel::SpeakerVolumes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Speaker {
    FrontLeft = 0,
    FrontRight = 1,
    RearLeft = 2,
    RearRight = 3,
    Center = 4,
}

impl Speaker {
    pub const ALL: [Speaker; SPEAKER_COUNT] = [
        Speaker::FrontLeft,
        Speaker::FrontRight,
        Speaker::RearLeft,
        Speaker::RearRight,
        Speaker::Center,
    ];
}

/// One left/right pair in accumulation precision
///
/// Values are in the 16-bit sample domain but held as `i32`, so many
/// channels can be summed before the final clip at transfer. `Pod` keeps
/// it a plain pair of integers with no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SamplePair {
    pub left: i32,
    pub right: i32,
}

impl SamplePair {
    pub const ZERO: SamplePair = SamplePair { left: 0, right: 0 };

    #[inline]
    pub fn new(left: i32, right: i32) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn mono(value: i32) -> Self {
        Self { left: value, right: value }
    }
}

impl Add for SamplePair {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            left: self.left + rhs.left,
            right: self.right + rhs.right,
        }
    }
}

impl AddAssign for SamplePair {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}

/// Simple 3D vector used for listener and channel placement
pub type Vec3 = [f32; 3];

#[inline]
pub fn vec_sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vec_dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vec_length(a: Vec3) -> f32 {
    vec_dot(a, a).sqrt()
}

/// Normalize `a`, returning the zero vector for zero-length input
#[inline]
pub fn vec_normalize(a: Vec3) -> Vec3 {
    let len = vec_length(a);
    if len <= f32::EPSILON {
        [0.0; 3]
    } else {
        [a[0] / len, a[1] / len, a[2] / len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_pair_add() {
        let mut a = SamplePair::new(1, -2);
        a += SamplePair::mono(3);
        assert_eq!(a, SamplePair::new(4, 1));
    }

    #[test]
    fn test_sample_pairs_view_as_interleaved_ints() {
        let pairs = [SamplePair::new(1, -1), SamplePair::new(2, -2)];
        let flat: &[i32] = bytemuck::cast_slice(&pairs);
        assert_eq!(flat, &[1, -1, 2, -2]);
        assert_eq!(<SamplePair as bytemuck::Zeroable>::zeroed(), SamplePair::default());
    }

    #[test]
    fn test_copy_buffer_covers_eight_times_paintbuffer() {
        assert_eq!(COPY_BUFFER_SAMPLES, PAINTBUFFER_SIZE * 8);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(vec_normalize([0.0; 3]), [0.0; 3]);
        let n = vec_normalize([3.0, 0.0, 4.0]);
        assert!((vec_length(n) - 1.0).abs() < 1e-6);
    }
}
