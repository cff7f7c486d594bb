//! Integer sample scaling: an 8-bit lookup table and a master factor
//!
//! The mixing pass never touches floating point per sample: 8-bit sources
//! expand through a lookup table and the master volume is folded into a
//! single fixed-point factor applied at transfer.

/// Fractional bits of [`MasterScale`]
pub const SCALE_BITS: u32 = 8;

const fn build_pcm8_table() -> [i32; 256] {
    let mut table = [0i32; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as i32 - 128) << 8;
        i += 1;
    }
    table
}

/// Unsigned 8-bit sample to the 16-bit domain
static PCM8_TABLE: [i32; 256] = build_pcm8_table();

#[inline]
pub fn pcm8_to_16(sample: u8) -> i32 {
    PCM8_TABLE[sample as usize]
}

/// Master volume as a fixed-point factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterScale {
    factor: i32,
}

impl MasterScale {
    /// Build from a 0.0 - 1.0 volume
    pub fn new(volume: f32) -> Self {
        let clamped = volume.clamp(0.0, 1.0);
        Self {
            factor: (clamped * (1 << SCALE_BITS) as f32).round() as i32,
        }
    }

    pub fn factor(&self) -> i32 {
        self.factor
    }

    /// Scale an accumulated sample and clip it to the output range
    #[inline]
    pub fn apply(&self, sample: i32) -> i16 {
        let scaled = (sample as i64 * self.factor as i64) >> SCALE_BITS;
        scaled.clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }
}

impl Default for MasterScale {
    fn default() -> Self {
        Self::new(1.0)
    }
}
