//! Listener-relative placement of channels
//!
//! Turns a channel's origin, facing and master volume into per-speaker
//! target volumes, bus send amounts (`dsp_mix`, `dsp_face`), a level in
//! dB and HRTF direction state. Runs once per channel per frame before
//! mixing.

use crate::channel::{Channel, VOLUME_MAX};
use crate::types::{vec_dot, vec_length, vec_normalize, vec_sub, Vec3, SPEAKER_COUNT};

/// Distance at which HRTF processing is fully directional
const HRTF_FULL_DISTANCE: f32 = 100.0;
/// Share of a centered front sound also sent to the center speaker
const CENTER_SHARE: f32 = 0.5;
/// Floor for the reported sound level
const MIN_SOUND_LEVEL_DB: f32 = -96.0;
/// Closer than this a sound is treated as inside the listener's head
const INSIDE_HEAD: f32 = 1e-3;

/// Where the mix is heard from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub origin: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            forward: [1.0, 0.0, 0.0],
            right: [0.0, -1.0, 0.0],
            up: [0.0, 0.0, 1.0],
        }
    }
}

/// Output layout and distance settings the spatializer needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialParams {
    pub has_rear: bool,
    pub has_center: bool,
    /// Distance at which a sound is entirely room
    pub dsp_mix_distance: f32,
}

/// Result of spatializing one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Target volumes per speaker (FL FR RL RR FC), 0 - 255
    pub volumes: [f32; SPEAKER_COUNT],
    /// Receding-half volumes for doppler sources; same as `volumes` otherwise
    pub shadow: [f32; SPEAKER_COUNT],
    pub dsp_mix: f32,
    pub dsp_face: f32,
    pub sound_level: f32,
    /// Direction to the sound in listener space (forward, right, up)
    pub direction: Vec3,
    pub hrtf_blend: f32,
}

fn to_db(volume: f32) -> f32 {
    if volume <= 0.0 {
        return MIN_SOUND_LEVEL_DB;
    }
    (20.0 * (volume / VOLUME_MAX).log10()).max(MIN_SOUND_LEVEL_DB)
}

/// Speaker weights for a unit direction in listener space
fn speaker_weights(lr: f32, fb: f32, params: &SpatialParams) -> [f32; SPEAKER_COUNT] {
    // Equal-power pan: left^2 + right^2 == 1
    let left = ((1.0 - lr) * 0.5).max(0.0).sqrt();
    let right = ((1.0 + lr) * 0.5).max(0.0).sqrt();

    let mut weights = [0.0; SPEAKER_COUNT];
    if params.has_rear {
        let front = ((1.0 + fb) * 0.5).max(0.0).sqrt();
        let rear = ((1.0 - fb) * 0.5).max(0.0).sqrt();
        weights[0] = left * front;
        weights[1] = right * front;
        weights[2] = left * rear;
        weights[3] = right * rear;
    } else {
        weights[0] = left;
        weights[1] = right;
    }
    if params.has_center {
        weights[4] = fb.max(0.0) * (1.0 - lr.abs()) * CENTER_SHARE;
    }
    weights
}

/// Compute the placement of `channel` as heard by `listener`
pub fn place(channel: &Channel, listener: &Listener, params: &SpatialParams) -> Placement {
    let master = channel.master_vol.clamp(0.0, VOLUME_MAX);
    let offset = vec_sub(channel.origin, listener.origin);
    let dist = vec_length(offset);
    let dir = vec_normalize(offset);
    let local = [
        vec_dot(dir, listener.forward),
        vec_dot(dir, listener.right),
        vec_dot(dir, listener.up),
    ];

    let dsp_mix = if params.dsp_mix_distance > 0.0 {
        (dist / params.dsp_mix_distance).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let facing = vec_normalize(channel.direction);
    let toward_listener = [-dir[0], -dir[1], -dir[2]];
    let dsp_face = if vec_length(facing) > 0.0 {
        ((1.0 - vec_dot(facing, toward_listener)) * 0.5).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let volumes = if channel.flags.omni {
        [master; SPEAKER_COUNT]
    } else {
        let gain = 1.0 / (1.0 + dist * channel.dist_mult.max(0.0));
        let weights = if dist < INSIDE_HEAD {
            speaker_weights(0.0, 1.0, params)
        } else {
            speaker_weights(local[1], local[0], params)
        };
        let mut volumes = [0.0; SPEAKER_COUNT];
        for (v, w) in volumes.iter_mut().zip(weights) {
            *v = (master * gain * w).clamp(0.0, VOLUME_MAX);
        }
        volumes
    };
    let (volumes, shadow) = if channel.flags.doppler {
        // Emitter heading toward the listener favors the approach half
        let approach = if vec_length(facing) > 0.0 {
            ((1.0 + vec_dot(facing, toward_listener)) * 0.5).clamp(0.0, 1.0)
        } else {
            0.5
        };
        (volumes.map(|v| v * approach), volumes.map(|v| v * (1.0 - approach)))
    } else {
        (volumes, volumes)
    };
    finish(channel, volumes, shadow, dsp_mix, dsp_face, local, dist)
}

fn finish(
    channel: &Channel,
    volumes: [f32; SPEAKER_COUNT],
    shadow: [f32; SPEAKER_COUNT],
    dsp_mix: f32,
    dsp_face: f32,
    local: Vec3,
    dist: f32,
) -> Placement {
    let loudest = volumes.iter().chain(shadow.iter()).fold(0.0f32, |a, &b| a.max(b));
    let (direction, hrtf_blend) = if channel.hrtf.position_locked {
        (channel.hrtf.direction, channel.hrtf.blend)
    } else {
        (local, (dist / HRTF_FULL_DISTANCE).clamp(0.0, 1.0))
    };
    Placement {
        volumes,
        shadow,
        dsp_mix,
        dsp_face,
        sound_level: to_db(loudest),
        direction,
        hrtf_blend,
    }
}

/// Spatialize `channel` and start its ramps toward the new targets
///
/// The first pass after a channel starts sets volumes without a ramp.
pub fn spatialize(channel: &mut Channel, listener: &Listener, params: &SpatialParams, frame_samples: usize) {
    let placement = place(channel, listener, params);
    let immediate = channel.flags.first_pass;
    channel
        .volumes
        .set_targets(&placement.volumes, &placement.shadow, frame_samples, immediate);
    channel.flags.first_pass = false;
    channel.dsp_mix = placement.dsp_mix;
    channel.dsp_face = placement.dsp_face;
    channel.sound_level = placement.sound_level;
    channel.hrtf.direction = placement.direction;
    channel.hrtf.blend = placement.hrtf_blend;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(has_rear: bool) -> SpatialParams {
        SpatialParams {
            has_rear,
            has_center: has_rear,
            dsp_mix_distance: 1000.0,
        }
    }

    fn channel_at(origin: Vec3) -> Channel {
        Channel {
            guid: 1,
            master_vol: 255.0,
            origin,
            ..Channel::default()
        }
    }

    #[test]
    fn test_sound_on_the_right_favors_right_speakers() {
        let listener = Listener::default();
        let ch = channel_at([0.0, -10.0, 0.0]);
        let p = place(&ch, &listener, &params(false));
        assert!(p.volumes[1] > 200.0);
        assert!(p.volumes[0] < 1.0);
        assert_eq!(p.volumes[2], 0.0);
        assert_eq!(p.volumes[3], 0.0);
    }

    #[test]
    fn test_centered_pan_is_equal_power() {
        let listener = Listener::default();
        let ch = channel_at([10.0, 0.0, 0.0]);
        let p = place(&ch, &listener, &params(false));
        assert!((p.volumes[0] - p.volumes[1]).abs() < 1e-3);
        let power = (p.volumes[0] / 255.0).powi(2) + (p.volumes[1] / 255.0).powi(2);
        assert!((power - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_sound_behind_uses_rear_speakers() {
        let listener = Listener::default();
        let ch = channel_at([-10.0, 0.0, 0.0]);
        let p = place(&ch, &listener, &params(true));
        assert!(p.volumes[2] > p.volumes[0]);
        assert!(p.volumes[3] > p.volumes[1]);
        assert_eq!(p.volumes[4], 0.0);
    }

    #[test]
    fn test_distance_attenuates() {
        let listener = Listener::default();
        let mut near = channel_at([1.0, 0.0, 0.0]);
        let mut far = channel_at([100.0, 0.0, 0.0]);
        near.dist_mult = 0.01;
        far.dist_mult = 0.01;
        let a = place(&near, &listener, &params(false));
        let b = place(&far, &listener, &params(false));
        assert!(b.volumes[0] < a.volumes[0]);
        assert!(b.sound_level < a.sound_level);
        assert!(b.dsp_mix > a.dsp_mix);
    }

    #[test]
    fn test_omni_is_full_everywhere() {
        let listener = Listener::default();
        let mut ch = channel_at([0.0, 50.0, 0.0]);
        ch.master_vol = 200.0;
        ch.dist_mult = 1.0;
        ch.flags.omni = true;
        let p = place(&ch, &listener, &params(true));
        assert_eq!(p.volumes, [200.0; SPEAKER_COUNT]);
    }

    #[test]
    fn test_doppler_splits_between_halves() {
        let listener = Listener::default();
        let mut ch = channel_at([10.0, 0.0, 0.0]);
        ch.flags.doppler = true;
        // Heading straight at the listener
        ch.direction = [-1.0, 0.0, 0.0];
        let p = place(&ch, &listener, &params(false));
        assert!(p.volumes[0] > 150.0);
        assert!(p.shadow[0] < 1.0);
        assert!(p.dsp_face < 1e-6);
    }

    #[test]
    fn test_first_pass_sets_volumes_without_ramp() {
        let listener = Listener::default();
        let mut ch = channel_at([10.0, 0.0, 0.0]);
        ch.flags.first_pass = true;
        spatialize(&mut ch, &listener, &params(false), 1020);
        assert!(ch.volumes.is_constant());
        assert!(!ch.flags.first_pass);

        ch.origin = [0.0, 10.0, 0.0];
        spatialize(&mut ch, &listener, &params(false), 1020);
        assert!(!ch.volumes.is_constant());
    }

    #[test]
    fn test_locked_hrtf_keeps_direction() {
        let listener = Listener::default();
        let mut ch = channel_at([10.0, 0.0, 0.0]);
        ch.hrtf.position_locked = true;
        ch.hrtf.direction = [0.0, 1.0, 0.0];
        ch.hrtf.blend = 0.25;
        spatialize(&mut ch, &listener, &params(false), 100);
        assert_eq!(ch.hrtf.direction, [0.0, 1.0, 0.0]);
        assert_eq!(ch.hrtf.blend, 0.25);
    }
}
