//! Paintbuffer mixing engine
//!
//! [`MixEngine`] owns the channel registry, the bus buffers and the output
//! ring, and paints audio in frames of at most [`PAINTBUFFER_SIZE`] sample
//! pairs. Each frame:
//!
//! 1. drain queued [`MixCommand`]s
//! 2. snapshot the active channels and spatialize them
//! 3. quash duplicates beyond `max_same_sounds` per source
//! 4. mix every ready channel into its buses (quashed and silent channels
//!    only advance)
//! 5. free channels whose mixer has finished, and one-shots that fell
//!    silent
//! 6. run the DSP hook per bus, sum into main, transfer to the device
//!
//! The whole pass is one `&mut self` call on the mixing thread. Nothing in
//! it waits for I/O: channels whose data is still loading sit the frame
//! out without advancing.

pub mod command;
pub mod device;
pub mod gc;
pub mod paint;
pub mod scale;
pub mod stats;

pub use command::{command_channel, MixCommand, MixController, StartParams, COMMAND_QUEUE_CAPACITY};
pub use device::OutputDevice;
pub use paint::{BusKind, DspStage, NoDsp, PaintBuffer, Route, BUS_COUNT};
pub use stats::{MixerStats, StatsSnapshot};

use std::sync::Arc;

use crate::channel::{Channel, ChannelFlags, ChannelInfo, ChannelList, ChannelRegistry, VOLUME_MAX};
use crate::config::MixConfig;
use crate::error::{SoundError, SoundResult};
use crate::source::{AudioSource, MetadataCache, MixerContext, SavedPosition, SourceCache};
use crate::spatial::{spatialize, Listener, SpatialParams};
use crate::types::{SamplePair, PAINTBUFFER_SIZE};
use crate::wavecache::{AsyncWaveCache, WaveLoader};

use paint::{apply_volumes_fixed, apply_volumes_generic, route};
use stats::FrameCounts;

struct MixSettings {
    output_rate: u32,
    /// 0 disables culling
    max_same_sounds: usize,
    skip_low_volume: bool,
    verify: bool,
    spatial: SpatialParams,
}

/// Per-channel working buffers, reused every frame
struct MixScratch {
    raw: Vec<SamplePair>,
    contrib: PaintBuffer,
    verify: PaintBuffer,
}

/// What happened to one channel in one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mixed {
    Dormant,
    NotReady,
    Quashed,
    Silent,
    Mixed,
}

#[derive(Debug, Clone, Copy)]
struct CullKey {
    source: usize,
    loudness: f32,
    pos: usize,
}

pub struct MixEngine {
    registry: ChannelRegistry,
    list: ChannelList,
    /// Per-frame result for each `list` entry
    outcomes: Vec<Mixed>,
    cull_order: Vec<CullKey>,
    buses: [PaintBuffer; BUS_COUNT],
    scratch: MixScratch,
    device: OutputDevice,
    dsp: Box<dyn DspStage>,
    listener: Listener,
    settings: MixSettings,
    ctx: MixerContext,
    commands: rtrb::Consumer<MixCommand>,
    stats: Arc<MixerStats>,
    painted_time: u64,
}

impl MixEngine {
    /// Engine and controller over one loader
    pub fn new(config: &MixConfig, loader: Arc<dyn WaveLoader>) -> (Self, MixController) {
        let wave_cache = Arc::new(AsyncWaveCache::new(loader.clone(), &config.stream));
        let metadata = Arc::new(MetadataCache::new(loader, config.stream.precache_max_bytes));
        let sources = Arc::new(SourceCache::new(metadata, &config.stream));
        let ctx = MixerContext::new(wave_cache, config);
        Self::with_context(config, ctx, sources)
    }

    /// Engine and controller over an existing wave cache and source cache
    pub fn with_context(config: &MixConfig, ctx: MixerContext, sources: Arc<SourceCache>) -> (Self, MixController) {
        let (producer, commands) = command_channel();
        let registry = ChannelRegistry::new(config.dynamic_channels, config.static_channels);
        let stats = Arc::new(MixerStats::new());
        let controller = MixController::new(producer, registry.guid_counter(), stats.clone(), sources);

        let surround = config.surround;
        let capacity = registry.capacity();
        let engine = Self {
            list: ChannelList::with_capacity(capacity),
            outcomes: Vec::with_capacity(capacity),
            cull_order: Vec::with_capacity(capacity),
            buses: BusKind::ALL.map(|kind| PaintBuffer::new(kind, surround)),
            scratch: MixScratch {
                raw: vec![SamplePair::ZERO; PAINTBUFFER_SIZE],
                contrib: PaintBuffer::new(BusKind::Main, surround),
                verify: PaintBuffer::new(BusKind::Main, surround),
            },
            device: OutputDevice::new(surround, config.device_frames, config.master_volume),
            dsp: Box::new(NoDsp),
            listener: Listener::default(),
            settings: MixSettings {
                output_rate: config.output_rate,
                max_same_sounds: config.max_same_sounds,
                skip_low_volume: config.skip_low_volume,
                verify: config.verify_mix,
                spatial: SpatialParams {
                    has_rear: surround.has_rear(),
                    has_center: surround.has_center(),
                    dsp_mix_distance: config.dsp_mix_distance,
                },
            },
            ctx,
            commands,
            stats,
            painted_time: 0,
            registry,
        };
        log::info!(
            "[MIX] engine ready: {} Hz, {:?}, {} channels, {:?} interpolation{}",
            config.output_rate,
            surround,
            capacity,
            config.interpolation,
            if config.verify_mix { ", verify mode" } else { "" }
        );
        (engine, controller)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Channel control
    // ────────────────────────────────────────────────────────────────────────

    /// Start `source` on a new channel right away; returns its guid
    pub fn start_sound(&mut self, source: Arc<AudioSource>, params: StartParams) -> SoundResult<u32> {
        let guid = self.registry.next_guid();
        self.start_with_guid(guid, source, params)?;
        Ok(guid)
    }

    fn start_with_guid(&mut self, guid: u32, source: Arc<AudioSource>, params: StartParams) -> SoundResult<usize> {
        let mut mixer = source.create_mixer(&self.ctx).map_err(|e| {
            MixerStats::bump(&self.stats.start_failures);
            log::warn!("[MIX] cannot start {}: {}", source.name(), e);
            e
        })?;

        let slot = if params.static_slot {
            self.registry.alloc_static(guid)
        } else {
            self.registry.alloc_dynamic(guid)
        };
        let Some(slot) = slot else {
            MixerStats::bump(&self.stats.start_failures);
            log::debug!("[MIX] no free channel for {}", source.name());
            return Err(SoundError::Skipped);
        };

        if params.start_sample > 0 {
            mixer.set_sample_start(params.start_sample);
        }
        if let Some(end) = params.end_sample {
            mixer.set_sample_end(end);
        }

        let ch = self.registry.channel_mut(slot);
        ch.flags = ChannelFlags {
            speaker: params.speaker,
            paused: params.start_paused,
            ..ChannelFlags::for_source(&source.flags())
        };
        ch.master_vol = params.volume.clamp(0.0, VOLUME_MAX);
        ch.pitch = params.pitch.max(0.0);
        ch.origin = params.origin;
        ch.direction = params.direction;
        ch.dist_mult = params.dist_mult;
        ch.mixer = Some(mixer);
        log::debug!("[MIX] start {} on channel {} (guid {})", source.name(), slot, guid);
        ch.source = Some(source);
        self.registry.activate(slot);
        Ok(slot)
    }

    /// Stop and free the channel playing `guid`
    pub fn stop_sound(&mut self, guid: u32) -> bool {
        match self.registry.find_by_guid(guid) {
            Some(index) => {
                self.registry.free(index);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        self.registry.clear();
    }

    fn channel_by_guid_mut(&mut self, guid: u32) -> Option<&mut Channel> {
        let index = self.registry.find_by_guid(guid)?;
        Some(self.registry.channel_mut(index))
    }

    pub fn channel_by_guid(&self, guid: u32) -> Option<&Channel> {
        self.registry.find_by_guid(guid).map(|i| self.registry.channel(i))
    }

    /// Detached playback position of `guid`, for save games
    pub fn saved_position(&self, guid: u32) -> Option<SavedPosition> {
        self.channel_by_guid(guid)?
            .mixer
            .as_ref()
            .map(|m| m.position_for_save())
    }

    pub fn restore_position(&mut self, guid: u32, saved: &SavedPosition) -> bool {
        match self.channel_by_guid_mut(guid).and_then(|ch| ch.mixer.as_mut()) {
            Some(mixer) => {
                mixer.set_position_from_saved(saved);
                true
            }
            None => false,
        }
    }

    /// Apply everything queued by the controller
    pub fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            self.apply_command(cmd);
        }
    }

    fn apply_command(&mut self, cmd: MixCommand) {
        match cmd {
            MixCommand::StartSound { guid, source, params } => {
                // Failures are already counted and logged
                let _ = self.start_with_guid(guid, source, params);
            }
            MixCommand::StopSound { guid } => {
                self.stop_sound(guid);
            }
            MixCommand::StopAll => self.stop_all(),
            MixCommand::SetVolume { guid, volume } => {
                if let Some(ch) = self.channel_by_guid_mut(guid) {
                    ch.master_vol = volume.clamp(0.0, VOLUME_MAX);
                }
            }
            MixCommand::SetPitch { guid, pitch } => {
                if let Some(ch) = self.channel_by_guid_mut(guid) {
                    ch.pitch = pitch.max(0.0);
                }
            }
            MixCommand::SetPaused { guid, paused } => {
                if let Some(ch) = self.channel_by_guid_mut(guid) {
                    ch.flags.paused = paused;
                }
            }
            MixCommand::SetOrigin { guid, origin } => {
                if let Some(ch) = self.channel_by_guid_mut(guid) {
                    ch.origin = origin;
                }
            }
            MixCommand::SetListener(listener) => self.listener = listener,
            MixCommand::SetMasterVolume(volume) => self.device.set_master_volume(volume),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Painting
    // ────────────────────────────────────────────────────────────────────────

    /// Paint until `painted_time` reaches `end_time`
    ///
    /// Frames never exceed the device ring, so a ring smaller than
    /// [`PAINTBUFFER_SIZE`] just means shorter frames.
    pub fn paint_channels(&mut self, end_time: u64) {
        let frame_limit = PAINTBUFFER_SIZE.min(self.device.capacity());
        while self.painted_time < end_time {
            let count = ((end_time - self.painted_time) as usize).min(frame_limit);
            self.paint_frame(count);
        }
    }

    /// Paint up to `frames` ahead, never overrunning unread device output
    ///
    /// Returns the frames painted.
    pub fn mix_ahead(&mut self, frames: usize) -> usize {
        let space = self
            .device
            .capacity()
            .saturating_sub(self.device.queued(self.painted_time));
        let frames = frames.min(space);
        self.paint_channels(self.painted_time + frames as u64);
        frames
    }

    fn paint_frame(&mut self, count: usize) {
        self.process_commands();
        for bus in &mut self.buses {
            bus.clear(count);
        }

        self.registry.get_active_channels(&mut self.list);
        for i in 0..self.list.count() {
            let ch = self.registry.channel_mut(self.list.get(i));
            if !ch.is_dormant() {
                spatialize(ch, &self.listener, &self.settings.spatial, count);
            }
        }
        cull_duplicates(
            &self.registry,
            &mut self.list,
            &mut self.cull_order,
            self.settings.max_same_sounds,
        );

        let mut counts = FrameCounts {
            active: self.list.count() as u32,
            ..FrameCounts::default()
        };
        self.outcomes.clear();
        for i in 0..self.list.count() {
            let quashed = self.list.is_quashed(i);
            let ch = self.registry.channel_mut(self.list.get(i));
            let outcome = mix_channel(
                ch,
                &mut self.scratch,
                &mut self.buses,
                &self.settings,
                &self.stats,
                quashed,
                count,
            );
            match outcome {
                Mixed::Mixed => counts.mixed += 1,
                Mixed::Quashed => counts.quashed += 1,
                Mixed::NotReady => counts.not_ready += 1,
                Mixed::Silent => counts.silent += 1,
                Mixed::Dormant => {}
            }
            self.outcomes.push(outcome);
        }

        for (i, &outcome) in self.outcomes.iter().enumerate() {
            let index = self.list.get(i);
            let ch = self.registry.channel_mut(index);
            let finished = match ch.mixer.as_mut() {
                Some(mixer) => !mixer.should_continue_mixing(),
                None => true,
            };
            // Looping and dry sounds stay alive at zero volume; one-shots go
            let inaudible = matches!(outcome, Mixed::Mixed | Mixed::Silent)
                && ch.volumes.is_silent()
                && !ch.flags.dry
                && !ch.source.as_ref().is_some_and(|s| s.is_looped());
            if finished || inaudible {
                log::trace!(
                    "[MIX] channel {} {}",
                    index,
                    if finished { "finished" } else { "inaudible, freed" }
                );
                self.registry.free(index);
                MixerStats::bump(&self.stats.finished_channels);
            }
        }

        for kind in &BusKind::ALL[1..] {
            self.dsp.process(*kind, &mut self.buses[kind.index()], count);
        }
        let (main, sends) = self.buses.split_at_mut(1);
        for bus in sends.iter() {
            main[0].add_from(bus, count);
        }
        self.device
            .transfer_paintbuffer(&main[0], self.painted_time, count);

        self.painted_time += count as u64;
        self.stats.publish_frame(counts, self.painted_time);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Accessors
    // ────────────────────────────────────────────────────────────────────────

    pub fn painted_time(&self) -> u64 {
        self.painted_time
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn set_listener(&mut self, listener: Listener) {
        self.listener = listener;
    }

    pub fn set_dsp(&mut self, dsp: Box<dyn DspStage>) {
        self.dsp = dsp;
    }

    pub fn device(&self) -> &OutputDevice {
        &self.device
    }

    /// Read painted frames out of the device ring
    pub fn read_output(&mut self, frames: usize, out: &mut Vec<i16>) -> usize {
        self.device.read_frames(self.painted_time, frames, out)
    }

    /// Active channels whose data is still loading
    pub fn channels_waiting(&mut self) -> usize {
        self.registry.get_active_channels(&mut self.list);
        (0..self.list.count())
            .filter(|&i| {
                self.registry
                    .channel_mut(self.list.get(i))
                    .mixer
                    .as_mut()
                    .is_some_and(|m| !m.is_ready_to_mix())
            })
            .count()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn dump_channel_info(&self) -> Vec<ChannelInfo> {
        self.registry.dump_channel_info()
    }

    pub fn stats(&self) -> &Arc<MixerStats> {
        &self.stats
    }

    pub fn wave_cache(&self) -> &Arc<AsyncWaveCache> {
        &self.ctx.cache
    }
}

/// Mark all but the loudest `max_same` channels of each source quashed
fn cull_duplicates(registry: &ChannelRegistry, list: &mut ChannelList, order: &mut Vec<CullKey>, max_same: usize) {
    if max_same == 0 {
        return;
    }
    order.clear();
    for pos in 0..list.count() {
        let ch = registry.channel(list.get(pos));
        if ch.is_dormant() {
            continue;
        }
        if let Some(source) = &ch.source {
            order.push(CullKey {
                source: Arc::as_ptr(source) as usize,
                loudness: ch.volumes.max_target(),
                pos,
            });
        }
    }
    order.sort_unstable_by(|a, b| {
        a.source
            .cmp(&b.source)
            .then(b.loudness.total_cmp(&a.loudness))
            .then(a.pos.cmp(&b.pos))
    });

    let mut run = 0;
    let mut current = None;
    for key in order.iter() {
        if current != Some(key.source) {
            current = Some(key.source);
            run = 0;
        }
        run += 1;
        if run > max_same {
            list.set_quashed(key.pos, true);
        }
    }
}

fn route_for(ch: &Channel) -> Route {
    if ch.flags.dry {
        Route::Dry
    } else if ch.flags.speaker {
        Route::Speaker
    } else {
        Route::spatial(ch.dsp_mix, ch.dsp_face)
    }
}

/// Mix or advance one channel for this frame
fn mix_channel(
    ch: &mut Channel,
    scratch: &mut MixScratch,
    buses: &mut [PaintBuffer; BUS_COUNT],
    settings: &MixSettings,
    stats: &MixerStats,
    quashed: bool,
    count: usize,
) -> Mixed {
    if ch.flags.paused {
        return Mixed::Dormant;
    }
    let Some(mixer) = ch.mixer.as_mut() else {
        return Mixed::Dormant;
    };
    if !mixer.is_ready_to_mix() {
        return Mixed::NotReady;
    }
    let (pitch, rate) = (ch.pitch, settings.output_rate);

    if quashed {
        let n = mixer.skip_samples(pitch, count, rate);
        ch.volumes.advance_by(n);
        ch.samples_emitted += n as u64;
        return Mixed::Quashed;
    }

    let silent = settings.skip_low_volume && ch.volumes.is_silent();
    if silent && !settings.verify {
        let n = mixer.skip_samples(pitch, count, rate);
        ch.volumes.advance_by(n);
        ch.samples_emitted += n as u64;
        return Mixed::Silent;
    }

    let n = mixer.mix_data_to_device(pitch, count, rate, &mut scratch.raw[..count]);
    ch.samples_emitted += n as u64;
    let raw = &scratch.raw[..n];
    let doppler = ch.flags.doppler;

    if silent {
        // Verify mode: the skip must not have dropped anything audible
        apply_volumes_generic(raw, &mut ch.volumes, doppler, &mut scratch.contrib);
        if !scratch.contrib.is_silent(n) {
            MixerStats::bump(&stats.verify_failures);
            log::error!("[MIX] low-volume skip would drop audible output (guid {})", ch.guid);
        }
        return Mixed::Silent;
    }

    if !doppler && ch.volumes.is_constant() {
        let volumes = ch.volumes.int_volumes();
        apply_volumes_fixed(raw, &volumes, &mut scratch.contrib);
        if settings.verify {
            let mut check = ch.volumes;
            apply_volumes_generic(raw, &mut check, false, &mut scratch.verify);
            if !scratch.contrib.same_as(&scratch.verify, n) {
                MixerStats::bump(&stats.verify_failures);
                log::error!("[MIX] fast path differs from generic path (guid {})", ch.guid);
            }
        }
        ch.volumes.advance_by(n);
    } else {
        apply_volumes_generic(raw, &mut ch.volumes, doppler, &mut scratch.contrib);
    }

    route(&scratch.contrib, buses, route_for(ch), n);
    Mixed::Mixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::test_support::{ramp_samples, wave_bytes};
    use crate::config::SurroundMode;
    use crate::wavecache::test_support::GatedLoader;
    use crate::wavecache::{wait_for, MemoryLoader};

    fn loader_with(files: &[(&str, Vec<i16>, Option<u32>)]) -> Arc<MemoryLoader> {
        let loader = Arc::new(MemoryLoader::new());
        for (name, samples, loop_start) in files {
            loader.insert(name, wave_bytes(samples, 1, 44100, None, *loop_start));
        }
        loader
    }

    fn new_engine(config: &MixConfig, loader: &Arc<MemoryLoader>) -> (MixEngine, MixController) {
        MixEngine::new(config, loader.clone())
    }

    fn wait_ready(engine: &mut MixEngine, guid: u32) {
        let index = engine.registry.find_by_guid(guid).unwrap();
        assert!(wait_for(|| {
            engine
                .registry
                .channel_mut(index)
                .mixer
                .as_mut()
                .is_some_and(|m| m.is_ready_to_mix())
        }));
    }

    #[test]
    fn test_looping_sound_plays_through_loop_point() {
        let rate = 44100u64;
        let config = MixConfig::default();
        let loader = loader_with(&[("loop.wav", ramp_samples(3 * rate as usize), Some(1000))]);
        let (mut engine, ctl) = new_engine(&config, &loader);

        let source = ctl.sources().find_or_create("loop.wav").unwrap();
        assert!(source.is_looped());
        let guid = engine.start_sound(source, StartParams::default()).unwrap();
        wait_ready(&mut engine, guid);

        engine.paint_channels(4 * rate);

        let ch = engine.channel_by_guid(guid).unwrap();
        assert_eq!(ch.mixer.as_ref().unwrap().sample_position() as u64, 1000 + rate);
        assert_eq!(ch.samples_emitted, 4 * rate);
        assert_eq!(engine.painted_time(), 4 * rate);
    }

    #[test]
    fn test_one_shot_is_freed_when_finished() {
        let config = MixConfig::default();
        let loader = loader_with(&[("shot.wav", vec![1000; 1500], None)]);
        let (mut engine, mut ctl) = new_engine(&config, &loader);
        let guid = ctl.start_sound("shot.wav", StartParams::default()).unwrap();

        engine.paint_channels(1020);
        assert!(engine.channel_by_guid(guid).is_some());
        engine.paint_channels(2040);
        assert!(engine.channel_by_guid(guid).is_none());
        assert_eq!(engine.registry().count_active(), 0);
        assert_eq!(engine.stats().snapshot().finished_channels, 1);
    }

    fn render(max_same: usize, volumes: &[f32]) -> (Vec<i16>, Vec<u32>, MixEngine) {
        let config = MixConfig {
            max_same_sounds: max_same,
            ..MixConfig::default()
        };
        let loader = loader_with(&[("beep.wav", ramp_samples(5000), None)]);
        let (mut engine, ctl) = new_engine(&config, &loader);
        let source = ctl.sources().find_or_create("@beep.wav").unwrap();
        let guids: Vec<u32> = volumes
            .iter()
            .map(|&volume| {
                let params = StartParams {
                    volume,
                    ..StartParams::default()
                };
                engine.start_sound(source.clone(), params).unwrap()
            })
            .collect();

        let mut out = Vec::new();
        for _ in 0..3 {
            engine.paint_channels(engine.painted_time() + 1000);
            engine.read_output(1000, &mut out);
        }
        (out, guids, engine)
    }

    #[test]
    fn test_quashed_channel_is_silent_but_keeps_pace() {
        let (quashed_out, guids, engine) = render(4, &[255.0, 255.0, 255.0, 255.0, 10.0]);
        let (reference_out, _, _) = render(4, &[255.0, 255.0, 255.0, 255.0]);
        assert_eq!(quashed_out, reference_out);

        let positions: Vec<u32> = guids
            .iter()
            .map(|&g| engine.channel_by_guid(g).unwrap().mixer.as_ref().unwrap().sample_position())
            .collect();
        assert!(positions.iter().all(|&p| p == 3000), "{positions:?}");
        assert_eq!(engine.stats().snapshot().quashed_channels, 1);
    }

    #[test]
    fn test_culling_keeps_loudest_per_source() {
        let (_, guids, engine) = render(2, &[50.0, 200.0, 100.0, 250.0]);
        let snapshot = engine.stats().snapshot();
        assert_eq!(snapshot.quashed_channels, 2);
        assert_eq!(snapshot.mixed_channels, 2);
        for g in guids {
            assert!(engine.channel_by_guid(g).is_some());
        }

        // Without a limit nothing is quashed
        let (_, _, engine) = render(0, &[50.0, 200.0, 100.0, 250.0]);
        assert_eq!(engine.stats().snapshot().quashed_channels, 0);
    }

    #[test]
    fn test_verify_mode_finds_no_mismatch() {
        let config = MixConfig {
            surround: SurroundMode::FiveOne,
            verify_mix: true,
            ..MixConfig::default()
        };
        let loader = loader_with(&[
            ("a.wav", ramp_samples(20000), Some(0)),
            ("b.wav", ramp_samples(3000).iter().map(|s| s.wrapping_mul(7)).collect(), Some(100)),
        ]);
        let (mut engine, mut ctl) = new_engine(&config, &loader);

        let still = ctl
            .start_sound(
                "a.wav",
                StartParams {
                    origin: [30.0, 5.0, 0.0],
                    dist_mult: 0.01,
                    ..StartParams::default()
                },
            )
            .unwrap();
        let moving = ctl
            .start_sound(
                "b.wav",
                StartParams {
                    pitch: 1.3,
                    ..StartParams::default()
                },
            )
            .unwrap();
        ctl.start_sound(
            "(b.wav",
            StartParams {
                origin: [-10.0, 0.0, 0.0],
                direction: [1.0, 0.0, 0.0],
                ..StartParams::default()
            },
        )
        .unwrap();
        let silent = StartParams {
            volume: 0.0,
            ..StartParams::default()
        };
        ctl.start_sound("#b.wav", silent).unwrap();
        engine.process_commands();
        for guid in [still, moving] {
            wait_ready(&mut engine, guid);
        }

        for frame in 0..30 {
            let angle = frame as f32 * 0.3;
            ctl.set_origin(moving, [20.0 * angle.cos(), 20.0 * angle.sin(), 0.0]);
            if frame == 10 {
                ctl.set_volume(still, 0.0);
            }
            engine.paint_channels(engine.painted_time() + PAINTBUFFER_SIZE as u64);
        }

        assert_eq!(engine.stats().verify_failures(), 0);
        assert!(engine.stats().snapshot().frames >= 30);
    }

    #[test]
    fn test_not_ready_channel_waits_without_advancing() {
        let config = MixConfig::default();
        let files = MemoryLoader::new();
        files.insert("slow.wav", wave_bytes(&ramp_samples(40000), 1, 44100, None, None));
        let headers = MemoryLoader::new();
        headers.insert("slow.wav", wave_bytes(&ramp_samples(40000), 1, 44100, None, None));

        let (gated, gate) = GatedLoader::new(files);
        let wave_cache = Arc::new(AsyncWaveCache::new(Arc::new(gated), &config.stream));
        let metadata = Arc::new(MetadataCache::new(Arc::new(headers), config.stream.precache_max_bytes));
        let sources = Arc::new(SourceCache::new(metadata, &config.stream));
        let ctx = MixerContext::new(wave_cache, &config);
        let (mut engine, mut ctl) = MixEngine::with_context(&config, ctx, sources);

        let guid = ctl.start_sound("slow.wav", StartParams::default()).unwrap();
        engine.paint_channels(3 * PAINTBUFFER_SIZE as u64);
        let ch = engine.channel_by_guid(guid).unwrap();
        assert_eq!(ch.samples_emitted, 0);
        assert_eq!(engine.stats().snapshot().not_ready_channels, 1);
        assert_eq!(engine.channels_waiting(), 1);

        gate.release(1);
        wait_ready(&mut engine, guid);
        engine.paint_channels(4 * PAINTBUFFER_SIZE as u64);
        assert_eq!(engine.channel_by_guid(guid).unwrap().samples_emitted, PAINTBUFFER_SIZE as u64);
        assert_eq!(engine.stats().snapshot().not_ready_channels, 0);
        assert_eq!(engine.channels_waiting(), 0);
    }

    #[test]
    fn test_constant_sound_reaches_device_across_wrap() {
        let config = MixConfig {
            device_frames: 1500,
            ..MixConfig::default()
        };
        let loader = loader_with(&[("dc.wav", vec![1000; 10000], None)]);
        let (mut engine, mut ctl) = new_engine(&config, &loader);
        ctl.start_sound("@dc.wav", StartParams::default()).unwrap();

        let mut out = Vec::new();
        assert_eq!(engine.mix_ahead(5000), 1500);
        assert_eq!(engine.read_output(1500, &mut out), 1500);
        assert_eq!(engine.mix_ahead(1000), 1000);
        assert_eq!(engine.read_output(1000, &mut out), 1000);
        // 1000 * 255 >> 8
        assert!(out.iter().all(|&s| s == 996), "{:?}", &out[..8]);
    }

    #[test]
    fn test_ring_smaller_than_frame_paints_short_frames() {
        let config = MixConfig {
            device_frames: 256,
            ..MixConfig::default()
        };
        let loader = loader_with(&[("dc.wav", vec![1000; 10000], None)]);
        let (mut engine, mut ctl) = new_engine(&config, &loader);
        ctl.start_sound("@dc.wav", StartParams::default()).unwrap();

        engine.paint_channels(1020);
        assert_eq!(engine.painted_time(), 1020);
        // 256 + 256 + 256 + 252
        assert_eq!(engine.stats().snapshot().frames, 4);

        // Painted past the reader, so there is no room ahead
        assert_eq!(engine.mix_ahead(1000), 0);
        let mut out = Vec::new();
        assert_eq!(engine.read_output(1000, &mut out), 256);
        assert!(out.iter().all(|&s| s == 996));

        let (mut engine, mut ctl) = new_engine(&config, &loader);
        ctl.start_sound("@dc.wav", StartParams::default()).unwrap();
        assert_eq!(engine.mix_ahead(1000), 256);
        assert_eq!(engine.stats().snapshot().frames, 1);
        out.clear();
        assert_eq!(engine.read_output(1000, &mut out), 256);
        assert!(out.iter().all(|&s| s == 996));
    }

    #[test]
    fn test_silent_one_shot_is_freed_but_loops_and_dry_stay() {
        let config = MixConfig::default();
        let loader = loader_with(&[
            ("shot.wav", ramp_samples(5000), None),
            ("loop.wav", ramp_samples(5000), Some(0)),
        ]);
        let (mut engine, mut ctl) = new_engine(&config, &loader);
        let silent = StartParams {
            volume: 0.0,
            ..StartParams::default()
        };
        let shot = ctl.start_sound("shot.wav", silent).unwrap();
        let looped = ctl.start_sound("loop.wav", silent).unwrap();
        let dry = ctl.start_sound("#shot.wav", silent).unwrap();
        let audible = ctl.start_sound("shot.wav", StartParams::default()).unwrap();
        engine.process_commands();
        for guid in [shot, looped, dry, audible] {
            wait_ready(&mut engine, guid);
        }

        engine.paint_channels(PAINTBUFFER_SIZE as u64);
        assert!(engine.channel_by_guid(shot).is_none());
        assert!(engine.channel_by_guid(looped).is_some());
        assert!(engine.channel_by_guid(dry).is_some());
        assert!(engine.channel_by_guid(audible).is_some());
        assert_eq!(engine.stats().snapshot().finished_channels, 1);

        // A one-shot faded to zero goes once its ramp lands
        ctl.set_volume(audible, 0.0);
        engine.paint_channels(2 * PAINTBUFFER_SIZE as u64);
        assert!(engine.channel_by_guid(audible).is_none());
        assert!(engine.channel_by_guid(looped).is_some());
    }

    #[test]
    fn test_commands_control_channels() {
        let config = MixConfig::default();
        let loader = loader_with(&[("a.wav", ramp_samples(50000), Some(0))]);
        let (mut engine, mut ctl) = new_engine(&config, &loader);

        let guid = ctl.start_sound("a.wav", StartParams::default()).unwrap();
        engine.process_commands();
        wait_ready(&mut engine, guid);

        ctl.set_paused(guid, true);
        engine.paint_channels(2040);
        assert_eq!(engine.channel_by_guid(guid).unwrap().samples_emitted, 0);

        ctl.set_paused(guid, false);
        ctl.set_pitch(guid, 2.0);
        engine.paint_channels(3060);
        let ch = engine.channel_by_guid(guid).unwrap();
        assert_eq!(ch.mixer.as_ref().unwrap().sample_position(), 2040);

        let saved = engine.saved_position(guid).unwrap();
        assert_eq!(saved.sample, 2040);
        assert_eq!(saved.byte_offset, 4080);

        assert!(ctl.stop_sound(guid));
        engine.process_commands();
        assert!(engine.channel_by_guid(guid).is_none());
    }

    #[test]
    fn test_failed_start_never_enters_registry() {
        let config = MixConfig::default();
        let loader = loader_with(&[]);
        let (_engine, mut ctl) = new_engine(&config, &loader);
        assert_eq!(
            ctl.start_sound("missing.wav", StartParams::default()),
            Err(SoundError::FileNotFound)
        );

        let config = MixConfig {
            dynamic_channels: 1,
            ..MixConfig::default()
        };
        let loader = loader_with(&[("a.wav", ramp_samples(100), None)]);
        let (mut small, ctl) = MixEngine::new(&config, loader);
        let source = ctl.sources().find_or_create("a.wav").unwrap();
        assert!(small.start_sound(source.clone(), StartParams::default()).is_ok());
        assert_eq!(
            small.start_sound(source.clone(), StartParams::default()),
            Err(SoundError::Skipped)
        );
        assert_eq!(small.registry().count_active(), 1);
        assert_eq!(source.mixer_refs(), 1);
    }
}
