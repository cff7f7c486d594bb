//! mix-render - Offline mixdown through the real-time engine
//!
//! Plays every input at once from the listener position and writes what
//! the output device would have received to a wave file.
//!
//! ```text
//! mix-render <out.wav> <seconds> <sound>...
//! ```
//!
//! Sounds are named relative to the current directory and may carry the
//! usual name prefixes (`*` stream, `#` dry, `(` doppler, `@` omni).
//! Mixer settings come from `mix.yaml` in the user config directory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use snd_core::config::{default_config_path, load_config};
use snd_core::{FsLoader, MixConfig, MixEngine, StartParams};

/// Frames painted per pass
const RENDER_CHUNK: usize = 4096;

/// How long to wait for sounds to load before rendering anyway
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("usage: mix-render <out.wav> <seconds> <sound>...");
    }
    let out_path = &args[0];
    let seconds: f64 = args[1]
        .parse()
        .with_context(|| format!("Invalid duration: {}", args[1]))?;

    let config: MixConfig = load_config(&default_config_path("mix.yaml"));
    let loader = Arc::new(FsLoader::new(std::env::current_dir().context("No current directory")?));
    let (mut engine, mut controller) = MixEngine::new(&config, loader);

    for name in &args[2..] {
        let guid = controller
            .start_sound(name, StartParams::default())
            .map_err(|e| anyhow::anyhow!("Cannot start {}: {}", name, e))?;
        log::info!("mix-render: {} -> guid {}", name, guid);
    }
    engine.process_commands();

    let deadline = Instant::now() + LOAD_TIMEOUT;
    while engine.channels_waiting() > 0 {
        if Instant::now() > deadline {
            log::warn!("mix-render: {} sounds still loading, rendering anyway", engine.channels_waiting());
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    let spec = hound::WavSpec {
        channels: engine.device().channels() as u16,
        sample_rate: config.output_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(out_path, spec).with_context(|| format!("Failed to create {}", out_path))?;

    let total = (seconds * config.output_rate as f64).round() as usize;
    let mut rendered = 0;
    let mut buf = Vec::with_capacity(RENDER_CHUNK * spec.channels as usize);
    while rendered < total {
        let painted = engine.mix_ahead((total - rendered).min(RENDER_CHUNK));
        buf.clear();
        engine.read_output(painted, &mut buf);
        for &sample in &buf {
            writer.write_sample(sample)?;
        }
        rendered += painted;
    }
    writer.finalize().context("Failed to finalize output")?;

    for info in engine.dump_channel_info() {
        log::info!(
            "mix-render: channel {} {} at sample {} ({} emitted, {:.1} dB)",
            info.index,
            info.source,
            info.position,
            info.samples_emitted,
            info.sound_level
        );
    }
    let stats = engine.stats().snapshot();
    log::info!(
        "mix-render: wrote {} frames to {} ({} frames painted, {} channels finished)",
        rendered,
        out_path,
        stats.painted_time,
        stats.finished_channels
    );
    engine.wave_cache().spew_memory_usage();
    Ok(())
}
