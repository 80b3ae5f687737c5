mod sink;

use std::{
    io::{self, BufRead},
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use cauldron_core::{
    effect::{SineWaveEffect, SineWaveParams},
    frame::lock_frame,
    Activity, AudioClip, Cauldron, CauldronConfig, CauldronControl, CauldronError, Effect,
    FrameBuffer, InMemorySource, PacedSink,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const CLIP_SAMPLE_RATE: u32 = 22_050;

fn main() -> cauldron_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CauldronConfig::load(path)?,
        None => CauldronConfig::default(),
    };

    match cli.command {
        Commands::Run {
            target,
            explode_every,
            duration,
        } => run_cauldron(&config, &target, explode_every, duration),
        Commands::Sine {
            target,
            seconds,
            wave_length,
            oscillation_ms,
        } => run_sine(&config, &target, seconds, wave_length, oscillation_ms),
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn run_cauldron(
    config: &CauldronConfig,
    target: &str,
    explode_every: Option<u64>,
    duration: Option<u64>,
) -> cauldron_core::Result<()> {
    let frames = sink::parse_target(target)?;
    let cauldron = Cauldron::new(
        config,
        frames,
        &synthesized_sounds(config)?,
        Arc::new(PacedSink::realtime()),
    )?;
    cauldron.start()?;

    if explode_every.is_none() && duration.is_none() {
        interactive(&cauldron)?;
    } else {
        timed(&cauldron, explode_every, duration)?;
    }
    cauldron.stop()
}

/// Explodes on a fixed schedule until `duration` seconds have passed.
fn timed(
    cauldron: &Cauldron,
    explode_every: Option<u64>,
    duration: Option<u64>,
) -> cauldron_core::Result<()> {
    let started = Instant::now();
    let deadline = duration.map(|secs| started + Duration::from_secs(secs));
    let interval = explode_every.map(Duration::from_secs);
    let mut next_explosion = interval.map(|interval| started + interval);

    loop {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            return Ok(());
        }
        if let (Some(at), Some(interval)) = (next_explosion, interval) {
            if now >= at {
                cauldron.cause_explosion()?;
                tracing::info!(color = cauldron.color_index(), "scheduled explosion");
                next_explosion = Some(at + interval);
            }
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Reads control commands from stdin until `quit` or end of input.
fn interactive(cauldron: &Cauldron) -> cauldron_core::Result<()> {
    tracing::info!("commands: start, stop, explode, status, quit");
    for line in io::stdin().lock().lines() {
        let line = line?;
        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            "status" => {
                let snapshot = cauldron.snapshot()?;
                println!(
                    "state={:?} playing={} color={} brightness={:.2}",
                    cauldron.state(),
                    cauldron.is_playing(),
                    cauldron.color_index(),
                    snapshot.brightness
                );
            }
            line => match Command::parse(line) {
                Some(command) => {
                    if let Err(err) = control(cauldron, command) {
                        tracing::warn!(?command, error = %err, "command failed");
                    }
                }
                None => tracing::warn!(
                    command = line,
                    "unknown command, expected start, stop, explode, status or quit"
                ),
            },
        }
    }
    Ok(())
}

/// Control commands accepted on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Explode,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "explode" => Some(Self::Explode),
            _ => None,
        }
    }
}

fn control(cauldron: &dyn CauldronControl, command: Command) -> cauldron_core::Result<()> {
    match command {
        Command::Start => cauldron.start(),
        Command::Stop => cauldron.stop(),
        Command::Explode => cauldron.cause_explosion(),
    }
}

/// Registers generated stand-ins for the configured sound files.
fn synthesized_sounds(config: &CauldronConfig) -> cauldron_core::Result<InMemorySource> {
    let bubbling = AudioClip::tone(180.0, Duration::from_secs(2), CLIP_SAMPLE_RATE)?;
    let explosion = AudioClip::burst(Duration::from_millis(1200), CLIP_SAMPLE_RATE, 0x0b00)?;
    tracing::debug!(
        bubbling = %config.sounds.bubbling.display(),
        explosion = %config.sounds.explosion.display(),
        "using synthesized sounds"
    );
    Ok(InMemorySource::new()
        .with_clip(&config.sounds.bubbling, bubbling)
        .with_clip(&config.sounds.explosion, explosion))
}

/// Plays a two-color sine wave from the first palette entry.
fn run_sine(
    config: &CauldronConfig,
    target: &str,
    seconds: u64,
    wave_length: f32,
    oscillation_ms: Option<u64>,
) -> cauldron_core::Result<()> {
    let colors = config
        .palette
        .first()
        .ok_or_else(|| CauldronError::construction("palette is empty"))?;
    let mut params = SineWaveParams::new(colors.base, colors.bubble)
        .with_wave_length(wave_length)
        .with_frame_period(config.frame_period());
    if let Some(ms) = oscillation_ms {
        params = params.with_oscillation(Duration::from_millis(ms));
    }
    let effect = Effect::from(SineWaveEffect::new(params)?).into_shared();

    let mut frame = FrameBuffer::new(config.num_pixels, sink::parse_target(target)?)?;
    frame.set_brightness(config.brightness);
    let frame = frame.into_shared();

    let activity = Activity::for_effect("sine", effect, frame.clone())?;
    let handle = activity.start_loop()?;
    tracing::info!(seconds, wave_length, "playing sine wave");
    thread::sleep(Duration::from_secs(seconds));
    handle.stop_and_wait()?;

    let mut frame = lock_frame(&frame)?;
    frame.blank();
    frame.flush()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Bubbling cauldron LED strip controller", long_about = None)]
struct Cli {
    /// JSON configuration file. Built-in defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the cauldron, controlled from stdin or on a timer.
    Run {
        /// Where frames go: `log` or `udp://host[:port]`.
        #[arg(short, long, default_value = "log")]
        target: String,
        /// Cause an explosion every N seconds.
        #[arg(long)]
        explode_every: Option<u64>,
        /// Stop after N seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Play a sine wave in the first palette colors.
    Sine {
        #[arg(short, long, default_value = "log")]
        target: String,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        #[arg(long, default_value_t = 1.0)]
        wave_length: f32,
        /// Amplitude cycle length in milliseconds.
        #[arg(long)]
        oscillation_ms: Option<u64>,
    },
    /// Print the effective configuration as JSON.
    Config,
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl CauldronControl for Recorder {
        fn start(&self) -> cauldron_core::Result<()> {
            self.0.lock().unwrap().push("start");
            Ok(())
        }

        fn stop(&self) -> cauldron_core::Result<()> {
            self.0.lock().unwrap().push("stop");
            Ok(())
        }

        fn cause_explosion(&self) -> cauldron_core::Result<()> {
            self.0.lock().unwrap().push("explode");
            Err(CauldronError::NotRunning)
        }

        fn is_playing(&self) -> bool {
            false
        }
    }

    #[test]
    fn unknown_commands_are_not_parsed() {
        assert_eq!(Command::parse("explode"), Some(Command::Explode));
        assert_eq!(Command::parse("dance"), None);
        assert_eq!(Command::parse("Start"), None);
    }

    #[test]
    fn commands_reach_the_control_surface() {
        let recorder = Recorder::default();
        control(&recorder, Command::Start).unwrap();
        control(&recorder, Command::Stop).unwrap();
        assert!(matches!(
            control(&recorder, Command::Explode),
            Err(CauldronError::NotRunning)
        ));
        assert_eq!(*recorder.0.lock().unwrap(), ["start", "stop", "explode"]);
    }
}
