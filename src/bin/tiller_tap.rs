// Tiller Tap CLI
// Feeds a synthetic gamepad through the pipeline and prints control state

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use tiller_core::{
    Diagnostic, DeviceTemplate, FourCC, InputEngine, UpdateMask, UpdateType,
};

const GPAD: FourCC = FourCC::new(*b"GPAD");

/// Pipeline inspection tool: synthesizes input events and taps the
/// resulting device state each tick.
#[derive(Parser, Debug)]
#[command(name = "tiller-tap")]
#[command(about = "Feed synthetic input events through the tiller pipeline", long_about = None)]
struct Args {
    /// Number of ticks to run
    #[arg(short, long, default_value_t = 60)]
    ticks: u32,

    /// Tick rate in hertz
    #[arg(short, long, default_value_t = 30)]
    rate: u32,

    /// Device template TOML file (defaults to a built-in gamepad)
    #[arg(long, value_name = "TEMPLATE")]
    template: Option<PathBuf>,

    /// Also run a fixed update each tick
    #[arg(long)]
    fixed: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn builtin_gamepad() -> DeviceTemplate {
    DeviceTemplate::new("Gamepad", GPAD, 12)
        .with_button("buttonSouth", 0, 0)
        .with_stick("leftStick", 4)
}

fn synthetic_state(step: u32, size: usize) -> Vec<u8> {
    let phase = step as f32 * 0.1;
    let mut state = vec![0u8; size];
    // Press the button on every fourth step, sweep the stick in a circle.
    state[0] = u8::from(step % 4 == 0);
    if size >= 8 {
        state[4..8].copy_from_slice(&phase.sin().to_le_bytes());
    }
    if size >= 12 {
        state[8..12].copy_from_slice(&phase.cos().to_le_bytes());
    }
    state
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let template = match &args.template {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            DeviceTemplate::from_toml(&text)?
        }
        None => builtin_gamepad(),
    };
    let format = template.format;
    let state_size = template.state_size_in_bytes as usize;
    let template_name = template.name.clone();

    let mask = if args.fixed {
        UpdateMask::DEFAULT
    } else {
        UpdateMask::NONE.with(UpdateType::Dynamic)
    };
    let mut engine = InputEngine::new(mask);
    engine.register_template(template)?;
    let pad = engine.add_device(&template_name)?;

    // The engine already logs each diagnostic; the observer just counts.
    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = dropped.clone();
    engine.add_observer(move |_: &Diagnostic| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let sink = engine.event_sink();
    let tick = Duration::from_secs_f64(1.0 / args.rate.max(1) as f64);
    let producer_ticks = args.ticks;
    let producer = thread::spawn(move || {
        for step in 0..producer_ticks {
            let time = step as f64 * tick.as_secs_f64();
            if let Err(err) = sink.queue_state_event(pad, time, format, &synthetic_state(step, state_size)) {
                log::error!("failed to queue event: {err}");
                return;
            }
            thread::sleep(tick);
        }
    });

    for _ in 0..args.ticks {
        thread::sleep(tick);
        engine.update(UpdateType::Dynamic)?;
        if args.fixed {
            engine.update(UpdateType::Fixed)?;
        }

        let south = engine.read_button(pad, "buttonSouth").unwrap_or(false);
        let x = engine.read_axis(pad, "leftStick/x").unwrap_or(0.0);
        let y = engine.read_axis(pad, "leftStick/y").unwrap_or(0.0);
        println!("south={south:5} stick=({x:+.2}, {y:+.2})");
    }

    producer.join().ok();
    log::info!(
        "done: {} diagnostics over {} ticks",
        dropped.load(Ordering::Relaxed),
        args.ticks
    );
    Ok(())
}
