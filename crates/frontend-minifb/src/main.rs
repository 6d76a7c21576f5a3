//! Famicom emulator frontend.
//!
//! Provides two execution modes:
//!
//! - **GUI mode** (default): Scaled window with audio, keyboard/gamepad input,
//!   quick save / quick load and hold-to-rewind.
//! - **Headless mode** (`--headless`): Runs a fixed number of frames, with an
//!   optional scripted rewind (`--rewind-at F --rewind-for K`), and prints a
//!   summary.
//!
//! While rewinding, each restored frame is presented with the audio it was
//! first played with, reversed.

use famicom_core::console::cartridge::ines_image;
use famicom_core::console::{Button, Console, NES_HEIGHT, NES_WIDTH};
use famicom_core::console::apu::SAMPLE_RATE;
use famicom_core::savestate::{self, state_path};
use famicom_core::{Direction, EmuContext, Machine, RewindConfig, RewindController, FRAMES_PER_SECOND};
use gilrs::{Gilrs, Event as GilrsEvent, EventType, Axis, Button as GilrsButton};
use log::{debug, error, info, warn};
use minifb::{Key, Window, WindowOptions, Scale, ScaleMode};
use std::collections::VecDeque;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Output gain applied to core samples
const AUDIO_VOLUME: f32 = 0.8;
/// Analog stick deadzone
const STICK_DEADZONE: f32 = 0.3;
/// Analog trigger deadzone
const TRIGGER_DEADZONE: f32 = 0.2;
/// Window title
const TITLE: &str = "Famicom Emulator";

type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

// ─── Audio ──────────────────────────────────────────────────────────────────

/// Mono source draining the per-frame sample queue; silence on underrun.
struct QueueSource {
    ring: SampleQueue,
}

impl Iterator for QueueSource {
    type Item = f32;
    fn next(&mut self) -> Option<f32> {
        if let Ok(mut ring) = self.ring.try_lock() {
            if let Some(s) = ring.pop_front() {
                return Some(s * AUDIO_VOLUME);
            }
        }
        Some(0.0)
    }
}

impl rodio::Source for QueueSource {
    fn current_frame_len(&self) -> Option<usize> { None }
    fn channels(&self) -> u16 { 1 }
    fn sample_rate(&self) -> u32 { SAMPLE_RATE }
    fn total_duration(&self) -> Option<Duration> { None }
}

fn setup_audio(ring: SampleQueue) -> Option<(rodio::OutputStream, rodio::OutputStreamHandle, rodio::Sink)> {
    match rodio::OutputStream::try_default() {
        Ok((stream, handle)) => {
            match rodio::Sink::try_new(&handle) {
                Ok(sink) => {
                    sink.append(QueueSource { ring });
                    Some((stream, handle, sink))
                }
                Err(e) => { warn!("audio sink: {}", e); None }
            }
        }
        Err(e) => { warn!("audio device: {}", e); None }
    }
}

/// Queue one frame of samples, dropping them if the device has fallen behind.
fn queue_samples(ring: &SampleQueue, samples: &[f32]) {
    if let Ok(mut ring) = ring.lock() {
        // Limit buffer to avoid latency buildup
        let max_buf = SAMPLE_RATE as usize / 5; // ~200ms
        if ring.len() < max_buf {
            ring.extend(samples.iter());
        }
    }
}

/// Audio for the frame just presented. A backwards frame replays the audio
/// it was first heard with, reversed, from the snapshot before it.
fn frame_audio(console: &mut Console, rewind: &RewindController, dir: Direction) -> Vec<f32> {
    match (dir, rewind.get_frame_len()) {
        (Direction::Backward, Some(ticks)) => {
            match Console::backward_audio(rewind.buffer().peek_newest(), ticks) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("Backward audio unavailable: {}", e);
                    Vec::new()
                }
            }
        }
        (Direction::Backward, None) => Vec::new(),
        (Direction::Forward, _) => console.take_audio(),
    }
}

// ─── Gamepad ────────────────────────────────────────────────────────────────

struct GamepadState {
    up: bool, down: bool, left: bool, right: bool,
    a: bool, b: bool, start: bool, select: bool,
    rewind: bool,
    left_stick_x: f32, left_stick_y: f32,
}

impl GamepadState {
    fn new() -> Self {
        GamepadState {
            up: false, down: false, left: false, right: false,
            a: false, b: false, start: false, select: false,
            rewind: false, left_stick_x: 0.0, left_stick_y: 0.0,
        }
    }
    fn eff_up(&self)    -> bool { self.up    || self.left_stick_y < -STICK_DEADZONE }
    fn eff_down(&self)  -> bool { self.down  || self.left_stick_y >  STICK_DEADZONE }
    fn eff_left(&self)  -> bool { self.left  || self.left_stick_x < -STICK_DEADZONE }
    fn eff_right(&self) -> bool { self.right || self.left_stick_x >  STICK_DEADZONE }
}

fn init_gamepad() -> Option<Gilrs> {
    match Gilrs::new() {
        Ok(gilrs) => {
            let mut found = false;
            for (id, gp) in gilrs.gamepads() {
                debug!("Gamepad: [{}] \"{}\" ({})", id, gp.name(), gp.os_name());
                found = true;
            }
            if !found { debug!("No gamepad (hot-plug supported)."); }
            Some(gilrs)
        }
        Err(e) => { warn!("gamepad: {}", e); None }
    }
}

fn poll_gamepad(gilrs: &mut Gilrs, state: &mut GamepadState) {
    while let Some(GilrsEvent { event, .. }) = gilrs.next_event() {
        match event {
            EventType::ButtonPressed(b, _)  => apply_button(state, b, true),
            EventType::ButtonReleased(b, _) => apply_button(state, b, false),
            EventType::AxisChanged(a, v, _) => apply_axis(state, a, v),
            EventType::Connected => {
                for (_, gp) in gilrs.gamepads() {
                    if gp.is_connected() { debug!("Gamepad connected: \"{}\"", gp.name()); }
                }
            }
            EventType::Disconnected => { debug!("Gamepad disconnected"); *state = GamepadState::new(); }
            _ => {}
        }
    }
}

fn apply_button(state: &mut GamepadState, btn: GilrsButton, pressed: bool) {
    match btn {
        GilrsButton::DPadUp    => state.up    = pressed,
        GilrsButton::DPadDown  => state.down  = pressed,
        GilrsButton::DPadLeft  => state.left  = pressed,
        GilrsButton::DPadRight => state.right = pressed,
        GilrsButton::South | GilrsButton::West => state.b = pressed,
        GilrsButton::East | GilrsButton::North => state.a = pressed,
        GilrsButton::Start  => state.start  = pressed,
        GilrsButton::Select => state.select = pressed,
        GilrsButton::LeftTrigger | GilrsButton::LeftTrigger2 => state.rewind = pressed,
        _ => {}
    }
}

fn apply_axis(state: &mut GamepadState, axis: Axis, value: f32) {
    match axis {
        Axis::LeftStickX  => state.left_stick_x = value,
        Axis::LeftStickY  => state.left_stick_y = value,
        Axis::DPadX => { state.left = value < -STICK_DEADZONE; state.right = value > STICK_DEADZONE; }
        Axis::DPadY => { state.up = value < -STICK_DEADZONE; state.down = value > STICK_DEADZONE; }
        Axis::LeftZ => {
            if value > TRIGGER_DEADZONE { state.rewind = true; }
            else if value < 0.05 { state.rewind = false; }
        }
        _ => {}
    }
}

// ─── Main ───────────────────────────────────────────────────────────────────

struct Options {
    rom_path: Option<String>,
    headless: bool,
    mute: bool,
    debug: bool,
    frames: usize,
    scale: usize,
    rewind_frames: usize,
    no_rewind: bool,
    state_path: Option<PathBuf>,
    rewind_at: Option<usize>,
    rewind_for: usize,
}

fn flag_value<T: std::str::FromStr>(args: &[String], name: &str) -> Option<T> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_options(args: &[String]) -> Options {
    // First non-flag argument that is not a flag's value
    let takes_value = ["--frames", "--scale", "--rewind-frames", "--state", "--rewind-at", "--rewind-for"];
    let mut rom_path = None;
    let mut i = 1;
    while i < args.len() {
        if takes_value.contains(&args[i].as_str()) {
            i += 2;
        } else if args[i].starts_with("--") {
            i += 1;
        } else {
            rom_path = Some(args[i].clone());
            break;
        }
    }

    Options {
        rom_path,
        headless: args.iter().any(|a| a == "--headless"),
        mute: args.iter().any(|a| a == "--mute"),
        debug: args.iter().any(|a| a == "--debug"),
        frames: flag_value(args, "--frames").unwrap_or(600),
        scale: flag_value::<usize>(args, "--scale").unwrap_or(3).clamp(1, 6),
        rewind_frames: flag_value(args, "--rewind-frames").unwrap_or(RewindConfig::default().capacity),
        no_rewind: args.iter().any(|a| a == "--no-rewind"),
        state_path: flag_value::<String>(args, "--state").map(PathBuf::from),
        rewind_at: flag_value(args, "--rewind-at"),
        rewind_for: flag_value(args, "--rewind-for").unwrap_or(60),
    }
}

fn print_usage(program: &str) {
    eprintln!("Famicom Emulator - Rust");
    eprintln!("Usage: {} [file.nes] [options]", program);
    eprintln!("       (no ROM runs the built-in demo cartridge)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --headless           Run without GUI");
    eprintln!("  --frames N           Run N frames (headless, default 600)");
    eprintln!("  --rewind-at F        Hold rewind from frame F (headless)");
    eprintln!("  --rewind-for K       Hold rewind for K frames (headless, default 60)");
    eprintln!("  --rewind-frames N    Rewind history length in frames (default 600)");
    eprintln!("  --no-rewind          Disable rewind recording");
    eprintln!("  --state PATH         Save slot file (default <rom>.state)");
    eprintln!("  --mute               Disable audio");
    eprintln!("  --scale N            Initial scale 1-6 (default 3)");
    eprintln!("  --debug              Verbose logging");
    eprintln!();
    eprintln!("GUI keys: Arrows=D-pad Z=B X=A Enter=Start RShift=Select");
    eprintln!("          Backspace=Rewind (hold) R=Toggle rewind F5=Save F8=Load M=Mute Esc=Quit");
    eprintln!("Gamepad:  Left shoulder=Rewind (hold)");
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage(&args[0]);
        std::process::exit(1);
    }
    let opts = parse_options(&args);

    let default_level = if opts.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let (image, rom_path) = match &opts.rom_path {
        Some(path) => match fs::read(path) {
            Ok(bytes) => (bytes, PathBuf::from(path)),
            Err(e) => {
                error!("{}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => {
            info!("No ROM given, running the demo cartridge");
            (ines_image(1, 2, 0, 1, true), PathBuf::from("demo.nes"))
        }
    };
    let mut console = match Console::from_ines(&image) {
        Ok(c) => c,
        Err(e) => {
            error!("{}: {}", rom_path.display(), e);
            std::process::exit(1);
        }
    };
    info!(
        "Loaded {} (mapper {}, {} KB PRG-RAM, config {})",
        rom_path.display(),
        console.cart.mapper.number(),
        console.cart.prg_ram.len() / 1024,
        console.config_id()
    );

    let state_file = opts.state_path.clone().unwrap_or_else(|| state_path(&rom_path));
    let mut rewind = RewindController::new(RewindConfig {
        capacity: opts.rewind_frames,
        enabled: !opts.no_rewind,
    });
    let mut ctx = EmuContext::new();
    ctx.rewind_enabled = !opts.no_rewind;

    if opts.headless {
        run_headless(&opts, &mut console, &mut rewind, &mut ctx, &state_file);
    } else {
        run_gui(&opts, &mut console, &mut rewind, &mut ctx, &state_file);
    }
}

// ─── GUI Mode ───────────────────────────────────────────────────────────────

fn run_gui(
    opts: &Options,
    console: &mut Console,
    rewind: &mut RewindController,
    ctx: &mut EmuContext,
    state_file: &Path,
) {
    let scale = opts.scale;
    let scaled_w = NES_WIDTH * scale;
    let scaled_h = NES_HEIGHT * scale;

    let mut window = match Window::new(
        TITLE, scaled_w, scaled_h,
        WindowOptions {
            scale: Scale::X1,
            scale_mode: ScaleMode::AspectRatioStretch,
            resize: true,
            ..Default::default()
        },
    ) {
        Ok(w) => w,
        Err(e) => { error!("window: {}", e); return; }
    };
    window.set_target_fps(FRAMES_PER_SECOND as usize);

    let audio_ring: SampleQueue = Arc::new(Mutex::new(VecDeque::with_capacity(16384)));
    let mut muted = opts.mute;
    let mut _audio = if !muted { setup_audio(audio_ring.clone()) } else { None };

    let mut gilrs = init_gamepad();
    let mut gp = GamepadState::new();
    let mut frame_count: u64 = 0;
    let mut backward_frames: u64 = 0;
    let start_time = Instant::now();
    let mut last_fps_time = Instant::now();
    let mut fps_frames: u64 = 0;
    let mut scaled_buf = vec![0u32; scaled_w * scaled_h];
    let mut prev_m = false;
    let mut prev_r = false;
    let mut prev_f5 = false;
    let mut prev_f8 = false;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if let Some(ref mut g) = gilrs { poll_gamepad(g, &mut gp); }

        // Mute (M)
        let m = window.is_key_down(Key::M);
        if m && !prev_m {
            muted = !muted;
            if muted {
                _audio = None;
                if let Ok(mut ring) = audio_ring.lock() { ring.clear(); }
            } else {
                _audio = setup_audio(audio_ring.clone());
            }
        }
        prev_m = m;

        // Rewind toggle (R)
        let r = window.is_key_down(Key::R);
        if r && !prev_r {
            ctx.rewind_enabled = !ctx.rewind_enabled;
            info!("Rewind {}", if ctx.rewind_enabled { "on" } else { "off" });
        }
        prev_r = r;

        // Quick save (F5)
        let f5 = window.is_key_down(Key::F5);
        if f5 && !prev_f5 {
            if let Err(e) = savestate::save_state(console, state_file) {
                error!("Save failed: {}", e);
            }
        }
        prev_f5 = f5;

        // Quick load (F8)
        let f8 = window.is_key_down(Key::F8);
        if f8 && !prev_f8 {
            if let Err(e) = savestate::load_state(console, state_file) {
                error!("Load failed: {}", e);
            }
        }
        prev_f8 = f8;

        // Input
        console.set_button(Button::Up,     window.is_key_down(Key::Up)     || gp.eff_up());
        console.set_button(Button::Down,   window.is_key_down(Key::Down)   || gp.eff_down());
        console.set_button(Button::Left,   window.is_key_down(Key::Left)   || gp.eff_left());
        console.set_button(Button::Right,  window.is_key_down(Key::Right)  || gp.eff_right());
        console.set_button(Button::A,      window.is_key_down(Key::X)      || gp.a);
        console.set_button(Button::B,      window.is_key_down(Key::Z)      || gp.b);
        console.set_button(Button::Start,  window.is_key_down(Key::Enter)  || gp.start);
        console.set_button(Button::Select, window.is_key_down(Key::RightShift) || gp.select);
        let rewind_held = window.is_key_down(Key::Backspace) || gp.rewind;

        let dir = match rewind.handle_rewind(console, ctx, rewind_held) {
            Ok(dir) => dir,
            Err(e) => { warn!("Rewind: {}", e); Direction::Forward }
        };
        if dir == Direction::Forward {
            let ticks = console.run_frame();
            if let Err(e) = rewind.frame_completed(console, ctx, ticks) {
                warn!("Rewind record: {}", e);
            }
        } else {
            backward_frames += 1;
        }
        frame_count += 1;
        fps_frames += 1;

        let samples = frame_audio(console, rewind, dir);
        if !muted {
            queue_samples(&audio_ring, &samples);
        }

        // Render
        let pixels = console.framebuffer_u32();
        let (win_w, win_h) = (scaled_w, scaled_h);
        let cur_scale = win_w / NES_WIDTH;
        for y in 0..NES_HEIGHT {
            for x in 0..NES_WIDTH {
                let c = pixels[y * NES_WIDTH + x];
                for sy in 0..cur_scale {
                    let base = (y * cur_scale + sy) * win_w + x * cur_scale;
                    scaled_buf[base..base + cur_scale].fill(c);
                }
            }
        }
        if let Err(e) = window.update_with_buffer(&scaled_buf, win_w, win_h) {
            error!("update: {}", e);
            break;
        }

        if last_fps_time.elapsed() >= Duration::from_secs(2) {
            let fps = fps_frames as f64 / last_fps_time.elapsed().as_secs_f64();
            let history = rewind.history_len() as f64 / FRAMES_PER_SECOND as f64;
            let rw = if ctx.is_backwards_frame { " << REWIND" } else { "" };
            let ms = if muted { " [MUTE]" } else { "" };
            window.set_title(&format!("{} - {:.0} FPS  history {:.1}s{}{}", TITLE, fps, history, rw, ms));
            fps_frames = 0;
            last_fps_time = Instant::now();
        }
    }
    let e = start_time.elapsed().as_secs_f64();
    debug!(
        "{} frames ({} backward) in {:.1}s ({:.1} FPS), {} cycles",
        frame_count, backward_frames, e, frame_count as f64 / e, console.cpu.cycles
    );
}

// ─── Headless Mode ──────────────────────────────────────────────────────────

fn run_headless(
    opts: &Options,
    console: &mut Console,
    rewind: &mut RewindController,
    ctx: &mut EmuContext,
    state_file: &Path,
) {
    let rewind_window = opts.rewind_at.map(|f| f..f + opts.rewind_for);
    if let Some(w) = &rewind_window {
        info!("Rewind held for frames {}..{}", w.start, w.end);
    }
    info!("Running {} frames...", opts.frames);

    let mut forward = 0usize;
    let mut backward = 0usize;
    let mut samples = 0usize;
    for frame in 0..opts.frames {
        let held = rewind_window.as_ref().map_or(false, |w| w.contains(&frame));
        // Walk right while not rewinding so history has something to show
        console.set_button(Button::Right, frame % 120 < 60);
        console.set_button(Button::Down, frame % 240 < 30);

        let dir = match rewind.step(console, ctx, held) {
            Ok(dir) => dir,
            Err(e) => { error!("frame {}: {}", frame + 1, e); break; }
        };
        let audio = frame_audio(console, rewind, dir);
        samples += audio.len();
        match dir {
            Direction::Forward => forward += 1,
            Direction::Backward => backward += 1,
        }
        if dir == Direction::Backward {
            debug!(
                "  Frame {:4}: backward, {} ticks, console at frame {}, history {}",
                frame + 1,
                rewind.get_frame_len().unwrap_or(0),
                console.frame(),
                rewind.history_len()
            );
        }
    }

    println!("Frames: {} forward, {} backward", forward, backward);
    println!("Console frame: {}  cycles: {}", console.frame(), console.cpu.cycles);
    println!(
        "History: {} frames ({} KB)",
        rewind.history_len(),
        rewind.buffer().memory_usage() / 1024
    );
    println!("Audio samples: {}", samples);

    if opts.state_path.is_some() {
        match savestate::save_state(console, state_file) {
            Ok(()) => println!("State saved to {}", state_file.display()),
            Err(e) => error!("Save failed: {}", e),
        }
    }
}
