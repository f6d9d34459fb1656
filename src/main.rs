//! Offline sound-localization demo.
//!
//! A producer thread synthesizes stereo blocks for a tone that moves from the
//! left microphone to the right one, pushes them through the bounded block
//! queue, and the spiking network estimates the direction block by block.

use std::sync::atomic::Ordering;
use std::thread;

use audio::{
    angle_to_xy, block_duration, block_queue, ild_to_angle, Block, Calibration, Direction,
    FeatureSource, BLOCK_SIZE, SAMPLE_RATE,
};
use simulator::NetworkBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transcoder::{EncoderChoice, EnsembleSpec};

const DURATION: f64 = 10.0;
const SEED: u64 = 42;
const TONE_HZ: f64 = 440.0;
const THRESHOLD_DB: f64 = 3.0;

/// Left/right amplitudes over the run: loud-left, centered, loud-right.
/// The ratios are chosen so the calibrated ILD reads roughly +20, 0 and
/// -20 dB per segment.
fn segment_amplitudes(progress: f64) -> (f64, f64) {
    let right = 0.05;
    let ratio_db = if progress < 1.0 / 3.0 {
        15.0
    } else if progress < 2.0 / 3.0 {
        -5.0
    } else {
        -25.0
    };
    (right * 10f64.powf(ratio_db / 20.0), right)
}

fn synthesize_blocks(sender: crossbeam_channel::Sender<Block>, n_blocks: usize) {
    let mut phase = 0.0f64;
    let step = TONE_HZ / SAMPLE_RATE as f64 * std::f64::consts::TAU;
    for i in 0..n_blocks {
        let (left_amp, right_amp) = segment_amplitudes(i as f64 / n_blocks as f64);
        let mut left = Vec::with_capacity(BLOCK_SIZE);
        let mut right = Vec::with_capacity(BLOCK_SIZE);
        for _ in 0..BLOCK_SIZE {
            let sample = phase.sin();
            left.push((left_amp * sample) as f32);
            right.push((right_amp * sample) as f32);
            phase += step;
        }
        if sender.send(Block { left, right }).is_err() {
            return;
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let dt = block_duration();
    let n_blocks = (DURATION / dt).round() as usize;

    let (tx, rx) = block_queue(32);
    let producer = thread::spawn(move || synthesize_blocks(tx, n_blocks));

    let source = FeatureSource::new(rx, Calibration::default());
    let gaps = source.gap_counter();

    let mut builder = NetworkBuilder::new(dt, SEED);
    let feature = builder.source("ild_input", 1, source);
    let ild_spikes = builder.ensemble(EnsembleSpec::new("ild_spikes", 200).radius(40.0));
    let on = builder.ensemble(
        EnsembleSpec::new("on_neurons", 100)
            .radius(40.0)
            .encoders(EncoderChoice::Positive)
            .intercepts(0.05, 0.9),
    );
    let off = builder.ensemble(
        EnsembleSpec::new("off_neurons", 100)
            .radius(40.0)
            .encoders(EncoderChoice::Negative)
            .intercepts(0.05, 0.9),
    );
    let angle = builder.ensemble(EnsembleSpec::new("angle_decoder", 150).radius(40.0));
    let angle_out = builder.sink("angle_output", 1);
    let compass = builder.transform("compass", 1, 2, |x| angle_to_xy(x[0]).to_vec());

    builder.connect(feature, ild_spikes, 0.01);
    builder.connect(ild_spikes, on, 0.01);
    builder.connect(ild_spikes, off, 0.01);
    builder.connect(on, angle, 0.01);
    builder.connect(off, angle, 0.01);
    builder.connect_fn(angle, angle_out, 0.05, |x| vec![ild_to_angle(x[0])]);
    builder.connect(angle_out, compass, 0.05);

    let p_feature = builder.probe(feature, None);
    let p_spikes = builder.probe_spikes(ild_spikes);
    let p_angle_raw = builder.probe(angle, None);
    let p_angle = builder.probe(angle_out, Some(0.05));
    let p_compass = builder.probe(compass, Some(0.05));

    let mut sim = match builder.build() {
        Ok(sim) => sim,
        Err(err) => {
            eprintln!("network build failed: {err}");
            std::process::exit(1);
        }
    };

    info!(
        sample_rate = SAMPLE_RATE,
        block_size = BLOCK_SIZE,
        dt,
        n_blocks,
        "starting offline run"
    );
    sim.run_for(DURATION);
    producer.join().expect("producer thread panicked");

    let features = sim.probe(p_feature);
    let angles = sim.probe(p_angle);

    let ild_values: Vec<f64> = features.iter().map(|(_, v)| v[0]).collect();
    let angle_values: Vec<f64> = angles.iter().map(|(_, v)| v[0]).collect();

    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len().max(1) as f64;
    let mean_ild = mean(&ild_values);
    let std_ild = (mean(
        &ild_values
            .iter()
            .map(|v| (v - mean_ild) * (v - mean_ild))
            .collect::<Vec<_>>(),
    ))
    .sqrt();

    let mut counts = (0usize, 0usize, 0usize);
    for &ild in &ild_values {
        match Direction::classify(ild, THRESHOLD_DB) {
            Direction::Left => counts.0 += 1,
            Direction::Center => counts.1 += 1,
            Direction::Right => counts.2 += 1,
        }
    }

    let spike_history = sim.probe(p_spikes);
    let total_spikes: f64 = spike_history
        .iter()
        .map(|(_, spikes)| spikes.iter().sum::<f64>())
        .sum();
    let mean_rate = total_spikes / (200.0 * DURATION);

    println!("Summary statistics:");
    println!("  Total duration: {DURATION} s");
    println!("  Total blocks processed: {}", ild_values.len());
    println!("  Mean firing rate (input layer): {mean_rate:.1} Hz/neuron");
    println!("  Input gaps (held feature): {}", gaps.load(Ordering::Relaxed));
    println!("  Mean ILD: {mean_ild:.2} dB (std {std_ild:.2})");
    println!("  Mean angle: {:.2} deg", mean(&angle_values));
    println!("  Direction breakdown (threshold {THRESHOLD_DB} dB):");
    println!("    - Left:   {} blocks", counts.0);
    println!("    - Center: {} blocks", counts.1);
    println!("    - Right:  {} blocks", counts.2);

    // per-segment settled estimates, skipping the first quarter of each
    // segment while the synapses settle
    let per_segment = |values: &[f64], segment: usize| {
        let len = values.len() / 3;
        let start = segment * len + len / 4;
        mean(&values[start..(segment + 1) * len])
    };
    println!("  Settled angle per segment:");
    for (segment, name) in ["left", "center", "right"].iter().enumerate() {
        println!(
            "    - {name:>6}: {:+7.2} deg (decoded ild {:+7.2} dB)",
            per_segment(&angle_values, segment),
            per_segment(
                &sim.probe(p_angle_raw)
                    .iter()
                    .map(|(_, v)| v[0])
                    .collect::<Vec<_>>(),
                segment
            ),
        );
    }

    let (_, xy) = sim.probe(p_compass).last().expect("probe recorded");
    println!("  Final compass: ({:+.2}, {:+.2})", xy[0], xy[1]);
}
