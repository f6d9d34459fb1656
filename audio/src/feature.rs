/// Per-channel calibration for mismatched microphones, plus the silence gate.
///
/// The defaults were tuned for the two-device rig this demo was developed on;
/// adjust `offset_db` until speech centered between the microphones reads
/// close to zero.
#[derive(Debug, Clone)]
pub struct Calibration {
    /// Scale factor for the left channel (channel 0).
    pub gain_left: f64,
    /// Scale factor for the right channel (channel 1).
    pub gain_right: f64,
    /// Fixed dB offset shifting the "center" point.
    pub offset_db: f64,
    /// Combined energy below which a block counts as silence.
    pub energy_threshold: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            gain_left: 0.3,
            gain_right: 3.0,
            offset_db: 25.0,
            energy_threshold: 1e-5,
        }
    }
}

/// Interaural level difference of a stereo block, in dB.
///
/// Positive means the left channel is louder. Returns `None` for blocks whose
/// combined energy falls below the silence gate, so callers can hold their
/// previous estimate instead of tracking noise.
pub fn ild_db(left: &[f32], right: &[f32], calibration: &Calibration) -> Option<f64> {
    let eps = 1e-8;
    let left_energy = mean_square(left) * calibration.gain_left * calibration.gain_left + eps;
    let right_energy = mean_square(right) * calibration.gain_right * calibration.gain_right + eps;

    if left_energy + right_energy < calibration.energy_threshold {
        return None;
    }

    Some(10.0 * (left_energy / right_energy).log10() + calibration.offset_db)
}

fn mean_square(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64
}

/// Linear ILD-to-angle map: ±40 dB clips to ±90 degrees.
pub fn ild_to_angle(ild: f64) -> f64 {
    let clipped = ild.clamp(-40.0, 40.0);
    clipped / 40.0 * 90.0
}

/// Unit-circle coordinates for the compass display: 0° points right,
/// +90° points up.
pub fn angle_to_xy(angle_deg: f64) -> [f64; 2] {
    let rad = angle_deg.to_radians();
    [rad.cos(), rad.sin()]
}

/// Coarse direction classification with a symmetric dead band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Center,
    Right,
}

impl Direction {
    pub fn classify(ild: f64, threshold_db: f64) -> Self {
        if ild > threshold_db {
            Direction::Left
        } else if ild < -threshold_db {
            Direction::Right
        } else {
            Direction::Center
        }
    }
}
