//! Detrending and zero-phase Butterworth filtering.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Biquad (2nd-order IIR) filter coefficients, normalized form (a0 = 1).
///
/// Difference equation:
/// y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
#[derive(Clone, Copy, Debug)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// 2nd-order Butterworth lowpass.
    pub fn butterworth_lowpass(sample_rate: f64, cutoff: f64) -> Self {
        let omega = 2.0 * PI * cutoff / sample_rate;
        let cos_omega = omega.cos();
        let sin_omega = omega.sin();
        let alpha = sin_omega / (2.0 * FRAC_1_SQRT_2);

        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;
        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = b0;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// 2nd-order Butterworth highpass.
    pub fn butterworth_highpass(sample_rate: f64, cutoff: f64) -> Self {
        let omega = 2.0 * PI * cutoff / sample_rate;
        let cos_omega = omega.cos();
        let sin_omega = omega.sin();
        let alpha = sin_omega / (2.0 * FRAC_1_SQRT_2);

        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;
        let b0 = (1.0 + cos_omega) / 2.0;
        let b1 = -(1.0 + cos_omega);
        let b2 = b0;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Band-pass sections: a highpass at the low cut cascaded with a lowpass at
/// the high cut.
pub fn bandpass_sections(sample_rate: f64, lowcut: f64, highcut: f64) -> [BiquadCoeffs; 2] {
    [
        BiquadCoeffs::butterworth_highpass(sample_rate, lowcut),
        BiquadCoeffs::butterworth_lowpass(sample_rate, highcut),
    ]
}

/// Run the cascade once, forward, with zeroed initial state.
fn run(sections: &[BiquadCoeffs], input: &[f64]) -> Vec<f64> {
    let mut state = vec![[0.0f64; 4]; sections.len()];
    let mut out = Vec::with_capacity(input.len());

    for &sample in input {
        let mut x = sample;
        for (c, s) in sections.iter().zip(state.iter_mut()) {
            let y = c.b0 * x + c.b1 * s[0] + c.b2 * s[1] - c.a1 * s[2] - c.a2 * s[3];
            s[1] = s[0];
            s[0] = x;
            s[3] = s[2];
            s[2] = y;
            x = y;
        }
        out.push(x);
    }

    out
}

/// Zero-phase filtering: the cascade is run forward, then backward, so peak
/// positions are not shifted in time.
pub fn filtfilt(sections: &[BiquadCoeffs], input: &[f64]) -> Vec<f64> {
    let mut forward = run(sections, input);
    forward.reverse();
    let mut backward = run(sections, &forward);
    backward.reverse();
    backward
}

/// Remove the least-squares line from a signal.
pub fn detrend(input: &[f64]) -> Vec<f64> {
    let n = input.len();
    if n < 2 {
        return input.to_vec();
    }

    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = input.iter().sum::<f64>() / n_f;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, &y) in input.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }

    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    input
        .iter()
        .enumerate()
        .map(|(i, &y)| y - (y_mean + slope * (i as f64 - x_mean)))
        .collect()
}
