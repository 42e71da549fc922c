//! Respiration signal processing.
//!
//! Turns a raw plethysmography trace into the per-sample series the feature
//! extraction works on: cleaned signal, breath extrema, instantaneous
//! amplitude and rate, and inspiration/expiration phase.

pub mod filter;
pub mod peaks;
pub mod variability;

pub use peaks::BreathExtrema;
pub use variability::{variability, Variability};

use thiserror::Error;

/// Band-pass corner frequencies for cleaning the raw trace (Hz).
const LOWCUT_HZ: f64 = 0.05;
const HIGHCUT_HZ: f64 = 5.0;

/// Default relative amplitude threshold for breath detection.
pub const DEFAULT_AMPLITUDE_MIN: f64 = 0.05;

/// Respiratory phase of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Inspiration,
    Expiration,
}

impl Phase {
    pub fn is_inspiration(self) -> bool {
        matches!(self, Phase::Inspiration)
    }
}

/// Options for [`process`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Crop the analysis range to `[start_secs, end_secs]` before processing.
    pub start_secs: Option<f64>,
    pub end_secs: Option<f64>,
    /// Relative amplitude threshold for breath detection.
    pub amplitude_min: f64,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            start_secs: None,
            end_secs: None,
            amplitude_min: DEFAULT_AMPLITUDE_MIN,
        }
    }
}

/// A fully processed respiration signal.
///
/// All series have the same length as the (cropped) raw signal.
#[derive(Debug, Clone)]
pub struct ProcessedSignal {
    pub raw: Vec<f64>,
    pub clean: Vec<f64>,
    /// Breath amplitude (peak minus preceding trough), interpolated
    pub amplitude: Vec<f64>,
    /// Instantaneous breathing rate in breaths/min, interpolated
    pub rate: Vec<f64>,
    /// Inspiration/expiration marker per sample
    pub phase: Vec<Phase>,
    /// True exactly at detected peak samples
    pub peak_mask: Vec<bool>,
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
    pub sample_rate: f64,
}

impl ProcessedSignal {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    /// Mask of samples free of rate/amplitude artifacts: rate inside
    /// (0, 200) breaths/min and amplitude inside (0, 1).
    pub fn artifact_free_mask(&self) -> Vec<bool> {
        self.rate
            .iter()
            .zip(&self.amplitude)
            .map(|(&r, &a)| r > 0.0 && r < 200.0 && a > 0.0 && a < 1.0)
            .collect()
    }
}

/// Errors during respiration processing.
#[derive(Debug, Error)]
pub enum RspError {
    #[error("signal is empty after cropping to the configured analysis range")]
    EmptyAnalysisRange,
    #[error("only {0} breath(s) detected; at least 2 are needed")]
    TooFewBreaths(usize),
    #[error("sampling rate {0} Hz is not usable")]
    BadSampleRate(f64),
}

/// Processing pipeline for a raw plethysmography trace.
///
/// Detrends, band-pass filters, detects breath extrema and derives the
/// amplitude/rate/phase series.
pub fn process(
    raw: &[f64],
    sample_rate: f64,
    options: &ProcessOptions,
) -> Result<ProcessedSignal, RspError> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(RspError::BadSampleRate(sample_rate));
    }

    let raw = crop(raw, sample_rate, options);
    if raw.is_empty() {
        return Err(RspError::EmptyAnalysisRange);
    }

    let detrended = filter::detrend(&raw);
    let sections = filter::bandpass_sections(sample_rate, LOWCUT_HZ, HIGHCUT_HZ);
    let clean = filter::filtfilt(&sections, &detrended);

    let extrema = peaks::detect_breaths(&clean, options.amplitude_min);
    if extrema.breath_count() < 2 {
        return Err(RspError::TooFewBreaths(extrema.breath_count()));
    }
    log::debug!(
        "{} breaths detected over {:.1} s",
        extrema.breath_count(),
        raw.len() as f64 / sample_rate
    );

    let amplitude = amplitude_series(&clean, &extrema);
    let rate = rate_series(&extrema.peaks, sample_rate, clean.len());
    let phase = phase_series(&extrema, clean.len());

    let mut peak_mask = vec![false; clean.len()];
    for &p in &extrema.peaks {
        peak_mask[p] = true;
    }

    Ok(ProcessedSignal {
        raw,
        clean,
        amplitude,
        rate,
        phase,
        peak_mask,
        peaks: extrema.peaks,
        troughs: extrema.troughs,
        sample_rate,
    })
}

fn crop(raw: &[f64], sample_rate: f64, options: &ProcessOptions) -> Vec<f64> {
    if options.start_secs.is_none() && options.end_secs.is_none() {
        return raw.to_vec();
    }
    let start = options
        .start_secs
        .map(|s| ((s * sample_rate) as usize).min(raw.len()))
        .unwrap_or(0);
    let end = options
        .end_secs
        .map(|s| ((s * sample_rate) as usize).clamp(start, raw.len()))
        .unwrap_or(raw.len());
    raw[start..end].to_vec()
}

/// Breath amplitude at each peak (peak value minus preceding trough value),
/// linearly interpolated between peaks and held constant at the edges.
fn amplitude_series(clean: &[f64], extrema: &BreathExtrema) -> Vec<f64> {
    let points: Vec<(usize, f64)> = extrema
        .peaks
        .iter()
        .zip(&extrema.troughs)
        .map(|(&peak, &trough)| (peak, clean[peak] - clean[trough]))
        .collect();
    interpolate(&points, clean.len())
}

/// Instantaneous rate (breaths/min) from peak-to-peak periods, anchored at
/// the later peak of each pair.
fn rate_series(peaks: &[usize], sample_rate: f64, len: usize) -> Vec<f64> {
    let points: Vec<(usize, f64)> = peaks
        .windows(2)
        .map(|pair| {
            let period_secs = (pair[1] - pair[0]) as f64 / sample_rate;
            (pair[1], 60.0 / period_secs)
        })
        .collect();
    interpolate(&points, len)
}

/// Inspiration runs from trough to peak, expiration from peak to trough;
/// edges take the phase implied by the nearest extremum.
fn phase_series(extrema: &BreathExtrema, len: usize) -> Vec<Phase> {
    let mut phase = vec![Phase::Expiration; len];
    let merged = extrema.merged();

    if let Some(&(first, is_peak)) = merged.first() {
        let leading = if is_peak {
            Phase::Inspiration
        } else {
            Phase::Expiration
        };
        for p in phase.iter_mut().take(first + 1) {
            *p = leading;
        }
    }

    for pair in merged.windows(2) {
        let (start, _) = pair[0];
        let (end, end_is_peak) = pair[1];
        let segment = if end_is_peak {
            Phase::Inspiration
        } else {
            Phase::Expiration
        };
        for p in phase.iter_mut().take(end + 1).skip(start + 1) {
            *p = segment;
        }
    }

    // After the final peak the animal is breathing out.
    phase
}

/// Piecewise-linear interpolation through `(index, value)` anchors with
/// constant extension beyond the first and last anchor.
fn interpolate(points: &[(usize, f64)], len: usize) -> Vec<f64> {
    if points.is_empty() {
        return vec![0.0; len];
    }

    let mut series = vec![0.0; len];
    let (first_idx, first_val) = points[0];
    for v in series.iter_mut().take(first_idx.min(len)) {
        *v = first_val;
    }

    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x1 <= x0 {
            continue;
        }
        let span = (x1 - x0) as f64;
        for x in x0..x1.min(len) {
            let t = (x - x0) as f64 / span;
            series[x] = y0 + (y1 - y0) * t;
        }
    }

    let (last_idx, last_val) = points[points.len() - 1];
    for v in series.iter_mut().skip(last_idx.min(len)) {
        *v = last_val;
    }

    series
}
