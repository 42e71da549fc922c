//! Feature computation from event windows.
//!
//! One [`FeatureRow`] summarizes an animal's breathing over one window of a
//! processed signal; [`EpochRow`]s do the same for the fixed-length epochs
//! of challenge windows.

use statrs::statistics::Statistics;

use crate::metadata::{BaselineTable, MetadataError};
use crate::rsp::{ProcessedSignal, Variability};
use crate::windows::WindowBounds;

/// Column names of the per-window feature tables, in sheet order.
pub const COLUMNS: [&str; 15] = [
    "Animal",
    "RSP_Rate_Mean",
    "RSP_Amplitude_Mean",
    "Ti",
    "Te",
    "Ti-Te_Ratio",
    "Resp_Drive",
    "Ve",
    "Amp_Norm",
    "Apnea_time",
    "Apnea_rate",
    "Sniff_time",
    "Sniff_rate",
    "RRV_SD1",
    "RRV_SD2",
];

/// Column names of the per-epoch tables (percent-change columns follow).
pub const EPOCH_COLUMNS: [&str; 9] = [
    "Epoch",
    "RSP_Rate_Mean",
    "RSP_Amplitude_Mean",
    "RSP_Phase_Duration_Inspiration",
    "RSP_Phase_Duration_Expiration",
    "RSP_Phase_Duration_Ratio",
    "Amp_Norm",
    "Ve",
    "Resp_drive",
];

/// Physiological features of one animal over one window.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub animal: String,
    /// Mean breathing rate (breaths/min)
    pub rate_mean: f64,
    /// Mean breath amplitude (channel units)
    pub amplitude_mean: f64,
    /// Mean inspiration duration (s)
    pub ti: f64,
    /// Mean expiration duration (s)
    pub te: f64,
    pub ti_te_ratio: f64,
    /// Normalized amplitude over inspiration duration
    pub resp_drive: f64,
    /// Minute ventilation: normalized amplitude times rate
    pub ve: f64,
    /// Amplitude normalized by body weight
    pub amp_norm: f64,
    pub apnea_time: f64,
    pub apnea_rate: f64,
    pub sniff_time: f64,
    pub sniff_rate: f64,
    pub rrv_sd1: f64,
    pub rrv_sd2: f64,
}

impl FeatureRow {
    /// Numeric cells in [`COLUMNS`] order, after the animal label.
    pub fn values(&self) -> [f64; 14] {
        [
            self.rate_mean,
            self.amplitude_mean,
            self.ti,
            self.te,
            self.ti_te_ratio,
            self.resp_drive,
            self.ve,
            self.amp_norm,
            self.apnea_time,
            self.apnea_rate,
            self.sniff_time,
            self.sniff_rate,
            self.rrv_sd1,
            self.rrv_sd2,
        ]
    }
}

/// Apnea and sniffing statistics over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BreathStats {
    /// Apneic peaks extrapolated to events per hour
    pub apnea_rate: f64,
    /// Seconds spent below the apnea rate threshold
    pub apnea_time: f64,
    /// Sniffing peaks extrapolated to events per hour
    pub sniff_rate: f64,
    /// Seconds spent above the sniffing rate threshold
    pub sniff_time: f64,
}

/// Sniff peaks must stay below this amplitude to count (large fast breaths
/// are effort, not sniffing).
const SNIFF_MAX_AMPLITUDE: f64 = 1.0;

/// Count apnea and sniffing over a window.
///
/// The apnea threshold adapts to the animal: a third of its mean rate over
/// the window's detected peaks. Peak counts are extrapolated to events per
/// hour; time totals use every (interpolated) sample.
pub fn breath_stats(
    sig: &ProcessedSignal,
    window: &WindowBounds,
    max_sniff_bpm: f64,
) -> BreathStats {
    if window.is_empty() {
        return BreathStats::default();
    }

    let range = window.range();
    let peak_rates: Vec<f64> = range
        .clone()
        .filter(|&i| sig.peak_mask[i])
        .map(|i| sig.rate[i])
        .collect();
    if peak_rates.is_empty() {
        return BreathStats::default();
    }

    let min_bpm = peak_rates.iter().mean() / 3.0;
    let window_secs = window.duration_secs(sig.sample_rate);

    let apnea_peaks = range
        .clone()
        .filter(|&i| sig.peak_mask[i] && sig.rate[i] < min_bpm)
        .count();
    let apnea_samples = range.clone().filter(|&i| sig.rate[i] < min_bpm).count();

    let sniff_peaks = range
        .clone()
        .filter(|&i| {
            sig.peak_mask[i] && sig.rate[i] > max_sniff_bpm && sig.amplitude[i] < SNIFF_MAX_AMPLITUDE
        })
        .count();
    let sniff_samples = range.filter(|&i| sig.rate[i] > max_sniff_bpm).count();

    BreathStats {
        apnea_rate: 3600.0 * apnea_peaks as f64 / window_secs,
        apnea_time: apnea_samples as f64 / sig.sample_rate,
        sniff_rate: 3600.0 * sniff_peaks as f64 / window_secs,
        sniff_time: sniff_samples as f64 / sig.sample_rate,
    }
}

/// Mean inspiration and expiration durations in seconds over a window.
///
/// Only phase runs lying entirely inside the window count; runs cut off by
/// the window edges would bias the means short.
pub fn phase_durations(sig: &ProcessedSignal, window: &WindowBounds) -> (f64, f64) {
    let phase = &sig.phase[window.range()];
    let mut inspirations: Vec<f64> = Vec::new();
    let mut expirations: Vec<f64> = Vec::new();

    let mut run_start = 0usize;
    for i in 1..phase.len() {
        if phase[i] != phase[i - 1] {
            if run_start > 0 {
                let duration = (i - run_start) as f64 / sig.sample_rate;
                if phase[run_start].is_inspiration() {
                    inspirations.push(duration);
                } else {
                    expirations.push(duration);
                }
            }
            run_start = i;
        }
    }
    // The final run reaches the window edge and is dropped.

    (inspirations.iter().mean(), expirations.iter().mean())
}

/// Compute the full feature row for one animal over one window.
pub fn window_features(
    sig: &ProcessedSignal,
    window: &WindowBounds,
    animal: &str,
    weight_grams: f64,
    rrv: &Variability,
    max_sniff_bpm: f64,
) -> FeatureRow {
    if window.is_empty() {
        return FeatureRow {
            animal: animal.to_string(),
            rate_mean: f64::NAN,
            amplitude_mean: f64::NAN,
            ti: f64::NAN,
            te: f64::NAN,
            ti_te_ratio: f64::NAN,
            resp_drive: f64::NAN,
            ve: f64::NAN,
            amp_norm: f64::NAN,
            apnea_time: 0.0,
            apnea_rate: 0.0,
            sniff_time: 0.0,
            sniff_rate: 0.0,
            rrv_sd1: rrv.sd1,
            rrv_sd2: rrv.sd2,
        };
    }

    let range = window.range();
    let rate_mean = sig.rate[range.clone()].iter().mean();
    let amplitude_mean = sig.amplitude[range].iter().mean();
    let (ti, te) = phase_durations(sig, window);
    let stats = breath_stats(sig, window, max_sniff_bpm);

    let amp_norm = amplitude_mean / weight_grams;
    FeatureRow {
        animal: animal.to_string(),
        rate_mean,
        amplitude_mean,
        ti,
        te,
        ti_te_ratio: ti / te,
        resp_drive: amp_norm / ti,
        ve: amp_norm * rate_mean,
        amp_norm,
        apnea_time: stats.apnea_time,
        apnea_rate: stats.apnea_rate,
        sniff_time: stats.sniff_time,
        sniff_rate: stats.sniff_rate,
        rrv_sd1: rrv.sd1,
        rrv_sd2: rrv.sd2,
    }
}

/// Per-epoch features of a challenge window.
#[derive(Debug, Clone)]
pub struct EpochRow {
    pub index: usize,
    pub rate_mean: f64,
    pub amplitude_mean: f64,
    pub ti: f64,
    pub te: f64,
    pub ti_te_ratio: f64,
    pub amp_norm: f64,
    pub ve: f64,
    pub resp_drive: f64,
    /// Percent-change columns appended by [`apply_percent_change`]
    pub percent_change: Vec<(String, f64)>,
}

impl EpochRow {
    /// Numeric value of a named epoch column, if the table carries it.
    pub fn value(&self, column: &str) -> Option<f64> {
        match column {
            "RSP_Rate_Mean" => Some(self.rate_mean),
            "RSP_Amplitude_Mean" => Some(self.amplitude_mean),
            "RSP_Phase_Duration_Inspiration" => Some(self.ti),
            "RSP_Phase_Duration_Expiration" => Some(self.te),
            "RSP_Phase_Duration_Ratio" => Some(self.ti_te_ratio),
            "Amp_Norm" => Some(self.amp_norm),
            "Ve" => Some(self.ve),
            "Resp_drive" => Some(self.resp_drive),
            _ => None,
        }
    }

    /// Numeric cells in [`EPOCH_COLUMNS`] order, after the epoch index.
    pub fn values(&self) -> [f64; 8] {
        [
            self.rate_mean,
            self.amplitude_mean,
            self.ti,
            self.te,
            self.ti_te_ratio,
            self.amp_norm,
            self.ve,
            self.resp_drive,
        ]
    }
}

/// Compute the feature row for one epoch.
pub fn epoch_features(
    sig: &ProcessedSignal,
    epoch: &WindowBounds,
    index: usize,
    weight_grams: f64,
) -> EpochRow {
    let range = epoch.range();
    let rate_mean = sig.rate[range.clone()].iter().mean();
    let amplitude_mean = sig.amplitude[range].iter().mean();
    let (ti, te) = phase_durations(sig, epoch);
    let amp_norm = amplitude_mean / weight_grams;

    EpochRow {
        index,
        rate_mean,
        amplitude_mean,
        ti,
        te,
        ti_te_ratio: ti / te,
        amp_norm,
        ve: amp_norm * rate_mean,
        resp_drive: amp_norm / ti,
        percent_change: Vec::new(),
    }
}

/// Append `<column>_percent_change` values to every epoch row, comparing
/// against the animal's baseline row.
///
/// Baseline measure columns the epoch table does not carry are skipped.
/// Returns the names of the appended columns, in order.
pub fn apply_percent_change(
    rows: &mut [EpochRow],
    baseline: &BaselineTable,
    animal: &str,
) -> Result<Vec<String>, MetadataError> {
    if !baseline.contains_animal(animal) {
        return Err(MetadataError::MissingBaselineRow(animal.to_string()));
    }

    let mut applied = Vec::new();
    for column in baseline.measure_columns() {
        let in_epochs = rows.first().map(|r| r.value(column).is_some()).unwrap_or(false);
        if !in_epochs {
            log::warn!("baseline column '{column}' has no epoch counterpart; skipped");
            continue;
        }
        let Some(base) = baseline.value(animal, column) else {
            log::warn!("baseline row for '{animal}' has no value in '{column}'; skipped");
            continue;
        };

        let name = format!("{column}_percent_change");
        for row in rows.iter_mut() {
            let value = row.value(column).unwrap_or(f64::NAN);
            row.percent_change
                .push((name.clone(), 100.0 * (value - base) / base));
        }
        applied.push(name);
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsp::Phase;

    /// A hand-built signal: 100 breaths/min, amplitude 0.5, one breath
    /// every 6 samples at 10 Hz (phase runs of 3 samples each).
    fn synthetic_signal(len: usize) -> ProcessedSignal {
        let mut phase = Vec::with_capacity(len);
        let mut peak_mask = vec![false; len];
        let mut peaks = Vec::new();
        let mut troughs = Vec::new();
        for i in 0..len {
            let in_cycle = i % 6;
            phase.push(if in_cycle < 3 {
                Phase::Inspiration
            } else {
                Phase::Expiration
            });
            if in_cycle == 2 {
                peak_mask[i] = true;
                peaks.push(i);
            }
            if in_cycle == 5 {
                troughs.push(i);
            }
        }

        ProcessedSignal {
            raw: vec![0.0; len],
            clean: vec![0.0; len],
            amplitude: vec![0.5; len],
            rate: vec![100.0; len],
            phase,
            peak_mask,
            peaks,
            troughs,
            sample_rate: 10.0,
        }
    }

    fn full_window(sig: &ProcessedSignal) -> WindowBounds {
        WindowBounds::new("w", 0, sig.len())
    }

    #[test]
    fn test_window_features_formulas() {
        let sig = synthetic_signal(600);
        let rrv = Variability { sd1: 3.0, sd2: 7.0 };
        let row = window_features(&sig, &full_window(&sig), "rat01", 25.0, &rrv, 150.0);

        assert_eq!(row.animal, "rat01");
        assert!((row.rate_mean - 100.0).abs() < 1e-9);
        assert!((row.amplitude_mean - 0.5).abs() < 1e-9);
        assert!((row.amp_norm - 0.02).abs() < 1e-9);
        assert!((row.ve - 2.0).abs() < 1e-9);
        // Phase runs are 3 samples at 10 Hz.
        assert!((row.ti - 0.3).abs() < 1e-9);
        assert!((row.te - 0.3).abs() < 1e-9);
        assert!((row.ti_te_ratio - 1.0).abs() < 1e-9);
        assert!((row.resp_drive - 0.02 / 0.3).abs() < 1e-9);
        assert_eq!(row.rrv_sd1, 3.0);
        assert_eq!(row.rrv_sd2, 7.0);
    }

    #[test]
    fn test_breath_stats_quiet_breathing() {
        let sig = synthetic_signal(600);
        let stats = breath_stats(&sig, &full_window(&sig), 150.0);

        // Constant 100 bpm: no sample below 33 bpm, none above 150 bpm.
        assert_eq!(stats.apnea_rate, 0.0);
        assert_eq!(stats.apnea_time, 0.0);
        assert_eq!(stats.sniff_rate, 0.0);
        assert_eq!(stats.sniff_time, 0.0);
    }

    #[test]
    fn test_breath_stats_detects_apnea() {
        let mut sig = synthetic_signal(600);
        // One slow stretch: 20 samples at 10 bpm covering two peaks.
        for i in 100..120 {
            sig.rate[i] = 10.0;
        }
        let stats = breath_stats(&sig, &full_window(&sig), 150.0);

        assert!(stats.apnea_time >= 1.9 && stats.apnea_time <= 2.1, "{stats:?}");
        // 60 s window, 3-4 apneic peaks in it.
        assert!(stats.apnea_rate > 100.0, "{stats:?}");
    }

    #[test]
    fn test_breath_stats_detects_sniffing() {
        let mut sig = synthetic_signal(600);
        for i in 200..230 {
            sig.rate[i] = 200.0;
        }
        let stats = breath_stats(&sig, &full_window(&sig), 150.0);

        assert!((stats.sniff_time - 3.0).abs() < 0.11, "{stats:?}");
        assert!(stats.sniff_rate > 0.0);
        assert_eq!(stats.apnea_rate, 0.0);
    }

    #[test]
    fn test_large_fast_breaths_are_not_sniffs() {
        let mut sig = synthetic_signal(600);
        for i in 200..230 {
            sig.rate[i] = 200.0;
            sig.amplitude[i] = 1.4;
        }
        let stats = breath_stats(&sig, &full_window(&sig), 150.0);

        // Time counts every fast sample, the peak rate only small ones.
        assert!(stats.sniff_time > 0.0);
        assert_eq!(stats.sniff_rate, 0.0);
    }

    #[test]
    fn test_empty_window() {
        let sig = synthetic_signal(60);
        let window = WindowBounds::new("w", 30, 30);
        let row = window_features(&sig, &window, "rat01", 25.0, &Variability::default(), 150.0);
        assert!(row.rate_mean.is_nan());
        assert_eq!(breath_stats(&sig, &window, 150.0), BreathStats::default());
    }

    #[test]
    fn test_epoch_features_match_window_math() {
        let sig = synthetic_signal(600);
        let epoch = WindowBounds::new("1", 60, 120);
        let row = epoch_features(&sig, &epoch, 1, 25.0);

        assert_eq!(row.index, 1);
        assert!((row.rate_mean - 100.0).abs() < 1e-9);
        assert!((row.amp_norm - 0.02).abs() < 1e-9);
        assert!((row.ve - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_change() {
        use rust_xlsxwriter::Workbook;
        use std::io::Cursor;

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, name) in ["Animal", "RSP_Rate_Mean", "RRV_SD1"].iter().enumerate() {
            sheet.write_string(0, col as u16, *name).unwrap();
        }
        sheet.write_string(1, 0, "rat01").unwrap();
        sheet.write_number(1, 1, 100.0).unwrap();
        sheet.write_number(1, 2, 5.0).unwrap();
        let buf = workbook.save_to_buffer().unwrap();
        let baseline =
            crate::metadata::BaselineTable::from_reader(Cursor::new(buf), "Sheet1").unwrap();

        let sig = synthetic_signal(600);
        let mut rows = vec![epoch_features(&sig, &WindowBounds::new("1", 0, 60), 1, 25.0)];
        rows[0].rate_mean = 110.0;

        let applied = apply_percent_change(&mut rows, &baseline, "rat01").unwrap();

        // RRV_SD1 has no epoch counterpart and is skipped.
        assert_eq!(applied, vec!["RSP_Rate_Mean_percent_change".to_string()]);
        let (name, value) = &rows[0].percent_change[0];
        assert_eq!(name, "RSP_Rate_Mean_percent_change");
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_change_requires_baseline_row() {
        use rust_xlsxwriter::Workbook;
        use std::io::Cursor;

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Animal").unwrap();
        sheet.write_string(0, 1, "RSP_Rate_Mean").unwrap();
        sheet.write_string(1, 0, "rat01").unwrap();
        sheet.write_number(1, 1, 100.0).unwrap();
        let buf = workbook.save_to_buffer().unwrap();
        let baseline =
            crate::metadata::BaselineTable::from_reader(Cursor::new(buf), "Sheet1").unwrap();

        let sig = synthetic_signal(60);
        let mut rows = vec![epoch_features(&sig, &WindowBounds::new("1", 0, 60), 1, 25.0)];
        assert!(apply_percent_change(&mut rows, &baseline, "rat02").is_err());
    }
}
