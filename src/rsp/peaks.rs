//! Breath extrema detection on the cleaned respiration signal.

use statrs::statistics::{Data, OrderStatistics};

/// Alternating trough/peak indices of the detected breaths.
///
/// Invariant: the merged sequence strictly alternates, starts with a trough
/// and ends with a peak, so every peak has a preceding trough.
#[derive(Debug, Clone, Default)]
pub struct BreathExtrema {
    pub troughs: Vec<usize>,
    pub peaks: Vec<usize>,
}

impl BreathExtrema {
    /// Number of complete breaths (one per detected peak).
    pub fn breath_count(&self) -> usize {
        self.peaks.len()
    }

    /// Trough/peak indices merged into one ordered sequence, with `true`
    /// marking peaks.
    pub fn merged(&self) -> Vec<(usize, bool)> {
        let mut merged: Vec<(usize, bool)> = self
            .troughs
            .iter()
            .map(|&i| (i, false))
            .chain(self.peaks.iter().map(|&i| (i, true)))
            .collect();
        merged.sort_unstable_by_key(|&(i, _)| i);
        merged
    }
}

/// Detect breath troughs and peaks on a cleaned, zero-centered signal.
///
/// Extrema are located between zero crossings, then pairs whose vertical
/// distance falls below `amplitude_min` times the median breath amplitude
/// are discarded as noise.
pub fn detect_breaths(clean: &[f64], amplitude_min: f64) -> BreathExtrema {
    let candidates = extrema_from_crossings(clean);
    let pruned = prune_small_breaths(clean, candidates, amplitude_min);
    sanitize(clean, pruned)
}

/// Local extrema between consecutive zero crossings: the maximum of each
/// positive excursion and the minimum of each negative one.
fn extrema_from_crossings(clean: &[f64]) -> Vec<(usize, bool)> {
    let mut extrema = Vec::new();
    let mut segment_start = 0usize;
    let mut positive = match clean.first() {
        Some(&v) => v >= 0.0,
        None => return extrema,
    };

    for i in 1..clean.len() {
        let now_positive = clean[i] >= 0.0;
        if now_positive != positive {
            push_segment_extremum(clean, segment_start, i, positive, &mut extrema);
            segment_start = i;
            positive = now_positive;
        }
    }

    // Leading and trailing half-excursions are unreliable; the first and
    // last segments are dropped by starting the scan only at crossings.
    if !extrema.is_empty() {
        extrema.remove(0);
    }
    extrema
}

fn push_segment_extremum(
    clean: &[f64],
    start: usize,
    end: usize,
    positive: bool,
    extrema: &mut Vec<(usize, bool)>,
) {
    let segment = &clean[start..end];
    let index = if positive {
        argmax(segment)
    } else {
        argmin(segment)
    };
    extrema.push((start + index, positive));
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
        .0
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::MAX), |acc, (i, &v)| if v < acc.1 { (i, v) } else { acc })
        .0
}

/// Drop the later extremum of every pair whose vertical distance is small
/// relative to the median breath amplitude.
fn prune_small_breaths(
    clean: &[f64],
    extrema: Vec<(usize, bool)>,
    amplitude_min: f64,
) -> Vec<(usize, bool)> {
    if extrema.len() < 3 {
        return extrema;
    }

    let diffs: Vec<f64> = extrema
        .windows(2)
        .map(|pair| (clean[pair[1].0] - clean[pair[0].0]).abs())
        .collect();
    let median = Data::new(diffs.clone()).median();
    if !(median > 0.0) {
        return extrema;
    }
    let threshold = amplitude_min * median;

    let mut kept = vec![extrema[0]];
    for (i, &e) in extrema.iter().enumerate().skip(1) {
        if diffs[i - 1] > threshold {
            kept.push(e);
        }
    }
    kept
}

/// Restore strict alternation and trim so the sequence starts with a trough
/// and ends with a peak. Of two adjacent same-kind extrema the more extreme
/// one survives.
fn sanitize(clean: &[f64], extrema: Vec<(usize, bool)>) -> BreathExtrema {
    let mut alternating: Vec<(usize, bool)> = Vec::with_capacity(extrema.len());
    for e in extrema {
        match alternating.last_mut() {
            Some(last) if last.1 == e.1 => {
                let replace = if e.1 {
                    clean[e.0] > clean[last.0]
                } else {
                    clean[e.0] < clean[last.0]
                };
                if replace {
                    *last = e;
                }
            }
            _ => alternating.push(e),
        }
    }

    // Leading peak has no preceding trough; trailing trough has no peak.
    if alternating.first().is_some_and(|&(_, is_peak)| is_peak) {
        alternating.remove(0);
    }
    if alternating.last().is_some_and(|&(_, is_peak)| !is_peak) {
        alternating.pop();
    }

    let mut result = BreathExtrema::default();
    for (index, is_peak) in alternating {
        if is_peak {
            result.peaks.push(index);
        } else {
            result.troughs.push(index);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, sr: f64, secs: f64) -> Vec<f64> {
        let n = (sr * secs) as usize;
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / sr).sin()).collect()
    }

    #[test]
    fn test_sine_breath_count() {
        // 2 Hz for 10 s: 20 cycles, minus trimmed edges.
        let clean = sine(2.0, 100.0, 10.0);
        let extrema = detect_breaths(&clean, 0.05);

        assert!(extrema.breath_count() >= 17 && extrema.breath_count() <= 20);
        assert_eq!(extrema.troughs.len(), extrema.peaks.len());
    }

    #[test]
    fn test_alternation_invariant() {
        let clean = sine(1.0, 50.0, 20.0);
        let extrema = detect_breaths(&clean, 0.05);

        let merged = extrema.merged();
        assert!(!merged.is_empty());
        assert!(!merged[0].1, "sequence must start with a trough");
        assert!(merged.last().unwrap().1, "sequence must end with a peak");
        for pair in merged.windows(2) {
            assert_ne!(pair[0].1, pair[1].1, "extrema must alternate");
        }
    }

    #[test]
    fn test_peak_positions_on_sine() {
        let sr = 100.0;
        let clean = sine(1.0, sr, 10.0);
        let extrema = detect_breaths(&clean, 0.05);

        // 1 Hz peaks at 0.25 s, 1.25 s, ... so indices are 25 mod 100.
        for &p in &extrema.peaks {
            let drift = (p % 100) as i64 - 25;
            assert!(drift.abs() <= 1, "peak at {p}");
        }
    }

    /// Half-sine arc crossing zero at both ends.
    fn arc(amplitude: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| amplitude * (PI * i as f64 / len as f64).sin())
            .collect()
    }

    #[test]
    fn test_small_wiggles_pruned() {
        // Four full breaths with one faint excursion pair in the middle.
        let mut clean = Vec::new();
        for cycle in 0..4 {
            clean.extend(arc(1.0, 50));
            clean.extend(arc(-1.0, 50));
            if cycle == 1 {
                clean.extend(arc(0.02, 10));
                clean.extend(arc(-0.02, 10));
            }
        }

        let extrema = detect_breaths(&clean, 0.3);

        assert!(extrema.breath_count() <= 4, "got {}", extrema.breath_count());
        // No surviving peak is the faint one.
        for &p in &extrema.peaks {
            assert!(clean[p] > 0.5, "faint peak survived at {p}");
        }
    }

    #[test]
    fn test_flat_signal_yields_nothing() {
        let clean = vec![0.0; 500];
        let extrema = detect_breaths(&clean, 0.05);
        assert_eq!(extrema.breath_count(), 0);
    }
}
