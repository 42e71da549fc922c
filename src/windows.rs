//! Event window arithmetic.
//!
//! Recordings are sliced into labelled sample ranges around each
//! experimental event: a pre-event window, the event itself, and for
//! challenge events a post-event window. Challenge windows are further cut
//! into fixed-length epochs.

use crate::config::EventSpec;

/// A labelled half-open sample range `[start, end)` into a processed signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBounds {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

impl WindowBounds {
    pub fn new(label: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            label: label.into(),
            start,
            end: end.max(start),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn duration_secs(&self, sample_rate: f64) -> f64 {
        self.len() as f64 / sample_rate
    }

    /// Sample range of this window.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Windows for one event: `pre_<name>`, `<name>`, and for challenge events
/// `post<name>`, each clamped to the signal bounds.
pub fn event_windows(
    event: &EventSpec,
    event_start_secs: f64,
    event_end_secs: f64,
    sample_rate: f64,
    signal_len: usize,
    pre_interval_min: f64,
    post_interval_min: f64,
) -> Vec<WindowBounds> {
    let to_sample = |secs: f64| -> usize {
        let sample = (secs * sample_rate).round();
        if sample <= 0.0 {
            0
        } else {
            (sample as usize).min(signal_len)
        }
    };

    let start = to_sample(event_start_secs);
    let end = to_sample(event_end_secs);
    let pre_start = to_sample(event_start_secs - 60.0 * pre_interval_min);

    let mut windows = vec![
        WindowBounds::new(format!("pre_{}", event.name), pre_start, start),
        WindowBounds::new(event.name.clone(), start, end),
    ];

    if event.challenge {
        let post_end = to_sample(event_end_secs + 60.0 * post_interval_min);
        windows.push(WindowBounds::new(
            format!("post{}", event.name),
            end,
            post_end,
        ));
    }

    windows
}

/// Consecutive non-overlapping epochs of `epoch_length_secs` from the start
/// of a window. A trailing partial epoch is dropped.
pub fn epochs(window: &WindowBounds, epoch_length_secs: f64, sample_rate: f64) -> Vec<WindowBounds> {
    let epoch_len = (epoch_length_secs * sample_rate).round() as usize;
    if epoch_len == 0 {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut start = window.start;
    let mut index = 1usize;
    while start + epoch_len <= window.end {
        result.push(WindowBounds::new(index.to_string(), start, start + epoch_len));
        start += epoch_len;
        index += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_event_gets_pre_and_event_windows() {
        let event = EventSpec::new("hypoxia");
        let windows = event_windows(&event, 300.0, 600.0, 10.0, 10_000, 5.0, 5.0);

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].label, "pre_hypoxia");
        assert_eq!(windows[0].start, 0); // 300 s event start minus 5 min
        assert_eq!(windows[0].end, 3000);
        assert_eq!(windows[1].label, "hypoxia");
        assert_eq!(windows[1].range(), 3000..6000);
    }

    #[test]
    fn test_challenge_event_gets_post_window() {
        let event = EventSpec::challenge("challenge");
        let windows = event_windows(&event, 600.0, 900.0, 10.0, 20_000, 5.0, 5.0);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].label, "pre_challenge");
        assert_eq!(windows[0].range(), 3000..6000);
        assert_eq!(windows[1].range(), 6000..9000);
        assert_eq!(windows[2].label, "postchallenge");
        assert_eq!(windows[2].range(), 9000..12_000);
    }

    #[test]
    fn test_windows_clamped_to_signal() {
        let event = EventSpec::challenge("c");
        // Pre reaches before the recording, post past its end.
        let windows = event_windows(&event, 60.0, 110.0, 10.0, 1200, 5.0, 5.0);

        assert_eq!(windows[0].range(), 0..600);
        assert_eq!(windows[1].range(), 600..1100);
        assert_eq!(windows[2].range(), 1100..1200);
    }

    #[test]
    fn test_epoch_subdivision() {
        let window = WindowBounds::new("c", 1000, 2000);
        let result = epochs(&window, 20.0, 10.0); // 200 samples each

        assert_eq!(result.len(), 5);
        assert_eq!(result[0].label, "1");
        assert_eq!(result[0].range(), 1000..1200);
        assert_eq!(result[4].label, "5");
        assert_eq!(result[4].range(), 1800..2000);
    }

    #[test]
    fn test_partial_trailing_epoch_dropped() {
        let window = WindowBounds::new("c", 0, 250);
        let result = epochs(&window, 10.0, 10.0); // 100 samples each

        assert_eq!(result.len(), 2);
        assert_eq!(result[1].range(), 100..200);
    }

    #[test]
    fn test_empty_window_has_no_epochs() {
        let window = WindowBounds::new("c", 500, 500);
        assert!(epochs(&window, 10.0, 10.0).is_empty());
    }
}
