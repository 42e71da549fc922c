//! Decoding of raw plethysmography recordings.
//!
//! Recordings come off the acquisition rig as CED Spike2 files. The 32-bit
//! SON container (`.smr`) is decoded by the [`son`] submodule; the 64-bit
//! container (`.smrx`) is recognized but not decoded.

pub mod son;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A decoded recording: the first waveform channel and its sampling rate.
#[derive(Debug, Clone)]
pub struct Recording {
    pub path: PathBuf,
    /// Respiration trace in channel units (typically volts)
    pub signal: Vec<f64>,
    /// Sampling rate in Hz
    pub sample_rate: f64,
    /// Title of the decoded channel, as stored in the file
    pub channel_title: String,
}

impl Recording {
    /// Decode a recording file, dispatching on its extension.
    pub fn open(path: &Path) -> Result<Self, RecordingError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("smr") => {
                let file =
                    File::open(path).map_err(|e| RecordingError::Io(path.to_path_buf(), e))?;
                let mut reader = BufReader::with_capacity(65536, file);
                let waveform = son::read_waveform(&mut reader)?;
                log::debug!(
                    "{}: channel '{}', {} samples at {:.2} Hz",
                    path.display(),
                    waveform.title,
                    waveform.samples.len(),
                    waveform.sample_rate
                );
                Ok(Self {
                    path: path.to_path_buf(),
                    signal: waveform.samples,
                    sample_rate: waveform.sample_rate,
                    channel_title: waveform.title,
                })
            }
            Some("smrx") => Err(RecordingError::UnsupportedFormat(path.to_path_buf())),
            _ => Err(RecordingError::MalformedExtension(path.to_path_buf())),
        }
    }

    /// Duration of the decoded signal in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.signal.len() as f64 / self.sample_rate
    }
}

/// Errors while decoding a recording.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("could not open {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("no smr or smrx extension detected in {0}")]
    MalformedExtension(PathBuf),
    #[error("{0}: 64-bit smrx containers are not supported; export the channel as .smr")]
    UnsupportedFormat(PathBuf),
    #[error("not a SON file: {0}")]
    UnrecognizedFormat(String),
    #[error("read error inside SON container: {0}")]
    Read(#[from] std::io::Error),
    #[error("file has no waveform (ADC/RealWave) channel")]
    NoWaveformChannel,
    #[error("waveform channel '{0}' has no data blocks")]
    NoData(String),
    #[error("corrupt block chain in channel '{title}' at offset {offset}")]
    BadBlockChain { title: String, offset: i64 },
    #[error("channel '{0}' declares a non-positive sample interval")]
    BadTiming(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_unknown_extension() {
        let err = Recording::open(Path::new("rat01.dat")).unwrap_err();
        assert!(matches!(err, RecordingError::MalformedExtension(_)));
    }

    #[test]
    fn test_open_rejects_missing_extension() {
        let err = Recording::open(Path::new("rat01")).unwrap_err();
        assert!(matches!(err, RecordingError::MalformedExtension(_)));
    }

    #[test]
    fn test_open_reports_smrx_unsupported() {
        let err = Recording::open(Path::new("rat01.smrx")).unwrap_err();
        assert!(matches!(err, RecordingError::UnsupportedFormat(_)));
    }
}
