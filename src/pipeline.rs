//! The batch pipeline: every recording in the configured directory is
//! decoded, processed, sliced around its events, and accumulated into the
//! final feature workbook.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::Config;
use crate::features;
use crate::metadata::{AnimalRecord, AnimalTable, BaselineTable, MetadataError};
use crate::plot::{self, PlotError, PlotStyle};
use crate::recording::{Recording, RecordingError};
use crate::report::{self, EpochSheet, ReportBuilder, ReportError};
use crate::rsp::{self, ProcessOptions, RspError};
use crate::windows;

/// Outcome of a completed batch run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub files_processed: usize,
    pub sheets_written: usize,
    pub plots_rendered: usize,
    pub workbook_path: PathBuf,
}

/// Pipeline errors. Any failure aborts the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not list recordings in {0}: {1}")]
    ListRecordings(PathBuf, #[source] std::io::Error),
    #[error("no .smr/.smrx recordings found in {0}")]
    NoRecordings(PathBuf),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error("{file}: {source}")]
    Processing {
        file: String,
        #[source]
        source: RspError,
    },
    #[error("animal '{animal}': event '{event}' ends at {end} s, before its start at {start} s")]
    InvalidEventWindow {
        animal: String,
        event: String,
        start: f64,
        end: f64,
    },
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("could not render plot for {0}: {1}")]
    Plot(String, #[source] PlotError),
    #[error("could not write {0}: {1}")]
    WriteOutput(PathBuf, #[source] std::io::Error),
}

/// Execute a full batch run.
pub fn run(config: &Config) -> Result<RunSummary, PipelineError> {
    let files = discover_recordings(&config.recordings_dir)?;
    log::info!(
        "{} recording(s) found in {}",
        files.len(),
        config.recordings_dir.display()
    );

    let animals = AnimalTable::from_workbook(&config.info_path, &config.sheet_name)?;
    let baseline = match &config.baseline_path {
        Some(path) => Some(BaselineTable::from_workbook(path, &config.baseline_sheet)?),
        None => None,
    };

    let mut report = ReportBuilder::new(&config.events);
    let mut plots_rendered = 0usize;

    for path in &files {
        process_file(
            path,
            config,
            &animals,
            baseline.as_ref(),
            &mut report,
            &mut plots_rendered,
        )?;
    }

    fs::create_dir_all(&config.output_dir)
        .map_err(|e| PipelineError::WriteOutput(config.output_dir.clone(), e))?;
    let workbook_path = config
        .output_dir
        .join(report::workbook_filename(&config.suffix));
    report.write_to(&workbook_path)?;
    log::info!("workbook saved to {}", workbook_path.display());

    Ok(RunSummary {
        files_processed: files.len(),
        sheets_written: report.sheet_count(),
        plots_rendered,
        workbook_path,
    })
}

/// Sorted list of `.smr`/`.smrx` files in a directory.
pub fn discover_recordings(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries =
        fs::read_dir(dir).map_err(|e| PipelineError::ListRecordings(dir.to_path_buf(), e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
                Some("smr") | Some("smrx")
            )
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(PipelineError::NoRecordings(dir.to_path_buf()));
    }
    Ok(files)
}

fn process_file(
    path: &Path,
    config: &Config,
    animals: &AnimalTable,
    baseline: Option<&BaselineTable>,
    report: &mut ReportBuilder,
    plots_rendered: &mut usize,
) -> Result<(), PipelineError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let record = animals.match_recording(&stem)?;
    log::info!("processing {} (animal {})", path.display(), record.id);

    let recording = Recording::open(path)?;
    log::info!(
        "sampling rate {:.2} Hz, {:.1} s of signal",
        recording.sample_rate,
        recording.duration_secs()
    );

    let options = ProcessOptions {
        start_secs: config.plot.start_secs,
        end_secs: config.plot.end_secs,
        ..Default::default()
    };
    let sig = rsp::process(&recording.signal, recording.sample_rate, &options).map_err(|e| {
        PipelineError::Processing {
            file: path.display().to_string(),
            source: e,
        }
    })?;
    let rrv = rsp::variability(&sig.peaks, sig.sample_rate);

    if config.plot.enabled {
        let png = plot::render_signals_png(&sig, &PlotStyle::default())
            .map_err(|e| PipelineError::Plot(path.display().to_string(), e))?;
        fs::create_dir_all(&config.output_dir)
            .map_err(|e| PipelineError::WriteOutput(config.output_dir.clone(), e))?;
        let plot_path = config.output_dir.join(format!("{stem}_signals.png"));
        fs::write(&plot_path, png).map_err(|e| PipelineError::WriteOutput(plot_path.clone(), e))?;
        log::info!("plot saved to {}", plot_path.display());
        *plots_rendered += 1;
    }

    for event in &config.events {
        let (start, end) = record.event_bounds(&event.name)?;
        if end <= start {
            return Err(PipelineError::InvalidEventWindow {
                animal: record.id.clone(),
                event: event.name.clone(),
                start,
                end,
            });
        }
        log::debug!("event '{}': {start} s to {end} s", event.name);

        let event_windows = windows::event_windows(
            event,
            start,
            end,
            sig.sample_rate,
            sig.len(),
            config.pre_interval_min,
            config.post_interval_min,
        );

        for window in &event_windows {
            let row = features::window_features(
                &sig,
                window,
                &record.id,
                record.weight,
                &rrv,
                config.max_sniff_bpm,
            );
            report.push_feature_row(&window.label, row);

            if event.challenge {
                push_epoch_sheet(&sig, window, config, record, baseline, report)?;
            }
        }
    }

    Ok(())
}

fn push_epoch_sheet(
    sig: &rsp::ProcessedSignal,
    window: &windows::WindowBounds,
    config: &Config,
    record: &AnimalRecord,
    baseline: Option<&BaselineTable>,
    report: &mut ReportBuilder,
) -> Result<(), PipelineError> {
    let epochs = windows::epochs(window, config.epoch_length_secs, sig.sample_rate);
    if epochs.is_empty() {
        log::warn!(
            "window '{}' is shorter than one epoch; no epoch sheet for {}",
            window.label,
            record.id
        );
        return Ok(());
    }

    let mut rows: Vec<features::EpochRow> = epochs
        .iter()
        .enumerate()
        .map(|(i, epoch)| features::epoch_features(sig, epoch, i + 1, record.weight))
        .collect();

    let percent_columns = match baseline {
        Some(baseline) => features::apply_percent_change(&mut rows, baseline, &record.id)?,
        None => Vec::new(),
    };

    let name = format!(
        "{}{}{}{}epochs",
        record.condition, record.sex, record.id, window.label
    );
    log::debug!("epoch sheet '{name}': {} epoch(s)", rows.len());
    report.push_epoch_sheet(EpochSheet {
        name,
        rows,
        percent_columns,
    });

    Ok(())
}
