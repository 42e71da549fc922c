//! pleth-batch - batch feature extraction from plethysmography recordings.
//!
//! This library turns a directory of whole-body plethysmography recordings
//! plus a metadata spreadsheet into a workbook of per-event breathing
//! features, one row per animal per window.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           pleth-batch                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐  │
//! │  │ Recording │──▶│    Rsp    │──▶│  Windows  │──▶│ Features  │  │
//! │  │  (.smr)   │   │ (clean +  │   │ (pre/post │   │ (rate, Ti │  │
//! │  └───────────┘   │  breaths) │   │  epochs)  │   │  Ve, ...) │  │
//! │        ▲         └───────────┘   └───────────┘   └─────┬─────┘  │
//! │        │                ▲                              ▼        │
//! │  ┌───────────┐   ┌───────────┐                   ┌───────────┐  │
//! │  │ Metadata  │   │   Plot    │                   │  Report   │  │
//! │  │  (.xlsx)  │   │  (.png)   │                   │  (.xlsx)  │  │
//! │  └───────────┘   └───────────┘                   └───────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pleth_batch::{pipeline, Config};
//!
//! let config = Config::load().expect("config");
//! let summary = pipeline::run(&config).expect("batch run");
//! println!("workbook at {}", summary.workbook_path.display());
//! ```

pub mod config;
pub mod features;
pub mod metadata;
pub mod pipeline;
pub mod plot;
pub mod recording;
pub mod report;
pub mod rsp;
pub mod windows;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, EventSpec, PlotConfig};
pub use features::{EpochRow, FeatureRow};
pub use metadata::{AnimalRecord, AnimalTable, BaselineTable, MetadataError};
pub use pipeline::{PipelineError, RunSummary};
pub use recording::{Recording, RecordingError};
pub use rsp::{ProcessOptions, ProcessedSignal, RspError, Variability};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reference card for the exported features, shown by `pleth-batch features`.
pub const FEATURE_GLOSSARY: &str = r#"
Exported features (one row per animal per window)
-------------------------------------------------

Animal              Animal ID from the time-sync workbook.

RSP_Rate_Mean       Mean breathing rate over the window (breaths/min).

RSP_Amplitude_Mean  Mean breath amplitude over the window.

Ti                  Mean inspiration duration: trough to following peak (s).

Te                  Mean expiration duration: peak to following trough (s).

Ti-Te_Ratio         Ratio of inspiration to expiration duration.

Amp_Norm            Mean amplitude divided by the animal's weight.

Resp_Drive          Normalized amplitude over inspiration duration.

Ve                  Minute ventilation: normalized amplitude times rate.

Apnea_time          Seconds spent below a third of the window's mean rate.

Apnea_rate          Apneic peaks per hour over the window.

Sniff_time          Seconds spent above the sniffing rate threshold.

Sniff_rate          Sniffing peaks per hour over the window.

RRV_SD1, RRV_SD2    Short- and long-term breath-to-breath variability of
                    the whole recording (Poincare descriptors, ms).

Challenge events additionally get per-epoch sheets with the interval
features above plus percent change against a baseline table when one is
configured.
"#;
