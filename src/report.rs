//! Accumulation of feature rows and workbook export.
//!
//! Rows from every recording are gathered into per-window tables and written
//! out as one `.xlsx` workbook: one sheet per window label, plus one sheet
//! per animal/window epoch table.

use chrono::Local;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::path::Path;
use thiserror::Error;

use crate::config::EventSpec;
use crate::features::{self, EpochRow, FeatureRow};

/// Excel caps sheet names at 31 characters.
const MAX_SHEET_NAME: usize = 31;

/// One per-window feature table (one sheet in the workbook).
#[derive(Debug, Clone)]
pub struct EventTable {
    pub label: String,
    pub rows: Vec<FeatureRow>,
}

/// One epoch table for a (condition, sex, animal, window) combination.
#[derive(Debug, Clone)]
pub struct EpochSheet {
    pub name: String,
    pub rows: Vec<EpochRow>,
    /// Percent-change column names appended after the fixed epoch columns
    pub percent_columns: Vec<String>,
}

/// Collects rows across recordings and writes the final workbook.
#[derive(Debug)]
pub struct ReportBuilder {
    event_tables: Vec<EventTable>,
    epoch_sheets: Vec<EpochSheet>,
}

impl ReportBuilder {
    /// Pre-creates the per-window tables in configuration order, so sheet
    /// order is stable regardless of which recordings contribute rows.
    pub fn new(events: &[EventSpec]) -> Self {
        let mut event_tables = Vec::new();
        for event in events {
            event_tables.push(EventTable {
                label: format!("pre_{}", event.name),
                rows: Vec::new(),
            });
            event_tables.push(EventTable {
                label: event.name.clone(),
                rows: Vec::new(),
            });
            if event.challenge {
                event_tables.push(EventTable {
                    label: format!("post{}", event.name),
                    rows: Vec::new(),
                });
            }
        }

        Self {
            event_tables,
            epoch_sheets: Vec::new(),
        }
    }

    /// Append a feature row to the table with the given window label.
    pub fn push_feature_row(&mut self, label: &str, row: FeatureRow) {
        match self.event_tables.iter_mut().find(|t| t.label == label) {
            Some(table) => table.rows.push(row),
            None => {
                log::warn!("no table for window label '{label}'; row dropped");
            }
        }
    }

    pub fn push_epoch_sheet(&mut self, sheet: EpochSheet) {
        self.epoch_sheets.push(sheet);
    }

    pub fn sheet_count(&self) -> usize {
        self.event_tables.len() + self.epoch_sheets.len()
    }

    /// Write the workbook to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), ReportError> {
        let mut workbook = self.build_workbook()?;
        workbook
            .save(path)
            .map_err(|e| ReportError::Save(path.display().to_string(), e))?;
        Ok(())
    }

    /// Render the workbook into memory (used by tests).
    pub fn to_buffer(&self) -> Result<Vec<u8>, ReportError> {
        let mut workbook = self.build_workbook()?;
        workbook
            .save_to_buffer()
            .map_err(|e| ReportError::Save("<buffer>".to_string(), e))
    }

    fn build_workbook(&self) -> Result<Workbook, ReportError> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();
        let mut used_names: Vec<String> = Vec::new();

        for table in &self.event_tables {
            let name = unique_sheet_name(&table.label, &mut used_names);
            let sheet = workbook.add_worksheet();
            sheet.set_name(&name)?;
            write_feature_table(sheet, table, &header_format)?;
        }

        for epoch_sheet in &self.epoch_sheets {
            let name = unique_sheet_name(&epoch_sheet.name, &mut used_names);
            let sheet = workbook.add_worksheet();
            sheet.set_name(&name)?;
            write_epoch_table(sheet, epoch_sheet, &header_format)?;
        }

        Ok(workbook)
    }
}

/// Name of the output workbook: local date, then the configured suffix.
pub fn workbook_filename(suffix: &str) -> String {
    format!("{}-{}.xlsx", Local::now().format("%Y%m%d"), suffix)
}

fn write_feature_table(
    sheet: &mut Worksheet,
    table: &EventTable,
    header_format: &Format,
) -> Result<(), ReportError> {
    for (col, name) in features::COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, header_format)?;
    }

    for (i, row) in table.rows.iter().enumerate() {
        let excel_row = (i + 1) as u32;
        sheet.write_string(excel_row, 0, row.animal.as_str())?;
        for (j, value) in row.values().iter().enumerate() {
            write_number(sheet, excel_row, (j + 1) as u16, *value)?;
        }
    }

    Ok(())
}

fn write_epoch_table(
    sheet: &mut Worksheet,
    epoch_sheet: &EpochSheet,
    header_format: &Format,
) -> Result<(), ReportError> {
    let mut col = 0u16;
    for name in features::EPOCH_COLUMNS.iter() {
        sheet.write_string_with_format(0, col, *name, header_format)?;
        col += 1;
    }
    for name in &epoch_sheet.percent_columns {
        sheet.write_string_with_format(0, col, name.as_str(), header_format)?;
        col += 1;
    }

    for (i, row) in epoch_sheet.rows.iter().enumerate() {
        let excel_row = (i + 1) as u32;
        sheet.write_number(excel_row, 0, row.index as f64)?;
        let mut col = 1u16;
        for value in row.values() {
            write_number(sheet, excel_row, col, value)?;
            col += 1;
        }
        for (_, value) in &row.percent_change {
            write_number(sheet, excel_row, col, *value)?;
            col += 1;
        }
    }

    Ok(())
}

/// Non-finite values (empty windows, zero denominators) become blank cells.
fn write_number(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: f64,
) -> Result<(), ReportError> {
    if value.is_finite() {
        sheet.write_number(row, col, value)?;
    }
    Ok(())
}

/// Make a label usable as an Excel sheet name: strip forbidden characters,
/// enforce the length cap, and de-duplicate with a numeric suffix.
fn unique_sheet_name(label: &str, used: &mut Vec<String>) -> String {
    const FORBIDDEN: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

    let mut base: String = label
        .chars()
        .filter(|c| !FORBIDDEN.contains(c))
        .take(MAX_SHEET_NAME)
        .collect();
    if base.is_empty() {
        base = "sheet".to_string();
    }

    let mut name = base.clone();
    let mut counter = 2usize;
    while used.iter().any(|n| n == &name) {
        let suffix = format!("~{counter}");
        let trimmed: String = base
            .chars()
            .take(MAX_SHEET_NAME - suffix.len())
            .collect();
        name = format!("{trimmed}{suffix}");
        counter += 1;
    }

    used.push(name.clone());
    name
}

/// Report export errors.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),
    #[error("could not save workbook {0}: {1}")]
    Save(String, #[source] rust_xlsxwriter::XlsxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{Reader, Xlsx};
    use std::io::Cursor;

    fn sample_row(animal: &str, rate: f64) -> FeatureRow {
        FeatureRow {
            animal: animal.to_string(),
            rate_mean: rate,
            amplitude_mean: 0.8,
            ti: 0.3,
            te: 0.35,
            ti_te_ratio: 0.857,
            resp_drive: 0.09,
            ve: 3.2,
            amp_norm: 0.027,
            apnea_time: 0.0,
            apnea_rate: 0.0,
            sniff_time: 1.5,
            sniff_rate: 90.0,
            rrv_sd1: 11.0,
            rrv_sd2: 40.0,
        }
    }

    #[test]
    fn test_tables_follow_event_configuration() {
        let events = vec![EventSpec::new("hypoxia"), EventSpec::challenge("co2")];
        let report = ReportBuilder::new(&events);

        let labels: Vec<&str> = report.event_tables.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["pre_hypoxia", "hypoxia", "pre_co2", "co2", "postco2"]);
    }

    #[test]
    fn test_workbook_roundtrip() {
        let events = vec![EventSpec::new("event")];
        let mut report = ReportBuilder::new(&events);
        report.push_feature_row("event", sample_row("rat01", 118.0));
        report.push_feature_row("event", sample_row("rat02", 104.0));
        report.push_feature_row("pre_event", sample_row("rat01", 95.0));

        let buf = report.to_buffer().unwrap();
        let mut workbook = Xlsx::new(Cursor::new(buf)).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["pre_event", "event"]);

        let range = workbook.worksheet_range("event").unwrap();
        assert_eq!(range.height(), 3); // header + 2 animals
        let header: Vec<String> = range.rows().next().unwrap().iter().map(|c| c.to_string()).collect();
        assert_eq!(header, features::COLUMNS.to_vec());

        let first: Vec<String> = range.rows().nth(1).unwrap().iter().map(|c| c.to_string()).collect();
        assert_eq!(first[0], "rat01");
        assert_eq!(first[1], "118");
    }

    #[test]
    fn test_epoch_sheet_written_with_percent_columns() {
        let mut report = ReportBuilder::new(&[EventSpec::challenge("challenge")]);
        report.push_epoch_sheet(EpochSheet {
            name: "ctrlMrat01challengeepochs".to_string(),
            rows: vec![EpochRow {
                index: 1,
                rate_mean: 120.0,
                amplitude_mean: 0.8,
                ti: 0.25,
                te: 0.25,
                ti_te_ratio: 1.0,
                amp_norm: 0.027,
                ve: 3.24,
                resp_drive: 0.108,
                percent_change: vec![("RSP_Rate_Mean_percent_change".to_string(), 9.1)],
            }],
            percent_columns: vec!["RSP_Rate_Mean_percent_change".to_string()],
        });

        let buf = report.to_buffer().unwrap();
        let mut workbook = Xlsx::new(Cursor::new(buf)).unwrap();
        let range = workbook
            .worksheet_range("ctrlMrat01challengeepochs")
            .unwrap();

        let header: Vec<String> = range.rows().next().unwrap().iter().map(|c| c.to_string()).collect();
        assert_eq!(header.len(), features::EPOCH_COLUMNS.len() + 1);
        assert_eq!(header.last().unwrap(), "RSP_Rate_Mean_percent_change");
    }

    #[test]
    fn test_nan_cells_left_blank() {
        let mut report = ReportBuilder::new(&[EventSpec::new("event")]);
        let mut row = sample_row("rat01", 100.0);
        row.ti = f64::NAN;
        report.push_feature_row("event", row);

        // Must not error while writing.
        let buf = report.to_buffer().unwrap();
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_sheet_names_truncated_and_unique() {
        let mut used = Vec::new();
        let long = "a_very_long_condition_name_for_one_animal_epochs";
        let first = unique_sheet_name(long, &mut used);
        let second = unique_sheet_name(long, &mut used);

        assert_eq!(first.len(), MAX_SHEET_NAME);
        assert_eq!(second.len(), MAX_SHEET_NAME);
        assert_ne!(first, second);
        assert!(second.ends_with("~2"));
    }

    #[test]
    fn test_sheet_names_strip_forbidden_characters() {
        let mut used = Vec::new();
        let name = unique_sheet_name("ctrl/M:rat01*", &mut used);
        assert_eq!(name, "ctrlMrat01");
    }

    #[test]
    fn test_workbook_filename_shape() {
        let name = workbook_filename("resp_bx");
        assert!(name.ends_with("-resp_bx.xlsx"));
        assert_eq!(name.len(), "YYYYMMDD-resp_bx.xlsx".len());
    }
}
