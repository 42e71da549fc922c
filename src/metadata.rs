//! Animal metadata and baseline tables.
//!
//! The time-sync workbook carries one row per animal: its ID, weight in
//! grams, sex, condition, and `<event>_start`/`<event>_end` timestamps in
//! seconds from the start of the recording.

use calamine::{open_workbook_auto, Data, Range, Reader};
use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;
use thiserror::Error;

const ID_COLUMN: &str = "ID";
const WEIGHT_COLUMN: &str = "weight";
const SEX_COLUMN: &str = "sex";
const CONDITION_COLUMN: &str = "Condition";
const ANIMAL_COLUMN: &str = "Animal";

/// One animal's metadata row.
#[derive(Debug, Clone)]
pub struct AnimalRecord {
    pub id: String,
    /// Body weight in grams
    pub weight: f64,
    pub sex: String,
    pub condition: String,
    events: HashMap<String, (f64, f64)>,
}

impl AnimalRecord {
    /// Start/end seconds of a named event.
    pub fn event_bounds(&self, event: &str) -> Result<(f64, f64), MetadataError> {
        self.events
            .get(event)
            .copied()
            .ok_or_else(|| MetadataError::MissingEvent {
                animal: self.id.clone(),
                event: event.to_string(),
            })
    }

    /// Names of the events present on this row.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(|s| s.as_str())
    }
}

/// The full animal metadata table.
#[derive(Debug, Clone)]
pub struct AnimalTable {
    records: Vec<AnimalRecord>,
}

impl AnimalTable {
    /// Read the table from a workbook sheet on disk.
    pub fn from_workbook(path: &Path, sheet: &str) -> Result<Self, MetadataError> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| MetadataError::Workbook(path.display().to_string(), e.to_string()))?;
        let range = workbook
            .worksheet_range(sheet)
            .map_err(|e| MetadataError::Workbook(path.display().to_string(), e.to_string()))?;
        Self::from_range(&range)
    }

    /// Read the table from an already-opened xlsx stream.
    pub fn from_reader<R: Read + Seek>(reader: R, sheet: &str) -> Result<Self, MetadataError> {
        let mut workbook = calamine::Xlsx::new(reader)
            .map_err(|e| MetadataError::Workbook("<stream>".to_string(), e.to_string()))?;
        let range = workbook
            .worksheet_range(sheet)
            .map_err(|e| MetadataError::Workbook("<stream>".to_string(), e.to_string()))?;
        Self::from_range(&range)
    }

    fn from_range(range: &Range<Data>) -> Result<Self, MetadataError> {
        let mut rows = range.rows();
        let header = rows.next().ok_or(MetadataError::EmptyTable)?;
        let columns = header_map(header);

        let id_col = required(&columns, ID_COLUMN)?;
        let weight_col = required(&columns, WEIGHT_COLUMN)?;
        let sex_col = required(&columns, SEX_COLUMN)?;
        let condition_col = required(&columns, CONDITION_COLUMN)?;

        // Event columns come in `<name>_start` / `<name>_end` pairs.
        let mut event_cols: Vec<(String, usize, usize)> = Vec::new();
        for (name, &start_col) in &columns {
            if let Some(event) = name.strip_suffix("_start") {
                if let Some(&end_col) = columns.get(&format!("{event}_end")) {
                    event_cols.push((event.to_string(), start_col, end_col));
                }
            }
        }

        let mut records = Vec::new();
        for (row_index, row) in rows.enumerate() {
            let Some(id) = cell_string(row.get(id_col)) else {
                continue; // blank trailing rows
            };

            let weight = cell_f64(row.get(weight_col)).ok_or(MetadataError::BadCell {
                row: row_index + 2,
                column: WEIGHT_COLUMN.to_string(),
            })?;
            let sex = cell_string(row.get(sex_col)).unwrap_or_default();
            let condition = cell_string(row.get(condition_col)).unwrap_or_default();

            let mut events = HashMap::new();
            for (event, start_col, end_col) in &event_cols {
                let start = cell_f64(row.get(*start_col));
                let end = cell_f64(row.get(*end_col));
                if let (Some(start), Some(end)) = (start, end) {
                    events.insert(event.clone(), (start, end));
                }
            }

            records.push(AnimalRecord {
                id,
                weight,
                sex,
                condition,
                events,
            });
        }

        if records.is_empty() {
            return Err(MetadataError::EmptyTable);
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Find the animal a recording belongs to.
    ///
    /// An ID matches when it equals the recording's filename stem or begins
    /// with it. The first match wins; further matches are reported.
    pub fn match_recording(&self, stem: &str) -> Result<&AnimalRecord, MetadataError> {
        let mut matches = self.records.iter().filter(|r| r.id.starts_with(stem));

        let record = matches
            .next()
            .ok_or_else(|| MetadataError::UnknownAnimal(stem.to_string()))?;
        if matches.next().is_some() {
            log::warn!("several animal IDs match recording '{stem}'; using '{}'", record.id);
        }
        Ok(record)
    }
}

/// A baseline feature table for percent-change computation, keyed by animal.
#[derive(Debug, Clone)]
pub struct BaselineTable {
    columns: Vec<String>,
    rows: HashMap<String, HashMap<String, f64>>,
}

impl BaselineTable {
    pub fn from_workbook(path: &Path, sheet: &str) -> Result<Self, MetadataError> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| MetadataError::Workbook(path.display().to_string(), e.to_string()))?;
        let range = workbook
            .worksheet_range(sheet)
            .map_err(|e| MetadataError::Workbook(path.display().to_string(), e.to_string()))?;
        Self::from_range(&range)
    }

    pub fn from_reader<R: Read + Seek>(reader: R, sheet: &str) -> Result<Self, MetadataError> {
        let mut workbook = calamine::Xlsx::new(reader)
            .map_err(|e| MetadataError::Workbook("<stream>".to_string(), e.to_string()))?;
        let range = workbook
            .worksheet_range(sheet)
            .map_err(|e| MetadataError::Workbook("<stream>".to_string(), e.to_string()))?;
        Self::from_range(&range)
    }

    fn from_range(range: &Range<Data>) -> Result<Self, MetadataError> {
        let mut rows_iter = range.rows();
        let header = rows_iter.next().ok_or(MetadataError::EmptyTable)?;
        let columns_map = header_map(header);
        let animal_col = required(&columns_map, ANIMAL_COLUMN)?;

        let mut columns: Vec<(String, usize)> =
            columns_map.iter().map(|(n, &i)| (n.clone(), i)).collect();
        columns.sort_by_key(|&(_, i)| i);

        let mut rows = HashMap::new();
        for row in rows_iter {
            let Some(animal) = cell_string(row.get(animal_col)) else {
                continue;
            };
            let mut values = HashMap::new();
            for (name, col) in &columns {
                if let Some(v) = cell_f64(row.get(*col)) {
                    values.insert(name.clone(), v);
                }
            }
            rows.insert(animal, values);
        }

        if rows.is_empty() {
            return Err(MetadataError::EmptyTable);
        }

        Ok(Self {
            columns: columns.into_iter().map(|(n, _)| n).collect(),
            rows,
        })
    }

    /// Columns carrying mean or variability measures, in sheet order.
    pub fn measure_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.contains("Mean") || c.contains("SD"))
            .map(|c| c.as_str())
            .collect()
    }

    /// Baseline value of a column for one animal.
    pub fn value(&self, animal: &str, column: &str) -> Option<f64> {
        self.rows.get(animal)?.get(column).copied()
    }

    pub fn contains_animal(&self, animal: &str) -> bool {
        self.rows.contains_key(animal)
    }
}

fn header_map(header: &[Data]) -> HashMap<String, usize> {
    header
        .iter()
        .enumerate()
        .filter_map(|(i, cell)| cell_string(Some(cell)).map(|name| (name, i)))
        .collect()
}

fn required(columns: &HashMap<String, usize>, name: &str) -> Result<usize, MetadataError> {
    columns
        .get(name)
        .copied()
        .ok_or_else(|| MetadataError::MissingColumn(name.to_string()))
}

fn cell_string(cell: Option<&Data>) -> Option<String> {
    match cell? {
        Data::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(format!("{f}")),
        _ => None,
    }
}

fn cell_f64(cell: Option<&Data>) -> Option<f64> {
    match cell? {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Metadata errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("could not read workbook {0}: {1}")]
    Workbook(String, String),
    #[error("metadata sheet has no data rows")]
    EmptyTable,
    #[error("metadata sheet is missing required column '{0}'")]
    MissingColumn(String),
    #[error("row {row}: column '{column}' is not a number")]
    BadCell { row: usize, column: String },
    #[error("no animal ID matches recording '{0}'")]
    UnknownAnimal(String),
    #[error("animal '{animal}' has no start/end columns for event '{event}'")]
    MissingEvent { animal: String, event: String },
    #[error("animal '{0}' has no row in the baseline table")]
    MissingBaselineRow(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use std::io::Cursor;

    fn animal_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let header = [
            "ID",
            "weight",
            "sex",
            "Condition",
            "event_start",
            "event_end",
            "challenge_start",
            "challenge_end",
        ];
        for (col, name) in header.iter().enumerate() {
            sheet.write_string(0, col as u16, *name).unwrap();
        }
        sheet.write_string(1, 0, "rat01_base").unwrap();
        sheet.write_number(1, 1, 31.5).unwrap();
        sheet.write_string(1, 2, "M").unwrap();
        sheet.write_string(1, 3, "ctrl").unwrap();
        sheet.write_number(1, 4, 120.0).unwrap();
        sheet.write_number(1, 5, 300.0).unwrap();
        sheet.write_number(1, 6, 600.0).unwrap();
        sheet.write_number(1, 7, 900.0).unwrap();

        sheet.write_string(2, 0, "rat02_base").unwrap();
        sheet.write_number(2, 1, 28.0).unwrap();
        sheet.write_string(2, 2, "F").unwrap();
        sheet.write_string(2, 3, "cKO").unwrap();
        sheet.write_number(2, 4, 100.0).unwrap();
        sheet.write_number(2, 5, 280.0).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_parse_animal_table() {
        let buf = animal_workbook();
        let table = AnimalTable::from_reader(Cursor::new(buf), "Sheet1").unwrap();

        assert_eq!(table.len(), 2);
        let rat = table.match_recording("rat01_base").unwrap();
        assert_eq!(rat.weight, 31.5);
        assert_eq!(rat.sex, "M");
        assert_eq!(rat.condition, "ctrl");
        assert_eq!(rat.event_bounds("event").unwrap(), (120.0, 300.0));
        assert_eq!(rat.event_bounds("challenge").unwrap(), (600.0, 900.0));
    }

    #[test]
    fn test_stem_prefix_matching() {
        let buf = animal_workbook();
        let table = AnimalTable::from_reader(Cursor::new(buf), "Sheet1").unwrap();

        // A truncated stem still resolves by prefix.
        let rat = table.match_recording("rat02").unwrap();
        assert_eq!(rat.id, "rat02_base");
    }

    #[test]
    fn test_unknown_animal_is_an_error() {
        let buf = animal_workbook();
        let table = AnimalTable::from_reader(Cursor::new(buf), "Sheet1").unwrap();
        assert!(matches!(
            table.match_recording("mouse99"),
            Err(MetadataError::UnknownAnimal(_))
        ));
    }

    #[test]
    fn test_missing_event_columns_are_an_error() {
        let buf = animal_workbook();
        let table = AnimalTable::from_reader(Cursor::new(buf), "Sheet1").unwrap();
        let rat = table.match_recording("rat01_base").unwrap();
        assert!(matches!(
            rat.event_bounds("hypercapnia"),
            Err(MetadataError::MissingEvent { .. })
        ));
    }

    #[test]
    fn test_event_row_without_times_is_missing() {
        let buf = animal_workbook();
        let table = AnimalTable::from_reader(Cursor::new(buf), "Sheet1").unwrap();
        // rat02 has no challenge times filled in.
        let rat = table.match_recording("rat02_base").unwrap();
        assert!(rat.event_bounds("challenge").is_err());
    }

    #[test]
    fn test_missing_required_column() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "ID").unwrap();
        sheet.write_string(1, 0, "rat01").unwrap();
        let buf = workbook.save_to_buffer().unwrap();

        assert!(matches!(
            AnimalTable::from_reader(Cursor::new(buf), "Sheet1"),
            Err(MetadataError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_baseline_table() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, name) in ["Animal", "RSP_Rate_Mean", "RSP_Amplitude_Mean", "RRV_SD1"]
            .iter()
            .enumerate()
        {
            sheet.write_string(0, col as u16, *name).unwrap();
        }
        sheet.write_string(1, 0, "rat01_base").unwrap();
        sheet.write_number(1, 1, 110.0).unwrap();
        sheet.write_number(1, 2, 0.8).unwrap();
        sheet.write_number(1, 3, 12.0).unwrap();
        let buf = workbook.save_to_buffer().unwrap();

        let baseline = BaselineTable::from_reader(Cursor::new(buf), "Sheet1").unwrap();
        assert_eq!(
            baseline.measure_columns(),
            vec!["RSP_Rate_Mean", "RSP_Amplitude_Mean", "RRV_SD1"]
        );
        assert_eq!(baseline.value("rat01_base", "RSP_Rate_Mean"), Some(110.0));
        assert!(baseline.contains_animal("rat01_base"));
        assert!(!baseline.contains_animal("rat09"));
    }
}
