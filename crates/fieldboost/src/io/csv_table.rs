//! CSV/TSV tables in and out of the in-memory engine.
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::engine::memory::{ColumnData, InMemoryEngine};
use crate::engine::DatasetId;

/// How to turn a delimited file into a dataset.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CsvTableConfig {
    /// Field delimiter. When `None` it is picked from the extension
    /// (`.tsv` is tab separated, everything else comma separated).
    pub delimiter: Option<char>,
    /// Columns loaded but not used as tree inputs.
    pub ignore_columns: Vec<String>,
    /// Columns kept categorical even if every value parses as a number.
    pub categorical_columns: Vec<String>,
}

fn delimiter_for(path: &Path, config: &CsvTableConfig) -> Result<u8> {
    match config.delimiter {
        Some(c) if c.is_ascii() => Ok(c as u8),
        Some(c) => Err(anyhow!("Delimiter {:?} is not an ASCII character", c)),
        None => Ok(match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => b',',
        }),
    }
}

fn infer_column(name: &str, cells: Vec<String>, config: &CsvTableConfig) -> ColumnData {
    if config.categorical_columns.iter().any(|c| c == name) {
        return ColumnData::Categorical(cells);
    }
    let parsed: Option<Vec<f64>> = cells
        .iter()
        .map(|cell| {
            let cell = cell.trim();
            if cell.is_empty() {
                Some(f64::NAN)
            } else {
                cell.parse::<f64>().ok()
            }
        })
        .collect();
    match parsed {
        Some(values) if values.iter().any(|v| !v.is_nan()) => ColumnData::Numeric(values),
        _ => ColumnData::Categorical(cells),
    }
}

/// Load a header-first delimited file as a new source dataset.
pub fn read_csv<P: AsRef<Path>>(
    engine: &InMemoryEngine,
    path: P,
    config: &CsvTableConfig,
) -> Result<DatasetId> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path, config)?)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open table: {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];

    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read row {}", line + 1))?;
        if record.len() != headers.len() {
            return Err(anyhow!(
                "Row {} has {} fields, expected {}",
                line + 1,
                record.len(),
                headers.len()
            ));
        }
        for (column, value) in cells.iter_mut().zip(record.iter()) {
            column.push(value.to_string());
        }
    }

    let columns = headers
        .iter()
        .zip(cells)
        .map(|(name, values)| (name.clone(), infer_column(name, values, config)))
        .collect();
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table")
        .to_string();
    let mut dataset = engine.insert_dataset(&name, columns)?;
    log::info!("Loaded {} with {} columns from {}", dataset, headers.len(), path.display());

    for column in &config.ignore_columns {
        dataset = engine
            .set_preferred(&dataset, column, false)
            .with_context(|| format!("Cannot ignore column `{}`", column))?;
    }
    Ok(dataset)
}

/// Write a dataset as CSV, optionally keeping only `columns` (in that order).
pub fn write_csv<P: AsRef<Path>>(
    engine: &InMemoryEngine,
    dataset: &DatasetId,
    path: P,
    columns: Option<&[String]>,
) -> Result<()> {
    let path = path.as_ref();
    let (header, rows) = engine.rows(dataset)?;
    let picks: Vec<usize> = match columns {
        Some(wanted) => wanted
            .iter()
            .map(|w| {
                header
                    .iter()
                    .position(|h| h == w)
                    .ok_or_else(|| anyhow!("Dataset {} has no column `{}`", dataset, w))
            })
            .collect::<Result<_>>()?,
        None => (0..header.len()).collect(),
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter_for(path, &CsvTableConfig::default())?)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(picks.iter().map(|&i| header[i].as_str()))?;
    for row in &rows {
        writer.write_record(picks.iter().map(|&i| row[i].as_str()))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DataEngine, Optype};
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn infers_optypes_and_preferred_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "plants.csv",
            "id,height,kind\n1,0.5,fern\n2,,moss\n3,1.5,fern\n",
        );
        let engine = InMemoryEngine::default();
        let config = CsvTableConfig {
            ignore_columns: vec!["id".to_string()],
            ..Default::default()
        };
        let id = read_csv(&engine, &path, &config).unwrap();
        let meta = engine.fetch_metadata(&id).unwrap();

        assert_eq!(meta.rows, 3);
        let height = meta.field_by_name("height").unwrap();
        assert_eq!(height.optype, Optype::Numeric);
        assert_eq!(height.summary.population, 2);
        assert_eq!(meta.field_by_name("kind").unwrap().optype, Optype::Categorical);
        assert!(!meta.field_by_name("id").unwrap().preferred);
    }

    #[test]
    fn numeric_labels_can_be_forced_categorical() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "digits.tsv", "x\tdigit\n0.1\t1\n0.2\t2\n");
        let engine = InMemoryEngine::default();
        let config = CsvTableConfig {
            categorical_columns: vec!["digit".to_string()],
            ..Default::default()
        };
        let id = read_csv(&engine, &path, &config).unwrap();
        let meta = engine.fetch_metadata(&id).unwrap();
        assert_eq!(meta.field_by_name("digit").unwrap().optype, Optype::Categorical);
        assert_eq!(meta.field_by_name("x").unwrap().optype, Optype::Numeric);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bad.csv", "a,b\n1\n");
        let engine = InMemoryEngine::default();
        assert!(read_csv(&engine, &path, &CsvTableConfig::default()).is_err());
    }

    #[test]
    fn writes_selected_columns() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(&dir, "in.csv", "a,b\n1,x\n2,y\n");
        let engine = InMemoryEngine::default();
        let id = read_csv(&engine, &input, &CsvTableConfig::default()).unwrap();

        let output = dir.path().join("out.csv");
        write_csv(&engine, &id, &output, Some(&["b".to_string()])).unwrap();
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written, "b\nx\ny\n");
    }
}
