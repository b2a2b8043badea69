//! Flat tabular data loaded from and written back to CSV.
//!
//! A [`Table`] is a header row plus rows of optional cells. `None` marks a
//! missing value: either an empty field or one of the usual missing-value
//! spellings (`NA`, `NaN`, `null`, ...). Every row always holds exactly one
//! cell per header.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

/// Field spellings read as a missing value.
pub const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write CSV: {0}")]
    Write(#[source] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row} has {found} fields but the header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("no CSV files found in the downloaded dataset")]
    NoCsvFiles,
}

pub fn is_missing(field: &str) -> bool {
    MISSING_MARKERS.contains(&field)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Parse CSV with a header row. Short rows are padded with missing
    /// cells; rows longer than the header are rejected. Repeated header
    /// names are renamed, see [`dedupe_headers`].
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = dedupe_headers(rdr.headers()?.iter().map(str::to_owned).collect());
        let width = headers.len();
        let mut rows = Vec::new();

        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() > width {
                return Err(TableError::RaggedRow {
                    row: idx + 1,
                    expected: width,
                    found: record.len(),
                });
            }
            let mut row: Vec<Option<String>> = record
                .iter()
                .map(|field| {
                    if is_missing(field) {
                        None
                    } else {
                        Some(field.to_owned())
                    }
                })
                .collect();
            row.resize(width, None);
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    pub fn read_csv(path: &Path) -> Result<Self, TableError> {
        let file = std::fs::File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_csv_reader(file)?;
        debug!(
            path = %path.display(),
            rows = table.len(),
            columns = table.headers.len(),
            "Read CSV file"
        );
        Ok(table)
    }

    /// Stack tables vertically. Headers are the union in first-seen order;
    /// a table lacking a column contributes missing cells for it.
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut headers: Vec<String> = Vec::new();
        for table in &tables {
            for h in &table.headers {
                if !headers.contains(h) {
                    headers.push(h.clone());
                }
            }
        }

        let mut rows = Vec::new();
        for table in tables {
            let positions: Vec<usize> = table
                .headers
                .iter()
                .map(|h| headers.iter().position(|x| x == h).unwrap_or_default())
                .collect();
            for row in table.rows {
                let mut out = vec![None; headers.len()];
                for (cell, &pos) in row.into_iter().zip(&positions) {
                    out[pos] = cell;
                }
                rows.push(out);
            }
        }

        Table { headers, rows }
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, TableError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        wtr.into_inner()
            .map_err(|e| TableError::Write(e.into_error()))
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), TableError> {
        let bytes = self.to_csv_bytes()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| TableError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, bytes).map_err(|source| {
            error!(error = ?source, path = %path.display(), "Failed to write CSV file");
            TableError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(path = %path.display(), rows = self.len(), "Wrote CSV file");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    /// Removes a column. Returns false when it did not exist.
    pub fn drop_column(&mut self, column: &str) -> bool {
        let Some(idx) = self.column_index(column) else {
            return false;
        };
        self.headers.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        true
    }

    pub fn column_values(&self, column: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| r[idx].as_deref()).collect())
    }

    /// Applies `f` to every present cell of `column`. Missing cells are left
    /// untouched. Returns `None` when the column does not exist, otherwise the
    /// number of cells rewritten.
    pub fn map_column<F, E>(&mut self, column: &str, mut f: F) -> Result<Option<usize>, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        let Some(idx) = self.column_index(column) else {
            return Ok(None);
        };
        let mut mapped = 0;
        for row in &mut self.rows {
            if let Some(value) = row[idx].as_deref() {
                row[idx] = Some(f(value)?);
                mapped += 1;
            }
        }
        Ok(Some(mapped))
    }
}

/// Renames repeated header names to `name.1`, `name.2`, ... so every
/// column keeps its own values. A suffix already used by another header is
/// skipped.
pub fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let original: HashSet<String> = headers.iter().cloned().collect();
    let mut used: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut out = Vec::with_capacity(headers.len());

    for header in headers {
        if used.insert(header.clone()) {
            out.push(header);
            continue;
        }
        let mut n = 1;
        let renamed = loop {
            let candidate = format!("{header}.{n}");
            if !original.contains(&candidate) && !used.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        warn!(header = %header, renamed = %renamed, "Renamed duplicate CSV header");
        used.insert(renamed.clone());
        out.push(renamed);
    }
    out
}

/// Loads and concatenates every file. An empty list is an error.
pub fn load_csv_files(paths: &[PathBuf]) -> Result<Table, TableError> {
    if paths.is_empty() {
        error!("No CSV files to load");
        return Err(TableError::NoCsvFiles);
    }
    let tables = paths
        .iter()
        .map(|p| Table::read_csv(p))
        .collect::<Result<Vec<_>, _>>()?;
    let table = Table::concat(tables);
    info!(
        files = paths.len(),
        rows = table.len(),
        columns = table.headers.len(),
        "Loaded CSV files into one table"
    );
    Ok(table)
}
