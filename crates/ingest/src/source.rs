// Workbook and delimited-text readers

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use kolet_schema::{excel_serial_to_datetime, RawValue};

use crate::error::FatalIngestionError;

/// Sheet name reported for CSV/TSV input.
pub const DELIMITED_SHEET: &str = "Sheet1";

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "xla", "ods"];
const DELIMITED_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];

/// Bytes read from the top of a delimited file to guess its delimiter.
const SNIFF_BYTES: usize = 16 * 1024;

/// A physical row: 1-based row number plus its cells.
pub type SourceRow = (u32, Vec<RawValue>);

pub type RowIter<'a> = Box<dyn Iterator<Item = Result<SourceRow, FatalIngestionError>> + 'a>;

pub enum SourceFile {
    Workbook {
        path: PathBuf,
        workbook: Sheets<BufReader<File>>,
    },
    Delimited {
        path: PathBuf,
        delimiter: u8,
    },
}

impl SourceFile {
    /// Pick a reader by extension.
    pub fn open(path: &Path) -> Result<Self, FatalIngestionError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let shown = path.display().to_string();

        if WORKBOOK_EXTENSIONS.contains(&extension.as_str()) {
            let workbook = open_workbook_auto(path).map_err(|e| FatalIngestionError::CorruptWorkbook {
                path: shown,
                reason: e.to_string(),
            })?;
            return Ok(Self::Workbook {
                path: path.to_path_buf(),
                workbook,
            });
        }
        if DELIMITED_EXTENSIONS.contains(&extension.as_str()) {
            let delimiter = if extension == "tsv" {
                b'\t'
            } else {
                sniff_delimiter(&read_prefix(path)?)
            };
            return Ok(Self::Delimited {
                path: path.to_path_buf(),
                delimiter,
            });
        }
        Err(FatalIngestionError::UnsupportedFormat {
            path: shown,
            extension,
        })
    }

    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| {
                WORKBOOK_EXTENSIONS.contains(&ext.as_str()) || DELIMITED_EXTENSIONS.contains(&ext.as_str())
            })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        match self {
            Self::Workbook { workbook, .. } => workbook.sheet_names().to_vec(),
            Self::Delimited { .. } => vec![DELIMITED_SHEET.to_string()],
        }
    }

    /// Rows of one sheet, in file order. Delimited files are streamed.
    pub fn rows(&mut self, sheet: &str) -> Result<RowIter<'_>, FatalIngestionError> {
        match self {
            Self::Workbook { path, workbook } => {
                let range = workbook
                    .worksheet_range(sheet)
                    .map_err(|e| FatalIngestionError::CorruptWorkbook {
                        path: path.display().to_string(),
                        reason: format!("sheet '{sheet}': {e}"),
                    })?;
                Ok(Box::new(RangeRows::new(range).map(Ok)))
            }
            Self::Delimited { path, delimiter } => {
                let shown = path.display().to_string();
                let file = File::open(&*path).map_err(|e| FatalIngestionError::Unreadable {
                    path: shown.clone(),
                    reason: e.to_string(),
                })?;
                let reader = csv::ReaderBuilder::new()
                    .delimiter(*delimiter)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(BufReader::new(file));
                let iter = reader.into_byte_records().enumerate().map(move |(idx, result)| {
                    let record = result.map_err(|e| FatalIngestionError::Unreadable {
                        path: shown.clone(),
                        reason: e.to_string(),
                    })?;
                    let number = record
                        .position()
                        .map(|p| p.line() as u32)
                        .unwrap_or(idx as u32 + 1);
                    Ok((number, record.iter().map(decode_field).collect()))
                });
                Ok(Box::new(iter))
            }
        }
    }
}

/// Rows of a loaded sheet, converted one at a time.
struct RangeRows {
    range: Range<Data>,
    first_row: u32,
    next: usize,
}

impl RangeRows {
    fn new(range: Range<Data>) -> Self {
        // Range may not start at A1.
        let (first_row, _) = range.start().unwrap_or((0, 0));
        Self {
            range,
            first_row,
            next: 0,
        }
    }
}

impl Iterator for RangeRows {
    type Item = SourceRow;

    fn next(&mut self) -> Option<SourceRow> {
        let row = self.next;
        if row >= self.range.height() {
            return None;
        }
        let cells = (0..self.range.width())
            .map(|col| self.range.get((row, col)).map_or(RawValue::Empty, cell_value))
            .collect();
        self.next += 1;
        let number = self.first_row.saturating_add(row as u32).saturating_add(1);
        Some((number, cells))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.range.height().saturating_sub(self.next);
        (left, Some(left))
    }
}

fn cell_value(cell: &Data) -> RawValue {
    match cell {
        Data::Empty => RawValue::Empty,
        Data::String(s) => RawValue::Text(s.clone()),
        Data::Float(n) => RawValue::Number(*n),
        Data::Int(n) => RawValue::Int(*n),
        Data::Bool(b) => RawValue::Bool(*b),
        // Error cells carry no usable value.
        Data::Error(_) => RawValue::Empty,
        Data::DateTime(dt) => {
            // Assumes the 1900 date system; calamine does not expose the
            // workbook's 1904 flag here.
            let serial = dt.as_f64();
            excel_serial_to_datetime(serial)
                .map(RawValue::DateTime)
                .unwrap_or(RawValue::Number(serial))
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => RawValue::Text(s.clone()),
    }
}

/// UTF-8 when valid, Windows-1252 otherwise (Excel CSV exports).
fn decode_field(bytes: &[u8]) -> RawValue {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    };
    if text.trim().is_empty() {
        RawValue::Empty
    } else {
        RawValue::Text(text)
    }
}

fn read_prefix(path: &Path) -> Result<String, FatalIngestionError> {
    let file = File::open(path).map_err(|e| FatalIngestionError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut buf = Vec::with_capacity(SNIFF_BYTES);
    file.take(SNIFF_BYTES as u64)
        .read_to_end(&mut buf)
        .map_err(|e| FatalIngestionError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => encoding_rs::WINDOWS_1252.decode(e.as_bytes()).0.into_owned(),
    })
}

/// Most likely field delimiter among tab, semicolon, comma and pipe.
///
/// Each candidate is scored on the sample's last lines, which skips report
/// title rows: lines sharing the final line's field count, times that count.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    // The last sampled line may be cut mid-record.
    let sample: Vec<&str> = match lines.len() {
        0 => return b',',
        1 => lines,
        n => lines[..n - 1].iter().rev().take(10).copied().collect(),
    };

    let mut best = b',';
    let mut best_score = 0u64;
    for &delim in candidates {
        let counts: Vec<usize> = sample
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let target = counts.first().copied().unwrap_or(0);
        if target <= 1 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }
    best
}

/// First `limit` rows of the first sheet as display text, for schema detection.
pub fn peek_rows(path: &Path, limit: usize) -> Result<Vec<Vec<String>>, FatalIngestionError> {
    let mut source = SourceFile::open(path)?;
    let Some(sheet) = source.sheet_names().into_iter().next() else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for row in source.rows(&sheet)?.take(limit) {
        let (_, cells) = row?;
        out.push(cells.iter().map(RawValue::to_text).collect());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_rows_number_from_the_sheet_origin() {
        let mut range: Range<Data> = Range::new((2, 0), (3, 1));
        range.set_value((2, 0), Data::String("Day".into()));
        range.set_value((2, 1), Data::String("Spend".into()));
        range.set_value((3, 0), Data::String("2025-05-01".into()));
        range.set_value((3, 1), Data::Float(4.2));

        let mut rows = RangeRows::new(range);
        assert_eq!(rows.size_hint(), (2, Some(2)));
        let (number, header) = rows.next().unwrap();
        assert_eq!(number, 3);
        assert_eq!(header[1], RawValue::Text("Spend".into()));
        assert_eq!(rows.size_hint(), (1, Some(1)));
        let (number, values) = rows.next().unwrap();
        assert_eq!(number, 4);
        assert_eq!(values.len(), 2);
        assert!(rows.next().is_none());
    }

    #[test]
    fn sniff_semicolon_delimiter() {
        let content = "Name;Age;City\nAlice;30;Paris\nBob;25;Lyon\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn sniff_tab_with_title_rows() {
        let content = "Campaign performance\nAll time\nCampaign\tDay\tCost\nA\t2025-05-01\t1,20\nB\t2025-05-01\t3,40\n";
        assert_eq!(sniff_delimiter(content), b'\t');
    }

    #[test]
    fn sniff_semicolon_with_commas_in_values() {
        let content = "Name;Amount\nAlice;1,50\nBob;2,75\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn windows_1252_fallback() {
        assert_eq!(decode_field(b"Caf\xe9"), RawValue::Text("Café".into()));
        assert_eq!(decode_field(b"  "), RawValue::Empty);
    }

    #[test]
    fn unsupported_extension() {
        let err = SourceFile::open(Path::new("report.pdf")).err().unwrap();
        assert!(matches!(err, FatalIngestionError::UnsupportedFormat { ref extension, .. } if extension == "pdf"));
    }
}
