//! CSV file source read through Polars in bounded windows.
//!
//! The file is walked once per pass with a record cursor: each window
//! collects the raw bytes of its records and hands them, behind the header,
//! to a Polars CSV reader. Sequential windows never re-read earlier rows.

use super::RawSource;
use crate::error::{CleaningError, Result, ResultExt};
use polars::prelude::*;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// A headered CSV file of raw notifications.
///
/// Every column is read as text (no schema inference) so malformed codes
/// reach the normalizer untouched instead of failing a typed parse.
#[derive(Debug)]
pub struct CsvSource {
    path: PathBuf,
    columns: Vec<String>,
    cursor: Mutex<Option<RecordCursor>>,
}

/// Position of the next unread record of the file.
#[derive(Debug)]
struct RecordCursor {
    reader: BufReader<File>,
    header: Vec<u8>,
    next_row: usize,
}

impl RecordCursor {
    fn open(path: &Path) -> std::io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = Vec::new();
        read_record(&mut reader, &mut header)?;
        Ok(Self {
            reader,
            header,
            next_row: 0,
        })
    }

    /// Append up to `len` records to `out`. Returns how many were read.
    fn take(&mut self, len: usize, out: &mut Vec<u8>) -> std::io::Result<usize> {
        let mut taken = 0;
        while taken < len && read_record(&mut self.reader, out)? {
            taken += 1;
        }
        self.next_row += taken;
        Ok(taken)
    }

    fn skip(&mut self, rows: usize) -> std::io::Result<()> {
        let mut scratch = Vec::new();
        for _ in 0..rows {
            scratch.clear();
            if !read_record(&mut self.reader, &mut scratch)? {
                break;
            }
            self.next_row += 1;
        }
        Ok(())
    }
}

/// Append the next non-blank record to `out`, newline-terminated.
///
/// A record continues over line breaks while a quoted field is open.
/// Returns `false` at end of file.
fn read_record(reader: &mut impl BufRead, out: &mut Vec<u8>) -> std::io::Result<bool> {
    let start = out.len();
    let mut quotes = 0usize;

    loop {
        let line_start = out.len();
        if reader.read_until(b'\n', out)? == 0 {
            break;
        }
        quotes += out[line_start..].iter().filter(|b| **b == b'"').count();

        let record = &out[start..];
        let blank = record.iter().all(|b| *b == b'\n' || *b == b'\r');
        if blank {
            out.truncate(start);
            continue;
        }
        if quotes % 2 == 0 {
            break;
        }
    }

    if out.len() == start {
        return Ok(false);
    }
    if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }
    Ok(true)
}

impl CsvSource {
    /// Open a CSV source and read its header.
    ///
    /// # Errors
    ///
    /// Returns [`CleaningError::SourceUnavailable`] when the file is missing,
    /// unreadable, or has no header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.is_file() {
            return Err(CleaningError::SourceUnavailable(format!(
                "file not found: {}",
                path.display()
            )));
        }

        let header = Self::options()
            .with_n_rows(Some(1))
            .try_into_reader_with_file_path(Some(path.clone()))
            .and_then(|reader| reader.finish())
            .map_err(|e| {
                CleaningError::SourceUnavailable(format!("{}: {}", path.display(), e))
            })?;

        let columns: Vec<String> = header
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        if columns.is_empty() {
            return Err(CleaningError::SourceUnavailable(format!(
                "{}: no header row",
                path.display()
            )));
        }

        debug!("Opened CSV source {} with {} columns", path.display(), columns.len());
        Ok(Self {
            path,
            columns,
            cursor: Mutex::new(None),
        })
    }

    fn options() -> CsvReadOptions {
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .with_raise_if_empty(false)
    }

    /// Raw bytes of rows `offset..offset + len`, behind the header.
    fn window_bytes(&self, offset: usize, len: usize) -> std::io::Result<Vec<u8>> {
        let mut guard = self
            .cursor
            .lock()
            .map_err(|_| std::io::Error::other("CSV cursor lock poisoned"))?;

        let reusable = guard.as_ref().is_some_and(|c| c.next_row <= offset);
        if !reusable {
            *guard = Some(RecordCursor::open(&self.path)?);
        }
        let Some(cursor) = guard.as_mut() else {
            return Err(std::io::Error::other("CSV cursor missing"));
        };

        let behind = offset - cursor.next_row;
        cursor.skip(behind)?;
        let mut bytes = cursor.header.clone();
        cursor.take(len, &mut bytes)?;
        Ok(bytes)
    }
}

impl RawSource for CsvSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fingerprint(&self) -> String {
        let path = fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let (len, modified) = match fs::metadata(&self.path) {
            Ok(meta) => (
                meta.len(),
                meta.modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_nanos()),
            ),
            Err(_) => (0, 0),
        };
        format!("csv:{}:{}:{}", path.display(), len, modified)
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn read_window(&self, offset: usize, len: usize, columns: &[String]) -> Result<DataFrame> {
        let context = format!(
            "Reading rows {}..{} of {}",
            offset,
            offset + len,
            self.path.display()
        );
        let bytes = self.window_bytes(offset, len).context(context.clone())?;

        let projection: Arc<[PlSmallStr]> = columns
            .iter()
            .map(|c| PlSmallStr::from(c.as_str()))
            .collect();

        Self::options()
            .with_columns(Some(projection))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()
            .context(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("raw.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn ages(df: &DataFrame) -> Vec<Option<String>> {
        df.column("nu_idade_n")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    #[test]
    fn test_open_missing_file() {
        let err = CsvSource::open("/definitely/not/here.csv").unwrap_err();
        assert_eq!(err.error_code(), "SOURCE_UNAVAILABLE");
    }

    #[test]
    fn test_reads_header_and_window_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "febre,nu_idade_n,doenca_alvo\n1,30,dengue\n2,A,zika\n1,,chikungunya\n",
        );

        let source = CsvSource::open(&path).unwrap();
        assert_eq!(source.column_names(), &["febre", "nu_idade_n", "doenca_alvo"]);

        let window = source
            .read_window(1, 5, &["nu_idade_n".to_string()])
            .unwrap();
        assert_eq!(window.height(), 2);
        assert_eq!(window.width(), 1);
        assert_eq!(ages(&window), vec![Some("A".to_string()), None]);
    }

    #[test]
    fn test_sequential_and_rewound_windows() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::from("nu_idade_n,doenca_alvo\n");
        for age in 0..7 {
            content.push_str(&format!("{},dengue\n", age));
        }
        let source = CsvSource::open(write_csv(dir.path(), &content)).unwrap();
        let cols = vec!["nu_idade_n".to_string()];

        let first = source.read_window(0, 3, &cols).unwrap();
        let second = source.read_window(3, 3, &cols).unwrap();
        let last = source.read_window(6, 3, &cols).unwrap();
        let past_end = source.read_window(9, 3, &cols).unwrap();
        assert_eq!(ages(&first)[0].as_deref(), Some("0"));
        assert_eq!(ages(&second)[0].as_deref(), Some("3"));
        assert_eq!(last.height(), 1);
        assert_eq!(past_end.height(), 0);

        // a second pass starts over from the top
        let again = source.read_window(0, 2, &cols).unwrap();
        assert_eq!(ages(&again)[1].as_deref(), Some("1"));
        let skipped = source.read_window(5, 1, &cols).unwrap();
        assert_eq!(ages(&skipped)[0].as_deref(), Some("5"));
    }

    #[test]
    fn test_quoted_newline_stays_in_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "nu_idade_n,obs\n30,\"line one\nline two\"\n\n41,plain\n",
        );
        let source = CsvSource::open(&path).unwrap();
        let cols = vec!["nu_idade_n".to_string(), "obs".to_string()];

        let first = source.read_window(0, 1, &cols).unwrap();
        let obs = first.column("obs").unwrap().str().unwrap().get(0).map(str::to_string);
        assert_eq!(obs.as_deref(), Some("line one\nline two"));

        let second = source.read_window(1, 5, &cols).unwrap();
        assert_eq!(ages(&second), vec![Some("41".to_string())]);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "nu_idade_n\n30\n");
        let before = CsvSource::open(&path).unwrap().fingerprint();

        write_csv(dir.path(), "nu_idade_n\n30\n45\n");
        let after = CsvSource::open(&path).unwrap().fingerprint();
        assert_ne!(before, after);
    }
}
