//! Raw dataset acquisition, cleaning and metric extraction.
//!
//! The raw SRAG export is a `;`-separated Latin-1 CSV. The refined dataset is
//! written next to it as a UTF-8, `,`-separated `refined_dataset.csv` holding
//! only the selected columns and the rows inside the reporting window.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use reqwest::blocking::Client;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Metrics;
use crate::error::CollaboratorError;
use crate::io::http::download_to;

pub const REFINED_FILE_NAME: &str = "refined_dataset.csv";
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// Provides the raw dataset file.
pub trait DatasetSource: Send + Sync {
    fn fetch(&self) -> Result<PathBuf, CollaboratorError>;
}

/// Produces the refined dataset from the raw one.
pub trait DatasetCleaner: Send + Sync {
    /// Keep `columns` (all columns when empty) and filter rows to the
    /// reporting window. Returns the refined file path.
    fn clean(&self, raw_path: &Path, columns: &[String]) -> Result<PathBuf, CollaboratorError>;
}

/// Reuses the newest local `INFLUD*.csv`, otherwise downloads `url`.
pub struct HttpDatasetSource {
    client: Client,
    url: String,
    data_dir: PathBuf,
}

impl HttpDatasetSource {
    pub fn new(client: Client, url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            url: url.into(),
            data_dir: data_dir.into(),
        }
    }
}

impl DatasetSource for HttpDatasetSource {
    #[instrument(skip_all, fields(url = %self.url))]
    fn fetch(&self) -> Result<PathBuf, CollaboratorError> {
        if let Some(existing) = find_latest_dataset(&self.data_dir) {
            info!(path = %existing.display(), "using existing dataset");
            return Ok(existing);
        }

        let dest = self.data_dir.join(file_name_from_url(&self.url));
        if dest.exists() {
            info!(path = %dest.display(), "dataset already downloaded");
            return Ok(dest);
        }
        info!(dest = %dest.display(), "downloading dataset");
        let bytes = download_to(&self.client, &self.url, &dest)?;
        info!(bytes, "dataset saved");
        Ok(dest)
    }
}

fn file_name_from_url(url: &str) -> String {
    let last = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("dataset");
    if last.to_lowercase().ends_with(".csv") {
        last.to_string()
    } else {
        format!("{last}.csv")
    }
}

/// Newest `INFLUD*.csv` in `dir`, ordered by the `INFLUDyy-DD-MM-YYYY` date in
/// the file name (undated names sort first, ties by name).
pub fn find_latest_dataset(dir: &Path) -> Option<PathBuf> {
    static DATED: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"INFLUD\d{2}-(\d{2})-(\d{2})-(\d{4})").expect("dataset name regex")
    });

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), err = %err, "data directory not readable");
            return None;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("INFLUD") && name.ends_with(".csv"))
        .map(|name| {
            let date = DATED.captures(&name).and_then(|caps| {
                let day = caps[1].parse().ok()?;
                let month = caps[2].parse().ok()?;
                let year = caps[3].parse().ok()?;
                NaiveDate::from_ymd_opt(year, month, day)
            });
            (date.unwrap_or(NaiveDate::MIN), name)
        })
        .max()
        .map(|(_, name)| dir.join(name))
}

/// Inclusive date range of rows kept in the refined dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// First day of the month eleven months before `today`, through a week
    /// past `today`.
    pub fn trailing_year(today: NaiveDate) -> Self {
        let mut year = today.year();
        let mut month = today.month() as i32 - 11;
        while month <= 0 {
            month += 12;
            year -= 1;
        }
        let start = NaiveDate::from_ymd_opt(year, month as u32, 1).unwrap_or(today);
        Self {
            start,
            end: today + Duration::days(7),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// CSV-based cleaner for the SRAG export.
#[derive(Debug, Clone, Default)]
pub struct CsvDatasetCleaner {
    /// Fixed window; the trailing year from today when `None`.
    pub window: Option<DateWindow>,
}

impl DatasetCleaner for CsvDatasetCleaner {
    #[instrument(skip_all, fields(raw = %raw_path.display(), columns = columns.len()))]
    fn clean(&self, raw_path: &Path, columns: &[String]) -> Result<PathBuf, CollaboratorError> {
        if !raw_path.exists() {
            return Err(CollaboratorError::permanent(format!(
                "raw file not found: {}",
                raw_path.display()
            )));
        }
        let window = self
            .window
            .unwrap_or_else(|| DateWindow::trailing_year(chrono::Local::now().date_naive()));

        let headers = read_raw_header(raw_path)?;
        let keep = selected_indices(&headers, columns)?;
        let date_idx = keep
            .iter()
            .copied()
            .find(|&i| headers[i].to_uppercase().contains("DT_NOTI"));

        let date_format = match date_idx {
            Some(idx) => {
                info!(column = %headers[idx], "using column for date filtering");
                let format = detect_date_format(raw_path, idx)?;
                if format.is_none() {
                    warn!(column = %headers[idx], "no date format matched most rows; skipping date filter");
                }
                format
            }
            None => {
                warn!("no date column found; skipping date filter");
                None
            }
        };

        let out_dir = raw_path.parent().unwrap_or(Path::new("."));
        let out_path = out_dir.join(REFINED_FILE_NAME);
        let mut writer = csv::Writer::from_path(&out_path).map_err(csv_error)?;
        writer
            .write_record(keep.iter().map(|&i| headers[i].as_str()))
            .map_err(csv_error)?;

        let mut total = 0u64;
        let mut kept = 0u64;
        let mut reader = raw_reader(raw_path)?;
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            total += 1;
            let mut normalized_date = None;
            if let (Some(idx), Some(format)) = (date_idx, date_format) {
                let parsed = record
                    .get(idx)
                    .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), format).ok());
                match parsed {
                    Some(date) if window.contains(date) => {
                        normalized_date = Some((idx, date.format("%Y-%m-%d").to_string()));
                    }
                    _ => continue,
                }
            }
            let row = keep.iter().map(|&i| match &normalized_date {
                Some((idx, date)) if *idx == i => date.as_str(),
                _ => record.get(i).unwrap_or(""),
            });
            writer.write_record(row).map_err(csv_error)?;
            kept += 1;
        }
        writer.flush()?;

        info!(
            start = %window.start,
            end = %window.end,
            kept,
            total,
            path = %out_path.display(),
            "refined dataset saved"
        );
        Ok(out_path)
    }
}

fn selected_indices(headers: &[String], columns: &[String]) -> Result<Vec<usize>, CollaboratorError> {
    if columns.is_empty() {
        warn!("no columns specified; keeping all columns");
        return Ok((0..headers.len()).collect());
    }
    let wanted: HashSet<&str> = columns.iter().map(String::as_str).collect();
    let keep: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| wanted.contains(h.as_str()))
        .map(|(i, _)| i)
        .collect();
    if keep.is_empty() {
        return Err(CollaboratorError::permanent(
            "none of the selected columns exist in the raw dataset",
        ));
    }
    Ok(keep)
}

/// Pick the first format that parses more than half of the column's values.
fn detect_date_format(raw_path: &Path, idx: usize) -> Result<Option<&'static str>, CollaboratorError> {
    let mut counts = [0u64; DATE_FORMATS.len()];
    let mut rows = 0u64;
    let mut reader = raw_reader(raw_path)?;
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        rows += 1;
        let Some(value) = record.get(idx).map(str::trim) else {
            continue;
        };
        for (count, format) in counts.iter_mut().zip(DATE_FORMATS) {
            if NaiveDate::parse_from_str(value, format).is_ok() {
                *count += 1;
            }
        }
    }
    Ok(counts
        .iter()
        .zip(DATE_FORMATS)
        .find(|(count, _)| **count * 2 > rows)
        .map(|(_, format)| format))
}

/// Header row of the raw dataset.
pub fn read_raw_header(raw_path: &Path) -> Result<Vec<String>, CollaboratorError> {
    let mut reader = raw_reader(raw_path)?;
    let headers = reader.headers().map_err(csv_error)?;
    Ok(headers.iter().map(|h| h.trim().to_string()).collect())
}

fn raw_reader(raw_path: &Path) -> Result<csv::Reader<Latin1Reader<BufReader<File>>>, CollaboratorError> {
    let file = File::open(raw_path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(Latin1Reader::new(BufReader::new(file))))
}

fn csv_error(err: csv::Error) -> CollaboratorError {
    CollaboratorError::permanent(format!("csv: {err}"))
}

/// Streams Latin-1 bytes as UTF-8.
pub struct Latin1Reader<R> {
    inner: R,
    scratch: Vec<u8>,
    pending: Option<u8>,
}

impl<R: Read> Latin1Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
            pending: None,
        }
    }
}

impl<R: Read> Read for Latin1Reader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        if let Some(byte) = self.pending.take() {
            out[0] = byte;
            written = 1;
        }
        // Every input byte expands to at most two output bytes.
        let room = ((out.len() - written) / 2).max(usize::from(written == 0));
        if room == 0 {
            return Ok(written);
        }
        self.scratch.resize(room, 0);
        let n = self.inner.read(&mut self.scratch[..room])?;
        for &byte in &self.scratch[..n] {
            if byte < 0x80 {
                out[written] = byte;
                written += 1;
                continue;
            }
            let lead = 0xC0 | (byte >> 6);
            let tail = 0x80 | (byte & 0x3F);
            out[written] = lead;
            written += 1;
            if written < out.len() {
                out[written] = tail;
                written += 1;
            } else {
                self.pending = Some(tail);
            }
        }
        Ok(written)
    }
}

/// Summary metrics over the refined dataset.
///
/// Never fails: read errors are reported in [`Metrics::error`].
#[instrument(fields(path = %path.display()))]
pub fn compute_metrics(path: &Path) -> Metrics {
    match try_compute_metrics(path) {
        Ok(metrics) => {
            debug!(?metrics, "metrics calculated");
            metrics
        }
        Err(err) => {
            warn!(err = %err, "failed to calculate metrics");
            Metrics {
                error: Some(err.to_string()),
                ..Metrics::default()
            }
        }
    }
}

fn try_compute_metrics(path: &Path) -> Result<Metrics, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_uppercase())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let uf = column("SG_UF_NOT");
    let hospital = column("HOSPITAL");
    let uti = column("UTI");
    let evolucao = column("EVOLUCAO");

    let mut total = 0u64;
    let mut states = HashSet::new();
    let mut hospitalized = 0u64;
    let mut icu = 0u64;
    let mut deaths = 0u64;

    for record in reader.records() {
        let record = record?;
        total += 1;
        let value = |idx: Option<usize>| idx.and_then(|i| record.get(i)).map(str::trim);
        if let Some(state) = value(uf).filter(|s| !s.is_empty()) {
            states.insert(state.to_string());
        }
        if value(hospital).is_some_and(is_affirmative) {
            hospitalized += 1;
        }
        if value(uti).is_some_and(is_affirmative) {
            icu += 1;
        }
        // EVOLUCAO: 1 = cure, 2 = death, 3 = death from other causes, 9 = unknown
        if value(evolucao).is_some_and(|v| v == "2" || v == "3") {
            deaths += 1;
        }
    }

    Ok(Metrics {
        total_cases: total,
        states_affected: uf.map(|_| states.len() as u64),
        hospitalized_count: hospital.map(|_| hospitalized),
        uti_count: uti.map(|_| icu),
        death_count: evolucao.map(|_| deaths),
        error: None,
    })
}

fn is_affirmative(value: &str) -> bool {
    matches!(value.to_uppercase().as_str(), "1" | "SIM" | "S")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_latin1(path: &Path, text: &str) {
        let bytes: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
        fs::write(path, bytes).expect("write raw");
    }

    fn window() -> DateWindow {
        DateWindow {
            start: NaiveDate::from_ymd_opt(2025, 1, 1).expect("date"),
            end: NaiveDate::from_ymd_opt(2025, 6, 30).expect("date"),
        }
    }

    #[test]
    fn trailing_year_starts_eleven_months_back() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 15).expect("date");
        let w = DateWindow::trailing_year(today);
        assert_eq!(w.start, NaiveDate::from_ymd_opt(2024, 4, 1).expect("date"));
        assert_eq!(w.end, NaiveDate::from_ymd_opt(2025, 3, 22).expect("date"));

        let december = NaiveDate::from_ymd_opt(2025, 12, 2).expect("date");
        assert_eq!(
            DateWindow::trailing_year(december).start,
            NaiveDate::from_ymd_opt(2025, 1, 1).expect("date")
        );
    }

    #[test]
    fn latest_dataset_prefers_newest_dated_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in [
            "INFLUD25-01-02-2025.csv",
            "INFLUD25-15-03-2025.csv",
            "INFLUD24.csv",
            "other.csv",
        ] {
            fs::write(temp.path().join(name), "").expect("write");
        }
        let latest = find_latest_dataset(temp.path()).expect("latest");
        assert_eq!(
            latest.file_name().and_then(|n| n.to_str()),
            Some("INFLUD25-15-03-2025.csv")
        );
    }

    #[test]
    fn latest_dataset_none_for_missing_dir() {
        assert_eq!(find_latest_dataset(Path::new("/nonexistent/srag")), None);
    }

    #[test]
    fn file_name_from_url_forces_csv() {
        assert_eq!(file_name_from_url("https://h/a/INFLUD25.csv?x=1"), "INFLUD25.csv");
        assert_eq!(file_name_from_url("https://h/a/download/"), "download.csv");
    }

    #[test]
    fn latin1_reader_transcodes() {
        let raw: &[u8] = &[b'S', 0xC3, b'O', b';', 0xE7];
        let mut out = String::new();
        Latin1Reader::new(raw).read_to_string(&mut out).expect("read");
        assert_eq!(out, "SÃO;ç");
    }

    #[test]
    fn latin1_reader_handles_tiny_buffers() {
        let mut reader = Latin1Reader::new(&[0xE9u8, b'a'][..]);
        let mut collected = Vec::new();
        let mut buf = [0u8; 1];
        loop {
            let n = reader.read(&mut buf).expect("read");
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(String::from_utf8(collected).expect("utf8"), "éa");
    }

    #[test]
    fn cleaner_selects_columns_and_filters_dates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let raw = temp.path().join("INFLUD25.csv");
        write_latin1(
            &raw,
            "NU_NOTIFIC;DT_NOTIFIC;SG_UF_NOT;CS_SEXO\n\
             1;2025-02-10;SP;F\n\
             2;2024-12-31;RJ;M\n\
             3;2025-03-01;SÃO;M\n\
             4;garbage;MG;F\n",
        );
        let cleaner = CsvDatasetCleaner {
            window: Some(window()),
        };
        let columns = vec![
            "NU_NOTIFIC".to_string(),
            "DT_NOTIFIC".to_string(),
            "SG_UF_NOT".to_string(),
        ];

        let out = cleaner.clean(&raw, &columns).expect("clean");
        assert_eq!(out, temp.path().join(REFINED_FILE_NAME));
        let contents = fs::read_to_string(&out).expect("read refined");
        assert_eq!(
            contents,
            "NU_NOTIFIC,DT_NOTIFIC,SG_UF_NOT\n1,2025-02-10,SP\n3,2025-03-01,SÃO\n"
        );
    }

    #[test]
    fn cleaner_normalizes_day_first_dates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let raw = temp.path().join("INFLUD25.csv");
        write_latin1(&raw, "DT_NOTIFIC;UTI\n10/02/2025;1\n05/05/2025;2\n01/01/2020;1\n");
        let cleaner = CsvDatasetCleaner {
            window: Some(window()),
        };

        let out = cleaner.clean(&raw, &[]).expect("clean");
        let contents = fs::read_to_string(&out).expect("read refined");
        assert_eq!(contents, "DT_NOTIFIC,UTI\n2025-02-10,1\n2025-05-05,2\n");
    }

    #[test]
    fn cleaner_skips_filter_when_dates_unparseable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let raw = temp.path().join("INFLUD25.csv");
        write_latin1(&raw, "DT_NOTIFIC;UTI\nsoon;1\nlater;2\n");
        let cleaner = CsvDatasetCleaner {
            window: Some(window()),
        };

        let out = cleaner.clean(&raw, &[]).expect("clean");
        let contents = fs::read_to_string(&out).expect("read refined");
        assert_eq!(contents, "DT_NOTIFIC,UTI\nsoon,1\nlater,2\n");
    }

    #[test]
    fn cleaner_rejects_unknown_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let raw = temp.path().join("INFLUD25.csv");
        write_latin1(&raw, "A;B\n1;2\n");
        let err = CsvDatasetCleaner::default()
            .clean(&raw, &["Z".to_string()])
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn cleaner_reports_missing_raw_file() {
        let err = CsvDatasetCleaner::default()
            .clean(Path::new("/nonexistent/raw.csv"), &[])
            .unwrap_err();
        assert!(err.to_string().contains("raw file not found"));
    }

    #[test]
    fn metrics_count_cases_and_outcomes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(REFINED_FILE_NAME);
        fs::write(
            &path,
            "SG_UF_NOT,HOSPITAL,UTI,EVOLUCAO\nSP,1,1,2\nSP,SIM,2,1\nRJ,2,S,3\nMG,9,9,9\n",
        )
        .expect("write");

        let metrics = compute_metrics(&path);
        assert_eq!(
            metrics,
            Metrics {
                total_cases: 4,
                states_affected: Some(3),
                hospitalized_count: Some(2),
                uti_count: Some(2),
                death_count: Some(2),
                error: None,
            }
        );
    }

    #[test]
    fn metrics_record_read_failure() {
        let metrics = compute_metrics(Path::new("/nonexistent/refined.csv"));
        assert_eq!(metrics.total_cases, 0);
        assert!(metrics.error.is_some());
    }

    #[test]
    fn metrics_omit_absent_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(REFINED_FILE_NAME);
        fs::write(&path, "NU_NOTIFIC\n1\n2\n").expect("write");
        let metrics = compute_metrics(&path);
        assert_eq!(metrics.total_cases, 2);
        assert_eq!(metrics.death_count, None);
        assert_eq!(metrics.states_affected, None);
    }
}
