use std::{collections::HashSet, path::Path};

use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;

use crate::{Error, Result, MAX_MERIT};

/// Who runs the school, taken from the "Typ av huvudman" column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Owner {
    Municipal,
    Independent,
    Unknown,
}

impl Owner {
    fn from_cell(cell: &str) -> Self {
        match cell.trim().to_lowercase().as_str() {
            "kommunal" => Owner::Municipal,
            "enskild" => Owner::Independent,
            _ => Owner::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Owner::Municipal => "Municipal (Kommunal)",
            Owner::Independent => "Private (Enskild)",
            Owner::Unknown => "Unknown",
        }
    }
}

/// One school row of the statistics export.
#[derive(Debug, Clone, PartialEq)]
pub struct SchoolRecord {
    pub id: String,
    pub name: String,
    pub municipality: String,
    pub merit: f64,
    pub pass_rate: Option<f64>,
    pub students: Option<u32>,
    pub owner: Owner,
}

/// How many rows were left out, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rows: usize,
    pub missing_id: usize,
    pub invalid_merit: usize,
    pub duplicates: usize,
}

impl LoadReport {
    pub fn dropped(&self) -> usize {
        self.missing_id + self.invalid_merit + self.duplicates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub delimiter: u8,
    pub skip_rows: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            delimiter: b';',
            skip_rows: None,
        }
    }
}

/// Column positions, resolved once from the header row.
struct Columns {
    id: usize,
    name: usize,
    municipality: usize,
    merit: usize,
    pass_rate: Option<usize>,
    students: Option<usize>,
    owner: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let normalized = headers.iter().map(normalize_header).collect::<Vec<_>>();
        let find = |pred: &dyn Fn(&str) -> bool| normalized.iter().position(|h| pred(h.as_str()));

        Ok(Columns {
            id: find(&|h| h == "skolenhetskod").ok_or(Error::MissingColumn("Skol-enhetskod"))?,
            name: find(&|h| h == "skola").ok_or(Error::MissingColumn("Skola"))?,
            municipality: find(&|h| h == "skolkommun").ok_or(Error::MissingColumn("Skolkommun"))?,
            merit: find(&|h| h.starts_with("genomsnittligtmeritvärde"))
                .ok_or(Error::MissingColumn("Genomsnittligt meritvärde"))?,
            pass_rate: find(&|h| {
                h.starts_with("andel") && (h.contains("godkän") || h.contains("uppnått"))
            }),
            students: find(&|h| h.starts_with("antalelever")),
            owner: find(&|h| h == "typavhuvudman"),
        })
    }
}

/// Reads the export at `path`. Missing or unreadable files are fatal,
/// bad rows are only counted.
pub fn load_schools(path: &Path, opts: LoadOptions) -> Result<(Vec<SchoolRecord>, LoadReport)> {
    let bytes = std::fs::read(path).map_err(|source| Error::InputFile {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    parse_schools(&text, opts)
}

pub fn parse_schools(text: &str, opts: LoadOptions) -> Result<(Vec<SchoolRecord>, LoadReport)> {
    let text = text.trim_start_matches('\u{feff}');
    let skip = opts
        .skip_rows
        .unwrap_or_else(|| detect_header_line(text).unwrap_or(0));
    let body = skip_lines(text, skip);

    let mut reader = ReaderBuilder::new()
        .delimiter(opts.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());
    let columns = Columns::from_headers(reader.headers()?)?;

    let mut report = LoadReport::default();
    let mut seen = HashSet::new();
    let mut schools = Vec::new();
    for row in reader.records() {
        let row = row?;
        report.rows += 1;

        let id = cell(&row, columns.id);
        if id.is_empty() {
            report.missing_id += 1;
            continue;
        }
        // The first row of an id decides, even when its merit gets it dropped.
        if !seen.insert(id.to_string()) {
            report.duplicates += 1;
            continue;
        }
        let merit = match parse_number(cell(&row, columns.merit)) {
            Some(m) if (0.0..=MAX_MERIT).contains(&m) => m,
            _ => {
                report.invalid_merit += 1;
                continue;
            }
        };

        schools.push(SchoolRecord {
            id: id.to_string(),
            name: cell(&row, columns.name).to_string(),
            municipality: cell(&row, columns.municipality).to_string(),
            merit,
            pass_rate: columns.pass_rate.and_then(|i| parse_number(cell(&row, i))),
            students: columns
                .students
                .and_then(|i| parse_number(cell(&row, i)))
                .filter(|n| *n >= 0.0)
                .map(|n| n.round() as u32),
            owner: columns
                .owner
                .map(|i| Owner::from_cell(cell(&row, i)))
                .unwrap_or(Owner::Unknown),
        });
    }

    // Highest merit first, the order schools get processed in.
    schools.sort_by(|a, b| b.merit.total_cmp(&a.merit));
    Ok((schools, report))
}

/// Parses a number written the Swedish way: `245,3`, `1 204`.
/// Suppression markers like `..` or `~100` yield `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw
        .trim()
        .replace([' ', '\u{a0}', '\u{202f}'], "")
        .replace(',', ".");
    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[inline]
fn cell(row: &StringRecord, i: usize) -> &str {
    row.get(i).unwrap_or("").trim()
}

/// Lowercase, alphanumerics only: "Skol-enhetskod" -> "skolenhetskod".
fn normalize_header(h: &str) -> String {
    h.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// The export starts with a few lines of title text, the header is the
/// first line naming the school unit code.
fn detect_header_line(text: &str) -> Option<usize> {
    text.lines()
        .position(|line| normalize_header(line).contains("skolenhetskod"))
}

fn skip_lines(text: &str, n: usize) -> &str {
    let mut rest = text;
    for _ in 0..n {
        match rest.find('\n') {
            Some(i) => rest = &rest[i + 1..],
            None => return "",
        }
    }
    rest
}
