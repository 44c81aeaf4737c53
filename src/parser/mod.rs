//! Best-effort parsing of the client's ASCII tables.
//!
//! The CLI prints single objects as a two-column `Property | Value` table and
//! collections as a multi-column listing. Parsing never fails: malformed or
//! unexpected output yields an empty or partial result, and callers must not
//! rely on every field being recovered.

use std::collections::BTreeMap;

use prettytable::{Cell, Row, Table as PrettyTable, format};

const PROPERTY_HEADER: &str = "Property";
const VALUE_HEADER: &str = "Value";

/// Header and data rows recovered from a table.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Table {
    /// Column names from the first data line.
    pub headers: Vec<String>,
    /// Remaining data lines, one cell per column.
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Position of a column, compared case-insensitively.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    }
}

/// Splits raw table output into headers and rows.
///
/// Separator rows (`+----+`, `----`, `====`) are skipped wherever they occur,
/// as are lines outside the table such as warnings.
#[must_use]
pub fn parse_table(raw: &str) -> Table {
    let mut table = Table::default();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || is_separator(line) {
            continue;
        }
        let Some(cells) = split_row(line) else {
            continue;
        };
        if table.headers.is_empty() {
            table.headers = cells;
        } else {
            table.rows.push(cells);
        }
    }
    table
}

/// Converts a listing into one map per row keyed by header.
#[must_use]
pub fn listing(raw: &str) -> Vec<BTreeMap<String, String>> {
    let table = parse_table(raw);
    table
        .rows
        .iter()
        .map(|row| {
            table
                .headers
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
        .collect()
}

/// Parses a `Property | Value` table into a property map.
///
/// Rows with an empty property cell continue the previous value, which is how
/// the client wraps multi-line values. Returns an empty map when the expected
/// header is absent.
#[must_use]
pub fn parse_properties(raw: &str) -> BTreeMap<String, String> {
    let table = parse_table(raw);
    let mut properties = BTreeMap::new();
    let (Some(key_column), Some(value_column)) =
        (table.column(PROPERTY_HEADER), table.column(VALUE_HEADER))
    else {
        return properties;
    };

    let mut last_key: Option<String> = None;
    for row in &table.rows {
        let key = row.get(key_column).map_or("", String::as_str);
        let value = row.get(value_column).cloned().unwrap_or_default();
        if key.is_empty() {
            if let Some(previous) = last_key.as_ref()
                && let Some(existing) = properties.get_mut(previous)
            {
                existing.push('\n');
                existing.push_str(&value);
            }
            continue;
        }
        properties.insert(key.to_owned(), value);
        last_key = Some(key.to_owned());
    }
    properties
}

/// Membership test for an identifier in a listing.
///
/// Uses the `ID` column when the listing has one and falls back to a plain
/// substring search otherwise.
#[must_use]
pub fn listing_contains(raw: &str, id: &str) -> bool {
    let table = parse_table(raw);
    table.column("ID").map_or_else(
        || raw.contains(id),
        |column| {
            table
                .rows
                .iter()
                .any(|row| row.get(column).is_some_and(|cell| cell == id))
        },
    )
}

/// Renders a property map as a `Property | Value` table.
#[must_use]
pub fn render_properties(properties: &BTreeMap<String, String>) -> String {
    let rows = properties
        .iter()
        .map(|(key, value)| vec![key.clone(), value.clone()])
        .collect::<Vec<_>>();
    render_table(&[PROPERTY_HEADER, VALUE_HEADER], &rows)
}

/// Renders an arbitrary table with a header row.
#[must_use]
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = PrettyTable::new();
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table.set_titles(Row::new(headers.iter().map(|h| Cell::new(h)).collect()));
    for row in rows {
        table.add_row(Row::new(row.iter().map(|cell| Cell::new(cell)).collect()));
    }
    table.to_string()
}

fn is_separator(line: &str) -> bool {
    line.chars().any(|ch| matches!(ch, '-' | '='))
        && line.chars().all(|ch| matches!(ch, '+' | '-' | '=' | '|' | ' '))
}

fn split_row(line: &str) -> Option<Vec<String>> {
    let opened = line.strip_prefix('|')?;
    let inner = opened.strip_suffix('|').unwrap_or(opened);
    Some(inner.split('|').map(|cell| cell.trim().to_owned()).collect())
}
