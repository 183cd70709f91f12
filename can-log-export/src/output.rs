//! Table output
//!
//! Signal groups are written as delimited text tables: a header line
//! (timestamp first), an optional units line, then one line per row with empty
//! cells for absent fields. Cells containing the delimiter, a quote or a line
//! break are quoted, with embedded quotes doubled.
//!
//! Several tables are bundled into a zip archive. A flat table can also be
//! split back into groups of columns that are populated on the same rows.

use crate::groups::{SignalGroup, TIMESTAMP_FIELD};
use crate::types::{ExportError, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A table read back from disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableData {
    pub fieldnames: Vec<String>,
    /// Units row, if the table has one
    pub units: Option<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    /// Index of a column by field name
    pub fn column(&self, fieldname: &str) -> Option<usize> {
        self.fieldnames.iter().position(|f| f == fieldname)
    }

    /// Cell of a row, empty if the row is shorter than the header
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map_or("", String::as_str)
    }

    /// Write the table with the given delimiter
    pub fn write(&self, path: &Path, delimiter: char) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write_record(&mut writer, &self.fieldnames, delimiter)?;
        if let Some(units) = &self.units {
            write_record(&mut writer, units, delimiter)?;
        }
        for row in &self.rows {
            write_record(&mut writer, row, delimiter)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Keep only the given columns and rows
    fn project(&self, columns: &[usize], rows: &[usize]) -> TableData {
        let pick = |cells: &Vec<String>| -> Vec<String> {
            columns
                .iter()
                .map(|&c| cells.get(c).cloned().unwrap_or_default())
                .collect()
        };
        TableData {
            fieldnames: pick(&self.fieldnames),
            units: self.units.as_ref().map(pick),
            rows: rows.iter().map(|&r| pick(&self.rows[r])).collect(),
        }
    }
}

/// Write a signal group as a delimited table
pub fn write_table(group: &SignalGroup, path: &Path, delimiter: char) -> Result<()> {
    log::debug!(
        "Writing group {} ({} rows) to {:?}",
        group.name(),
        group.rows().len(),
        path
    );

    let mut writer = BufWriter::new(File::create(path)?);
    write_record(&mut writer, &group.header(), delimiter)?;
    if let Some(units) = group.units_row() {
        write_record(&mut writer, &units, delimiter)?;
    }
    for row in group.rows() {
        write_record(&mut writer, &group.record(row), delimiter)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one table per group into `directory`, which is recreated first
///
/// Files are named after their groups.
pub fn write_group_tables(
    groups: &[&SignalGroup],
    directory: &Path,
    delimiter: char,
) -> Result<Vec<PathBuf>> {
    recreate_dir(directory)?;

    let mut written = Vec::with_capacity(groups.len());
    for group in groups {
        let path = directory.join(format!("{}.csv", group.name()));
        write_table(group, &path, delimiter)?;
        written.push(path);
    }
    Ok(written)
}

/// Bundle files into a deflate-compressed zip archive, flat, by file name
pub fn create_archive(files: &[PathBuf], archive_path: &Path) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(archive_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut buffer = Vec::new();
    for file in files {
        let name = file.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            ExportError::InvalidConfig(format!("Cannot archive file without a name: {:?}", file))
        })?;

        buffer.clear();
        File::open(file)?.read_to_end(&mut buffer)?;
        zip.start_file(name, options)?;
        zip.write_all(&buffer)?;
    }

    zip.finish()?;
    log::info!("Created ZIP archive: {:?}", archive_path);
    Ok(())
}

/// Write a sorted JSON array of field names
pub fn write_field_catalog(fields: &[String], path: &Path) -> Result<()> {
    let mut sorted = fields.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &sorted)?;
    writer.flush()?;
    Ok(())
}

/// Read a delimited table written by [`write_table`]
///
/// The line after the header is taken as the units row if its timestamp cell
/// is empty.
pub fn read_table(path: &Path, delimiter: char) -> Result<TableData> {
    let content = fs::read(path)?;
    let content = String::from_utf8_lossy(&content);
    let mut records = parse_records(&content, delimiter).into_iter();

    let fieldnames = records
        .next()
        .ok_or_else(|| ExportError::LogParseError(format!("Empty table: {:?}", path)))?;
    let time_column = fieldnames
        .iter()
        .position(|f| f == TIMESTAMP_FIELD)
        .unwrap_or(0);

    let mut rows: Vec<Vec<String>> = records.collect();
    let has_units = rows
        .first()
        .map_or(false, |first| first.get(time_column).map_or(true, |c| c.is_empty()));
    let units = if has_units { Some(rows.remove(0)) } else { None };

    Ok(TableData {
        fieldnames,
        units,
        rows,
    })
}

/// Split a flat table into groups of columns populated on the same rows
///
/// Each column not yet assigned seeds a group: the rows where it has a value,
/// restricted to the columns that have at least one value in those rows.
pub fn split_table(table: &TableData) -> Vec<TableData> {
    let time_column = table.column(TIMESTAMP_FIELD).unwrap_or(0);
    let mut used: HashSet<usize> = HashSet::new();
    let mut groups = Vec::new();

    for seed in 0..table.fieldnames.len() {
        if seed == time_column || used.contains(&seed) {
            continue;
        }

        let rows: Vec<usize> = (0..table.rows.len())
            .filter(|&r| !table.cell(r, seed).is_empty())
            .collect();
        if rows.is_empty() {
            continue;
        }

        let columns: Vec<usize> = (0..table.fieldnames.len())
            .filter(|&c| rows.iter().any(|&r| !table.cell(r, c).is_empty()))
            .collect();

        used.extend(columns.iter().copied());
        groups.push(table.project(&columns, &rows));
    }

    groups
}

/// Split a table and write the parts as `group_{n}.csv` into `directory`,
/// then zip them into `archive_path`
pub fn write_split_tables(
    table: &TableData,
    directory: &Path,
    archive_path: &Path,
    delimiter: char,
) -> Result<Vec<PathBuf>> {
    recreate_dir(directory)?;
    log::info!("Created directory: {:?}", directory);

    let mut written = Vec::new();
    for (index, group) in split_table(table).iter().enumerate() {
        let path = directory.join(format!("group_{}.csv", index));
        group.write(&path, delimiter)?;
        log::info!("Created table: {:?}", path);
        written.push(path);
    }

    create_archive(&written, archive_path)?;
    Ok(written)
}

fn recreate_dir(directory: &Path) -> Result<()> {
    if directory.exists() {
        fs::remove_dir_all(directory)?;
    }
    fs::create_dir_all(directory)?;
    Ok(())
}

fn write_record<W: Write, S: AsRef<str>>(
    writer: &mut W,
    cells: &[S],
    delimiter: char,
) -> Result<()> {
    let line: Vec<String> = cells
        .iter()
        .map(|cell| quote_cell(cell.as_ref(), delimiter))
        .collect();
    writeln!(writer, "{}", line.join(&delimiter.to_string()))?;
    Ok(())
}

fn quote_cell(cell: &str, delimiter: char) -> String {
    let needs_quotes = cell.contains(delimiter) || cell.contains(['"', '\n', '\r']);
    if needs_quotes {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Split delimited text into records, honoring quoted cells
fn parse_records(content: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    cell.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => cell.push(c),
            }
            continue;
        }

        match c {
            '"' if cell.is_empty() => in_quotes = true,
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }

    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::Row;
    use crate::timestamp::FormattedTime;
    use crate::types::SignalValue;
    use chrono::TimeDelta;
    use std::collections::HashMap;

    fn row(millis: i64, values: &[(&str, SignalValue)]) -> Row {
        Row {
            timestamp: FormattedTime::Relative(TimeDelta::milliseconds(millis)),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn sample_group() -> SignalGroup {
        let mut group = SignalGroup::new("Status");
        group.add_field("Speed".to_string(), Some("km/h"));
        group.add_field("Mode".to_string(), None);
        group.push_row(row(0, &[("Speed", SignalValue::Float(12.5))]));
        group.push_row(row(
            1500,
            &[("Speed", SignalValue::Integer(13)), ("Mode", SignalValue::Boolean(true))],
        ));
        group
    }

    #[test]
    fn test_write_and_read_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.csv");
        write_table(&sample_group(), &path, ';').unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "timestamp;Speed;Mode\n;km/h;\n0.000000;12.5;\n1.500000;13;1\n"
        );

        let table = read_table(&path, ';').unwrap();
        assert_eq!(table.fieldnames, ["timestamp", "Speed", "Mode"]);
        assert_eq!(
            table.units,
            Some(vec![String::new(), "km/h".to_string(), String::new()])
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], ["1.500000", "13", "1"]);
    }

    #[test]
    fn test_table_without_units() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.csv");

        let mut group = SignalGroup::new("Plain");
        group.add_field("x".to_string(), None);
        group.push_row(row(0, &[("x", SignalValue::Integer(1))]));
        write_table(&group, &path, ',').unwrap();

        let table = read_table(&path, ',').unwrap();
        assert!(table.units.is_none());
        assert_eq!(table.rows, vec![vec!["0.000000".to_string(), "1".to_string()]]);
    }

    #[test]
    fn test_quoted_cells_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quoted.csv");
        let table = TableData {
            fieldnames: vec!["timestamp".to_string(), "a;b".to_string()],
            units: None,
            rows: vec![vec!["0".to_string(), "say \"hi\"\nthere".to_string()]],
        };
        table.write(&path, ';').unwrap();

        assert_eq!(read_table(&path, ';').unwrap(), table);
    }

    #[test]
    fn test_split_table() {
        let cells = |row: &[&str]| row.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        let table = TableData {
            fieldnames: cells(&["timestamp", "a", "b", "c"]),
            units: Some(cells(&["", "V", "", "A"])),
            rows: vec![
                cells(&["0.0", "1", "", "5"]),
                cells(&["0.1", "", "2", ""]),
                cells(&["0.2", "3", "", ""]),
            ],
        };

        let groups = split_table(&table);
        assert_eq!(groups.len(), 2);

        assert_eq!(groups[0].fieldnames, ["timestamp", "a", "c"]);
        assert_eq!(groups[0].units, Some(cells(&["", "V", "A"])));
        assert_eq!(groups[0].rows, vec![cells(&["0.0", "1", "5"]), cells(&["0.2", "3", ""])]);

        assert_eq!(groups[1].fieldnames, ["timestamp", "b"]);
        assert_eq!(groups[1].rows, vec![cells(&["0.1", "2"])]);
    }

    #[test]
    fn test_group_tables_and_archive() {
        let dir = tempfile::tempdir().unwrap();
        let tables = dir.path().join("trace_groups");
        fs::create_dir_all(&tables).unwrap();
        fs::write(tables.join("stale.csv"), "old").unwrap();

        let group = sample_group();
        let mut other = SignalGroup::new("Status.Mux1");
        other.add_field("A".to_string(), None);
        other.push_row(row(0, &[("A", SignalValue::Integer(4))]));

        let written = write_group_tables(&[&group, &other], &tables, ',').unwrap();
        assert_eq!(written.len(), 2);
        assert!(!tables.join("stale.csv").exists());
        assert!(tables.join("Status.Mux1.csv").exists());

        let archive_path = dir.path().join("trace.zip");
        create_archive(&written, &archive_path).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("Status.csv")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert!(content.starts_with("timestamp,Speed,Mode\n"));
    }

    #[test]
    fn test_field_catalog_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exported_fields.json");
        let fields = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        write_field_catalog(&fields, &path).unwrap();

        let written: Vec<String> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, ["a", "b"]);
    }
}
