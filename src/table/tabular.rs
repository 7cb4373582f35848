//! Delimited location files
//!
//! Rows are read from separator-delimited text files where comment lines start
//! with the table's comment character. Rows are appended under an exclusive
//! advisory lock and removed by rewriting the file without matching lines.

use std::{
    fs::{self, OpenOptions},
    io::{self, Read as _, Seek as _, SeekFrom, Write as _},
    path::Path,
};

use fs2::FileExt;
use indexmap::IndexMap;
use tracing::{debug, error, warn};

use crate::{ErrorDetail, definition::TableSchema, template};

use super::{FileFormat, FileInfo, FileLocation, Row, RowSource};

pub struct Tabular;

impl RowSource for Tabular {
    fn parse_rows(&self, schema: &TableSchema, path: &Path, errors: &mut Vec<String>) -> Vec<Row> {
        parse_file(schema, path, errors)
    }

    fn remove_entry(
        &self,
        schema: &TableSchema,
        files: &IndexMap<String, FileInfo>,
        values: &[String],
    ) -> Result<(), ErrorDetail> {
        remove_from_files(schema, files, values)
    }

    fn file_format(&self) -> FileFormat {
        FileFormat::Delimited
    }
}

fn is_comment(line: &str, comment_char: &str) -> bool {
    !comment_char.is_empty() && line.trim_start().starts_with(comment_char)
}

fn separator_label(separator: &str) -> &str {
    if separator == "\t" { "<TAB>" } else { separator }
}

/// Parse the lines of a location file. `here` replaces `__HERE__` inside lines.
pub fn parse_lines(
    schema: &TableSchema,
    content: &str,
    here: &str,
    errors: &mut Vec<String>,
) -> Vec<Row> {
    let min_width = schema.columns.min_width();
    let mut rows = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if is_comment(line, &schema.comment_char) {
            continue;
        }
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }
        let line = template::expand_here(line, here);
        let fields: Row = line.split(&schema.separator).map(str::to_owned).collect();
        if fields.len() >= min_width {
            rows.push(fields);
        } else {
            let message = format!(
                "Line {} in tool data table '{}' is invalid (HINT: '{}' characters must be used to separate fields):\n{}",
                i + 1,
                schema.name,
                separator_label(&schema.separator),
                line
            );
            warn!("{message}");
            errors.push(message);
        }
    }
    rows
}

pub fn parse_file(schema: &TableSchema, path: &Path, errors: &mut Vec<String>) -> Vec<Row> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            error!(%error, path = %path.display(), table = %schema.name, "Failed to read location file");
            errors.push(format!("{}: {error}", path.display()));
            return Vec::new();
        }
    };
    let here = std::path::absolute(path)
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.to_string_lossy().into_owned()))
        .unwrap_or_default();
    let rows = parse_lines(schema, &content, &here, errors);
    debug!(
        count = rows.len(),
        path = %path.display(),
        table = %schema.name,
        "Loaded lines from location file"
    );
    rows
}

/// Replace separator characters inside fields so every value stays in its column.
pub fn replace_field_separators(fields: &[String], separator: &str, comment_char: &str) -> Row {
    let replace = match (separator, comment_char) {
        (" ", "\t") => "_",
        (" ", _) => "\t",
        (_, " ") => "_",
        _ => " ",
    };
    fields
        .iter()
        .map(|field| field.replace(separator, replace))
        .collect()
}

/// Append one row, making sure the previous last line is terminated.
pub fn append_row(path: &Path, fields: &[String], separator: &str) -> Result<(), ErrorDetail> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(ErrorDetail::WriteFile)?;
    file.lock_exclusive().map_err(ErrorDetail::LockFile)?;
    let result = (|| -> io::Result<()> {
        let mut line = String::new();
        if file.metadata()?.len() > 0 {
            file.seek(SeekFrom::End(-1))?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last)?;
            if !matches!(last[0], b'\n' | b'\r') {
                line.push('\n');
            }
        }
        line.push_str(&fields.join(separator));
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()
    })();
    if let Err(error) = FileExt::unlock(&file) {
        debug!(%error, path = %path.display(), "Failed to release location file lock");
    }
    result.map_err(ErrorDetail::WriteFile)
}

/// Rewrite a location file keeping comments and every line that differs from `values`.
pub fn filter_file(schema: &TableSchema, path: &Path, values: &[String]) -> io::Result<String> {
    let content = fs::read_to_string(path)?;
    let mut kept = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if is_comment(line, &schema.comment_char) {
            kept.push_str(line);
            continue;
        }
        let stripped = line.trim_end_matches(['\n', '\r']);
        if stripped.is_empty() {
            continue;
        }
        let matches = stripped
            .split(&schema.separator)
            .eq(values.iter().map(String::as_str));
        if !matches {
            kept.push_str(line);
        }
    }
    fs::write(path, &kept)?;
    Ok(kept)
}

pub(crate) fn remove_from_files(
    schema: &TableSchema,
    files: &IndexMap<String, FileInfo>,
    values: &[String],
) -> Result<(), ErrorDetail> {
    for info in files.values() {
        if info.location != FileLocation::Local || info.format != FileFormat::Delimited {
            continue;
        }
        let path = Path::new(&info.path);
        if path.exists() {
            filter_file(schema, path, values).map_err(ErrorDetail::WriteFile)?;
        } else {
            warn!(
                path = %info.path,
                table = %schema.name,
                "Cannot find index file for tool data table"
            );
        }
    }
    Ok(())
}
