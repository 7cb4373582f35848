//! Tool data tables
//!
//! A table is rebuilt from its [`LoadParameters`] by [`build`]; reloading
//! rebuilds the state and replays every recorded merge, so the in-memory row
//! set can always be derived again from configuration and location files.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    Error, ErrorContext, ErrorDetail,
    definition::{ColumnSpec, FileSource, RepositoryInfo, TableDefinition, TableKind, TableSchema},
    location::LocationIndex,
    template,
    xml::Element,
};

pub mod field;
pub mod refgenie;
pub mod remote;
pub mod tabular;

pub use field::TableField;

pub type Row = Vec<String>;

pub const DEFAULT_URL_TIMEOUT: Duration = Duration::from_secs(10);

fn default_url_timeout() -> Duration {
    DEFAULT_URL_TIMEOUT
}

/// Capability shared by every table variant.
pub trait RowSource {
    fn parse_rows(&self, schema: &TableSchema, path: &Path, errors: &mut Vec<String>) -> Vec<Row>;

    fn remove_entry(
        &self,
        schema: &TableSchema,
        files: &IndexMap<String, FileInfo>,
        values: &[String],
    ) -> Result<(), ErrorDetail>;

    fn file_format(&self) -> FileFormat;
}

impl TableKind {
    pub(crate) fn source(&self) -> &dyn RowSource {
        match self {
            TableKind::Tabular => &tabular::Tabular,
            TableKind::Refgenie(spec) => spec,
        }
    }
}

/// Which configuration a table or file was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrigin {
    Core,
    Shed,
}

/// Everything needed to build a table again from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadParameters {
    pub element: Element,
    pub data_root: PathBuf,
    pub origin: LoadOrigin,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    pub other_config: IndexMap<String, String>,
    #[serde(default = "default_url_timeout")]
    pub url_timeout: Duration,
}

impl LoadParameters {
    pub fn new(element: Element, data_root: impl Into<PathBuf>, origin: LoadOrigin) -> Self {
        Self {
            element,
            data_root: data_root.into(),
            origin,
            config_path: None,
            other_config: IndexMap::new(),
            url_timeout: DEFAULT_URL_TIMEOUT,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_other_config(mut self, other_config: IndexMap<String, String>) -> Self {
        self.other_config = other_config;
        self
    }

    pub fn with_url_timeout(mut self, timeout: Duration) -> Self {
        self.url_timeout = timeout;
        self
    }

    fn here(&self) -> Option<String> {
        self.config_path
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLocation {
    Local,
    Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Delimited,
    Catalog,
}

/// Metadata of one backing file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub found: bool,
    pub location: FileLocation,
    pub format: FileFormat,
    pub from_shed_config: bool,
    pub data_root: PathBuf,
    #[serde(default)]
    pub repository: Option<RepositoryInfo>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl FileInfo {
    fn accepts_writes_from(&self, source: Option<&RepositoryInfo>) -> bool {
        self.location == FileLocation::Local
            && self.format == FileFormat::Delimited
            && self.repository.as_ref() == source
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableContent {
    pub rows: Vec<Row>,
    pub files: IndexMap<String, FileInfo>,
    #[serde(default)]
    pub missing_index_file: Option<String>,
    pub version: u64,
}

impl Default for TableContent {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            files: IndexMap::new(),
            missing_index_file: None,
            version: 1,
        }
    }
}

/// A merge to replay after reloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub load: LoadParameters,
    pub allow_duplicates: bool,
}

/// A row given either positionally or by column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Fields(Row),
    Named(IndexMap<String, String>),
}

impl Entry {
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Entry::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Row> for Entry {
    fn from(fields: Row) -> Self {
        Entry::Fields(fields)
    }
}

impl From<Vec<&str>> for Entry {
    fn from(fields: Vec<&str>) -> Self {
        Entry::Fields(fields.into_iter().map(str::to_owned).collect())
    }
}

impl From<IndexMap<String, String>> for Entry {
    fn from(fields: IndexMap<String, String>) -> Self {
        Entry::Named(fields)
    }
}

/// Serializable summary of a table.
#[derive(Debug, Serialize)]
pub struct TableDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: u64,
    pub columns: Vec<String>,
    pub fields: Vec<Row>,
    pub missing_index_file: Option<String>,
}

/// The derived part of a table: what [`build`] produces.
#[derive(Debug, Clone, PartialEq)]
pub struct TableState {
    pub kind: TableKind,
    pub schema: TableSchema,
    pub content: TableContent,
}

fn row_hash(row: &[String], separator: &str) -> blake3::Hash {
    blake3::hash(row.join(separator).as_bytes())
}

impl TableState {
    fn deduplicate(&mut self) {
        let mut seen = HashSet::new();
        let name = &self.schema.name;
        let separator = &self.schema.separator;
        self.content.rows.retain(|row| {
            let fresh = seen.insert(row_hash(row, separator));
            if !fresh {
                debug!(
                    table = %name,
                    ?row,
                    "Found duplicate entry but duplicates are not allowed, removing additional entry"
                );
            }
            fresh
        });
    }

    fn extend_rows(&mut self, rows: Vec<Row>) {
        self.content.rows.extend(rows);
        if !self.schema.allow_duplicate_entries {
            self.deduplicate();
        }
    }

    fn bump(&mut self) -> u64 {
        self.content.version += 1;
        self.content.version
    }

    fn fields_of(&self, entry: Entry) -> Row {
        match entry {
            Entry::Fields(fields) => fields,
            Entry::Named(mut named) => self
                .schema
                .columns
                .names()
                .into_iter()
                .map(|name| match name.as_deref().and_then(|name| named.swap_remove(name)) {
                    Some(value) => value,
                    None => {
                        debug!(
                            table = %self.schema.name,
                            column = ?name,
                            "Using default column value when adding data table entry"
                        );
                        self.schema.empty_field_by_name(name.as_deref()).to_owned()
                    }
                })
                .collect(),
        }
    }

    fn persist_target(&self, source: Option<&RepositoryInfo>) -> Option<&FileInfo> {
        self.content
            .files
            .values()
            .find(|info| info.accepts_writes_from(source))
    }

    fn add_entry(
        &mut self,
        entry: Entry,
        allow_duplicates: bool,
        persist: bool,
        source: Option<&RepositoryInfo>,
    ) -> Result<u64, ErrorDetail> {
        let fields = self.fields_of(entry);
        let required = self.schema.columns.min_width();
        if fields.len() < required {
            return Err(ErrorDetail::RowTooNarrow {
                got: fields.len(),
                required,
                fields,
            });
        }
        let fields = tabular::replace_field_separators(
            &fields,
            &self.schema.separator,
            &self.schema.comment_char,
        );
        let duplicates_allowed = allow_duplicates && self.schema.allow_duplicate_entries;
        if !duplicates_allowed && self.content.rows.contains(&fields) {
            return Err(ErrorDetail::DuplicateEntry(fields));
        }
        if persist {
            let Some(target) = self.persist_target(source) else {
                return Err(ErrorDetail::NoPersistTarget(fields));
            };
            debug!(path = %target.path, table = %self.schema.name, "Persisting changes to file");
            tabular::append_row(Path::new(&target.path), &fields, &self.schema.separator)?;
        }
        self.content.rows.push(fields);
        Ok(self.bump())
    }

    fn add_entries(
        &mut self,
        entries: impl IntoIterator<Item = Entry>,
        allow_duplicates: bool,
        persist: bool,
        source: Option<&RepositoryInfo>,
    ) -> u64 {
        for entry in entries {
            if let Err(error) = self.add_entry(entry, allow_duplicates, persist, source) {
                error!(%error, table = %self.schema.name, "Failed to add data table entry");
            }
        }
        self.content.version
    }

    fn merge(&mut self, other: TableState, allow_duplicates: bool) -> Result<u64, ErrorDetail> {
        if self.schema.columns != other.schema.columns {
            return Err(column_mismatch(&self.schema, &other.schema));
        }
        for (path, info) in other.content.files {
            self.content.files.entry(path).or_insert(info);
        }
        if self.schema.allow_duplicate_entries && !other.schema.allow_duplicate_entries {
            debug!(
                table = %self.schema.name,
                "Merged table does not allow duplicate entries, deduplicating all previous entries"
            );
            self.schema.allow_duplicate_entries = false;
            self.deduplicate();
        }
        let rows = other.content.rows.into_iter().map(Entry::Fields);
        Ok(self.add_entries(rows, allow_duplicates, false, None))
    }

    fn load_file(
        &mut self,
        source: &FileSource,
        params: &LoadParameters,
        repository: Option<&RepositoryInfo>,
        index: &LocationIndex,
    ) {
        let name = self.schema.name.clone();
        let format = self.kind.source().file_format();
        let from_shed_config = params.origin == LoadOrigin::Shed;
        let mut errors = Vec::new();

        let (key, location, found) = match source {
            FileSource::Url(url) => match remote::fetch(url, &name, params.url_timeout) {
                Ok(buffered) => {
                    debug!(%url, path = %buffered.path().display(), table = %name, "Loading data table URL");
                    let rows = self.kind.source().parse_rows(&self.schema, buffered.path(), &mut errors);
                    self.extend_rows(rows);
                    (url.to_string(), FileLocation::Url, true)
                }
                Err(error) => {
                    error!(%error, table = %name, "Error loading data table URL");
                    errors.push(error.to_string());
                    (url.to_string(), FileLocation::Url, false)
                }
            },
            FileSource::Path(path) => {
                let (filename, found) = resolve_local(path, params, index);
                (filename, FileLocation::Local, found)
            }
            FileSource::FromConfig(config_key) => match params.other_config.get(config_key) {
                Some(path) => {
                    let (filename, found) = resolve_local(path, params, index);
                    (filename, FileLocation::Local, found)
                }
                None => {
                    debug!(key = %config_key, table = %name, "No configured path for file element");
                    return;
                }
            },
        };

        if location == FileLocation::Local && found {
            let rows = self
                .kind
                .source()
                .parse_rows(&self.schema, Path::new(&key), &mut errors);
            self.extend_rows(rows);
        }
        if !found {
            warn!(path = %key, table = %name, "Cannot find index file for tool data table");
            self.content.missing_index_file = Some(key.clone());
        }

        let known = self.content.files.get(&key).is_some_and(|info| info.found);
        if known {
            debug!(path = %key, table = %name, "Filename already known, not adding");
            return;
        }
        self.content.files.insert(
            key.clone(),
            FileInfo {
                path: key,
                found,
                location,
                format,
                from_shed_config,
                data_root: params.data_root.clone(),
                repository: repository.cloned(),
                errors,
            },
        );
    }
}

fn column_mismatch(expected: &TableSchema, got: &TableSchema) -> ErrorDetail {
    ErrorDetail::ColumnMismatch {
        expected: format!("{}:{}", expected.name, expected.columns.describe()),
        got: format!("{}:{}", got.name, got.columns.describe()),
    }
}

/// Resolve a configured location file path, returning the path to use and whether it exists.
fn resolve_local(path: &str, params: &LoadParameters, index: &LocationIndex) -> (String, bool) {
    let data_root = &params.data_root;
    let mut filename = match params.here() {
        Some(here) => template::expand_here(path, &here),
        None => path.to_owned(),
    };
    let shed = params.origin == LoadOrigin::Shed;
    if shed && !data_root.as_os_str().is_empty() {
        if let Some(basename) = Path::new(&filename).file_name() {
            filename = data_root.join(basename).to_string_lossy().into_owned();
        }
    }
    if index.exists(&filename) {
        return (filename, true);
    }
    let original = Path::new(&filename);
    if original.is_absolute() {
        return (filename, false);
    }
    let (Some(dir), Some(basename)) = (original.parent(), original.file_name()) else {
        return (filename, false);
    };
    if dir == data_root.as_path() {
        return (filename, false);
    }
    let corrected = data_root.join(basename);
    if index.exists(&corrected) {
        return (corrected.to_string_lossy().into_owned(), true);
    }
    let sample = format!("{}.sample", corrected.display());
    if !shed && index.exists(&sample) {
        info!(path = %corrected.display(), "Could not find tool data, reading sample");
        return (sample, true);
    }
    (filename, false)
}

/// Build a table's state from its load parameters.
pub fn build(params: &LoadParameters, index: &LocationIndex) -> Result<TableState, Error> {
    let context = match &params.config_path {
        Some(path) => ErrorContext::path(path),
        None => ErrorContext::default(),
    };
    let definition = TableDefinition::from_element(&params.element)
        .map_err(|detail| context.error(detail))?;
    let TableDefinition {
        kind,
        schema,
        files,
        repository,
    } = definition;
    let mut state = TableState {
        kind,
        schema,
        content: TableContent::default(),
    };
    for source in &files {
        state.load_file(source, params, repository.as_ref(), index);
    }
    Ok(state)
}

#[derive(Debug)]
pub struct Table {
    state: TableState,
    load: LoadParameters,
    merges: Vec<MergeRecord>,
    index: Arc<LocationIndex>,
}

impl Table {
    pub fn load(load: LoadParameters, index: Arc<LocationIndex>) -> Result<Self, Error> {
        let state = build(&load, &index)?;
        Ok(Self {
            state,
            load,
            merges: Vec::new(),
            index,
        })
    }

    pub(crate) fn from_parts(
        state: TableState,
        load: LoadParameters,
        merges: Vec<MergeRecord>,
        index: Arc<LocationIndex>,
    ) -> Self {
        Self {
            state,
            load,
            merges,
            index,
        }
    }

    fn context(&self) -> ErrorContext {
        ErrorContext::table(&self.state.schema.name)
    }

    pub fn name(&self) -> &str {
        &self.state.schema.name
    }

    pub fn kind(&self) -> &TableKind {
        &self.state.kind
    }

    pub fn schema(&self) -> &TableSchema {
        &self.state.schema
    }

    pub fn columns(&self) -> &ColumnSpec {
        &self.state.schema.columns
    }

    pub fn content(&self) -> &TableContent {
        &self.state.content
    }

    pub fn load_parameters(&self) -> &LoadParameters {
        &self.load
    }

    pub fn merges(&self) -> &[MergeRecord] {
        &self.merges
    }

    pub fn allow_duplicate_entries(&self) -> bool {
        self.state.schema.allow_duplicate_entries
    }

    pub fn fields(&self) -> &[Row] {
        &self.state.content.rows
    }

    pub fn version(&self) -> u64 {
        self.state.content.version
    }

    pub fn is_current_version(&self, version: u64) -> bool {
        self.state.content.version == version
    }

    pub fn version_fields(&self) -> (u64, &[Row]) {
        (self.version(), self.fields())
    }

    pub fn files(&self) -> &IndexMap<String, FileInfo> {
        &self.state.content.files
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state.content.files.contains_key(path)
    }

    pub fn missing_index_file(&self) -> Option<&str> {
        self.state.content.missing_index_file.as_deref()
    }

    pub fn column_names(&self) -> Vec<Option<String>> {
        self.state.schema.columns.names()
    }

    fn named(&self, names: &[Option<String>], row: &[String]) -> IndexMap<String, String> {
        names
            .iter()
            .zip(row)
            .enumerate()
            .map(|(i, (name, value))| (name.clone().unwrap_or_else(|| i.to_string()), value.clone()))
            .collect()
    }

    /// Every row keyed by column name (or index for unnamed columns).
    pub fn named_fields(&self) -> Vec<IndexMap<String, String>> {
        let names = self.column_names();
        self.fields().iter().map(|row| self.named(&names, row)).collect()
    }

    fn matching<'a>(&'a self, query: &str, value: &'a str) -> impl Iterator<Item = &'a Row> + 'a {
        let column = self.columns().index_of(query);
        self.fields().iter().filter(move |row| {
            column.is_some_and(|column| row.get(column).is_some_and(|field| field == value))
        })
    }

    /// Values of `return_column` for every row whose `query_column` equals `value`.
    pub fn get_entries(&self, query_column: &str, value: &str, return_column: &str) -> Vec<String> {
        let Some(ret) = self.columns().index_of(return_column) else {
            return Vec::new();
        };
        self.matching(query_column, value)
            .filter_map(|row| row.get(ret).cloned())
            .collect()
    }

    pub fn get_entry(&self, query_column: &str, value: &str, return_column: &str) -> Option<String> {
        let ret = self.columns().index_of(return_column)?;
        self.matching(query_column, value)
            .find_map(|row| row.get(ret).cloned())
    }

    /// Whole rows, keyed by column name, whose `query_column` equals `value`.
    pub fn get_named_entries(&self, query_column: &str, value: &str) -> Vec<IndexMap<String, String>> {
        let names = self.column_names();
        self.matching(query_column, value)
            .map(|row| self.named(&names, row))
            .collect()
    }

    /// Named view of the last row whose `value` column equals `value`.
    pub fn get_field(&self, value: &str) -> Option<TableField> {
        self.named_fields()
            .into_iter()
            .rfind(|fields| fields.get("value").is_some_and(|v| v == value))
            .map(TableField::new)
    }

    pub fn add_entry(
        &mut self,
        entry: impl Into<Entry>,
        allow_duplicates: bool,
        persist: bool,
        source: Option<&RepositoryInfo>,
    ) -> Result<u64, Error> {
        self.state
            .add_entry(entry.into(), allow_duplicates, persist, source)
            .map_err(|detail| self.context().error(detail))
    }

    /// Add every entry independently; failures are logged and skipped.
    pub fn add_entries<I>(
        &mut self,
        entries: I,
        allow_duplicates: bool,
        persist: bool,
        source: Option<&RepositoryInfo>,
    ) -> u64
    where
        I: IntoIterator,
        I::Item: Into<Entry>,
    {
        self.state.add_entries(
            entries.into_iter().map(Into::into),
            allow_duplicates,
            persist,
            source,
        )
    }

    /// Drop matching lines from every location file, then reload.
    pub fn remove_entry(&mut self, values: &[String]) -> Result<u64, Error> {
        let values = tabular::replace_field_separators(
            values,
            &self.state.schema.separator,
            &self.state.schema.comment_char,
        );
        self.state
            .kind
            .source()
            .remove_entry(&self.state.schema, &self.state.content.files, &values)
            .map_err(|detail| self.context().error(detail))?;
        self.reload_from_files()
    }

    /// Absorb another table with the same columns.
    pub fn merge(&mut self, other: Table, allow_duplicates: bool) -> Result<u64, Error> {
        let Table {
            state,
            load,
            merges,
            ..
        } = other;
        let version = self
            .state
            .merge(state, allow_duplicates)
            .map_err(|detail| self.context().error(detail))?;
        self.merges.push(MergeRecord {
            load,
            allow_duplicates,
        });
        self.merges.extend(merges);
        Ok(version)
    }

    /// Rebuild from the location files and replay merges; the version advances by one.
    pub fn reload_from_files(&mut self) -> Result<u64, Error> {
        let baseline = self.state.content.version;
        let mut state = build(&self.load, &self.index)?;
        for record in &self.merges {
            let other = build(&record.load, &self.index)?;
            state
                .merge(other, record.allow_duplicates)
                .map_err(|detail| self.context().error(detail))?;
        }
        state.content.version = baseline + 1;
        self.state = state;
        Ok(baseline + 1)
    }

    pub(crate) fn state(&self) -> &TableState {
        &self.state
    }

    pub fn describe(&self) -> TableDescription {
        TableDescription {
            name: self.name().to_owned(),
            kind: self.kind().tag(),
            version: self.version(),
            columns: self.columns().sorted_names(),
            fields: self.fields().to_vec(),
            missing_index_file: self.state.content.missing_index_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc, time::Duration};

    use indexmap::IndexMap;

    use crate::{ErrorDetail, location::LocationIndex, xml::Element};

    use super::{Entry, LoadOrigin, LoadParameters, Table};

    const HG19: &str = "hg19\thg19\tHuman\t/data/hg19.fa\n";

    fn index(root: &Path) -> Arc<LocationIndex> {
        Arc::new(LocationIndex::new(root).with_refresh_interval(Duration::ZERO))
    }

    fn table_element(name: &str, allow_duplicates: bool, file: &Path) -> Element {
        Element::new("table")
            .with_attribute("name", name)
            .with_attribute("comment_char", "#")
            .with_attribute(
                "allow_duplicate_entries",
                if allow_duplicates { "True" } else { "False" },
            )
            .with_child(Element::new("columns").with_text("value, dbkey, name, path"))
            .with_child(Element::new("file").with_attribute("path", file.to_string_lossy()))
    }

    fn load(root: &Path, allow_duplicates: bool, file: &str, content: &str) -> Table {
        let path = root.join(file);
        std::fs::write(&path, content).unwrap();
        let params = LoadParameters::new(
            table_element("all_fasta", allow_duplicates, &path),
            root,
            LoadOrigin::Core,
        );
        Table::load(params, index(root)).unwrap()
    }

    fn row(fields: [&str; 4]) -> Vec<String> {
        fields.map(str::to_owned).into()
    }

    #[test]
    fn test_add_named_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = load(dir.path(), true, "all_fasta.loc", HG19);
        let before = table.version();
        let version = table
            .add_entry(
                Entry::named([
                    ("value", "hg38"),
                    ("dbkey", "hg38"),
                    ("name", "Human38"),
                    ("path", "/data/hg38.fa"),
                ]),
                true,
                false,
                None,
            )
            .unwrap();
        assert_eq!(version, before + 1);
        assert_eq!(table.fields().len(), 2);
        assert_eq!(table.get_entries("dbkey", "hg38", "path"), ["/data/hg38.fa"]);
        assert_eq!(
            table.get_entry("value", "hg19", "name").as_deref(),
            Some("Human")
        );
        assert!(table.get_entries("unknown", "hg38", "path").is_empty());
        // file untouched without persist
        assert_eq!(
            std::fs::read_to_string(dir.path().join("all_fasta.loc")).unwrap(),
            HG19
        );
    }

    #[test]
    fn test_named_entry_uses_empty_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = load(dir.path(), true, "all_fasta.loc", HG19);
        table
            .add_entry(Entry::named([("value", "mm10")]), true, false, None)
            .unwrap();
        assert_eq!(table.fields()[1], ["mm10", "", "", ""]);
    }

    #[test]
    fn test_add_entry_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = load(dir.path(), false, "all_fasta.loc", HG19);
        let version = table.version();

        let narrow = table.add_entry(vec!["hg38", "hg38"], true, false, None);
        assert!(matches!(
            *narrow.unwrap_err().detail,
            ErrorDetail::RowTooNarrow { got: 2, required: 4, .. }
        ));
        let duplicate = table.add_entry(row(["hg19", "hg19", "Human", "/data/hg19.fa"]), true, false, None);
        assert!(matches!(
            *duplicate.unwrap_err().detail,
            ErrorDetail::DuplicateEntry(_)
        ));
        assert_eq!(table.version(), version);
        assert_eq!(table.fields().len(), 1);
    }

    #[test]
    fn test_persisted_entry_round_trips_through_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = load(dir.path(), true, "all_fasta.loc", HG19);
        let original = table.fields().to_vec();
        let hg38 = row(["hg38", "hg38", "Human38", "/data/hg38.fa"]);

        let added = table.add_entry(hg38.clone(), true, true, None).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("all_fasta.loc")).unwrap(),
            format!("{HG19}hg38\thg38\tHuman38\t/data/hg38.fa\n")
        );
        let removed = table.remove_entry(&hg38).unwrap();
        assert!(removed > added);
        assert_eq!(table.fields(), original.as_slice());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("all_fasta.loc")).unwrap(),
            HG19
        );
    }

    #[test]
    fn test_persist_requires_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = load(dir.path(), true, "all_fasta.loc", HG19);
        let repository = crate::RepositoryInfo {
            tool_shed: "toolshed.g2.bx.psu.edu".to_owned(),
            name: "bwa".to_owned(),
            owner: "devteam".to_owned(),
            installed_changeset_revision: "abc".to_owned(),
        };
        let result = table.add_entry(
            row(["hg38", "hg38", "Human38", "/data/hg38.fa"]),
            true,
            true,
            Some(&repository),
        );
        assert!(matches!(
            *result.unwrap_err().detail,
            ErrorDetail::NoPersistTarget(_)
        ));
        assert_eq!(table.fields().len(), 1);
    }

    #[test]
    fn test_remove_missing_row_still_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = load(dir.path(), true, "all_fasta.loc", HG19);
        let version = table.version();
        let next = table
            .remove_entry(&row(["nope", "nope", "Nope", "/nope"]))
            .unwrap();
        assert_eq!(next, version + 1);
        assert_eq!(table.fields().len(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("all_fasta.loc")).unwrap(),
            HG19
        );
    }

    #[test]
    fn test_merge_makes_duplicate_policy_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = load(
            dir.path(),
            true,
            "a.loc",
            "hg19\thg19\tHuman\t/data/hg19.fa\nhg19\thg19\tHuman\t/data/hg19.fa\nmm10\tmm10\tMouse\t/data/mm10.fa\n",
        );
        assert_eq!(a.fields().len(), 3);
        let b = load(dir.path(), false, "b.loc", "hg38\thg38\tHuman38\t/data/hg38.fa\n");

        a.merge(b, true).unwrap();
        assert!(!a.allow_duplicate_entries());
        assert_eq!(
            a.fields(),
            [
                row(["hg19", "hg19", "Human", "/data/hg19.fa"]),
                row(["mm10", "mm10", "Mouse", "/data/mm10.fa"]),
                row(["hg38", "hg38", "Human38", "/data/hg38.fa"]),
            ]
        );
        assert_eq!(a.files().len(), 2);
    }

    #[test]
    fn test_merge_rejects_different_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = load(dir.path(), true, "a.loc", HG19);
        let path = dir.path().join("b.loc");
        std::fs::write(&path, "hg19\t/data/hg19.fa\n").unwrap();
        let element = Element::new("table")
            .with_attribute("name", "all_fasta")
            .with_child(Element::new("columns").with_text("value, path"))
            .with_child(Element::new("file").with_attribute("path", path.to_string_lossy()));
        let b = Table::load(
            LoadParameters::new(element, dir.path(), LoadOrigin::Core),
            index(dir.path()),
        )
        .unwrap();
        let error = a.merge(b, false).unwrap_err();
        assert!(error.is_configuration_error());
    }

    #[test]
    fn test_reload_replays_merges() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = load(dir.path(), true, "a.loc", HG19);
        let b = load(dir.path(), true, "b.loc", "hg38\thg38\tHuman38\t/data/hg38.fa\n");
        a.merge(b, false).unwrap();
        let merged = a.fields().to_vec();

        std::fs::write(
            dir.path().join("b.loc"),
            "hg38\thg38\tHuman38\t/data/hg38.fa\nmm10\tmm10\tMouse\t/data/mm10.fa\n",
        )
        .unwrap();
        let version = a.version();
        assert_eq!(a.reload_from_files().unwrap(), version + 1);
        assert!(!a.is_current_version(version));
        assert_eq!(a.fields()[..2], merged[..]);
        assert_eq!(a.fields()[2], row(["mm10", "mm10", "Mouse", "/data/mm10.fa"]));
    }

    #[test]
    fn test_reload_detects_changed_schema_of_merged_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = load(dir.path(), true, "a.loc", HG19);
        let b = load(dir.path(), true, "b.loc", HG19);
        a.merge(b, false).unwrap();
        let mut changed = a.merges[0].load.element.clone();
        changed.children[0] = Element::new("columns").with_text("value, path");
        a.merges[0].load.element = changed;
        let version = a.version();
        assert!(a.reload_from_files().unwrap_err().is_configuration_error());
        assert_eq!(a.version(), version);
    }

    #[test]
    fn test_missing_file_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let params = LoadParameters::new(
            table_element("all_fasta", true, &dir.path().join("absent.loc")),
            dir.path(),
            LoadOrigin::Core,
        );
        let table = Table::load(params, index(dir.path())).unwrap();
        assert!(table.fields().is_empty());
        let missing = dir.path().join("absent.loc").to_string_lossy().into_owned();
        assert_eq!(table.missing_index_file(), Some(missing.as_str()));
        assert!(!table.files()[&missing].found);
    }

    #[test]
    fn test_sample_and_data_root_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("twobit.loc.sample"), "hg19\thg19\tHuman\t/data/hg19.2bit\n")
            .unwrap();
        std::fs::write(dir.path().join("bwa.loc"), HG19).unwrap();
        let element = |file: &str| {
            Element::new("table")
                .with_attribute("name", "t")
                .with_child(Element::new("columns").with_text("value, dbkey, name, path"))
                .with_child(Element::new("file").with_attribute("path", file))
        };

        let core = Table::load(
            LoadParameters::new(element("tool-data/twobit.loc"), dir.path(), LoadOrigin::Core),
            index(dir.path()),
        )
        .unwrap();
        assert_eq!(core.fields().len(), 1);
        assert!(core.files().keys().next().unwrap().ends_with("twobit.loc.sample"));

        let shed = Table::load(
            LoadParameters::new(element("tool-data/twobit.loc"), dir.path(), LoadOrigin::Shed),
            index(dir.path()),
        )
        .unwrap();
        assert!(shed.fields().is_empty());
        assert!(shed.missing_index_file().is_some());

        let rerooted = Table::load(
            LoadParameters::new(element("elsewhere/bwa.loc"), dir.path(), LoadOrigin::Shed),
            index(dir.path()),
        )
        .unwrap();
        assert_eq!(rerooted.fields().len(), 1);
    }

    #[test]
    fn test_from_config_indirection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.loc");
        std::fs::write(&path, HG19).unwrap();
        let element = Element::new("table")
            .with_attribute("name", "t")
            .with_child(Element::new("columns").with_text("value, dbkey, name, path"))
            .with_child(Element::new("file").with_attribute("from_config", "custom_loc"));
        let mut other = IndexMap::new();
        other.insert("custom_loc".to_owned(), path.to_string_lossy().into_owned());
        let table = Table::load(
            LoadParameters::new(element, dir.path(), LoadOrigin::Core).with_other_config(other),
            index(dir.path()),
        )
        .unwrap();
        assert_eq!(table.fields().len(), 1);
    }

    #[test]
    fn test_unreachable_url_degrades_to_missing() {
        let dir = tempfile::tempdir().unwrap();
        let element = Element::new("table")
            .with_attribute("name", "t")
            .with_child(Element::new("columns").with_text("value, dbkey, name, path"))
            .with_child(Element::new("file").with_attribute("url", "http://127.0.0.1:9/all_fasta.loc"));
        let table = Table::load(
            LoadParameters::new(element, dir.path(), LoadOrigin::Core)
                .with_url_timeout(Duration::from_secs(2)),
            index(dir.path()),
        )
        .unwrap();
        assert!(table.fields().is_empty());
        assert_eq!(
            table.missing_index_file(),
            Some("http://127.0.0.1:9/all_fasta.loc")
        );
        assert!(!table.files()["http://127.0.0.1:9/all_fasta.loc"].errors.is_empty());
    }

    #[test]
    fn test_named_fields_and_get_field() {
        let dir = tempfile::tempdir().unwrap();
        let table = load(
            dir.path(),
            true,
            "all_fasta.loc",
            "hg19\thg19\tHuman\t/data/hg19.fa\textra\n",
        );
        let named = table.named_fields();
        assert_eq!(named[0].get("path").map(String::as_str), Some("/data/hg19.fa"));
        assert_eq!(named[0].len(), 4);
        let field = table.get_field("hg19").unwrap();
        assert_eq!(field.get("dbkey"), Some("hg19"));
        assert!(table.get_field("mm10").is_none());
        let described = table.describe();
        assert_eq!(described.columns, ["value", "dbkey", "name", "path"]);
    }

    const CATALOG: &str = "genome_folder: genomes
genomes:
  hg38:
    genome_description: Human
    assets:
      fasta:
        tags:
          default:
            asset_digest: abc
            seek_keys:
              fasta: hg38.fa
";

    fn refgenie_field(name: &str, token: &str) -> Element {
        Element::new("field")
            .with_attribute("name", name)
            .with_attribute("template", "true")
            .with_text(format!("${{{token}}}"))
    }

    fn refgenie_element(catalog: &Path) -> Element {
        Element::new("table")
            .with_attribute("name", "all_fasta")
            .with_attribute("type", "refgenie")
            .with_attribute("asset", "fasta")
            .with_child(Element::new("file").with_attribute("path", catalog.to_string_lossy()))
            .with_child(refgenie_field("value", "__REFGENIE_UUID__"))
            .with_child(refgenie_field("dbkey", "__REFGENIE_GENOME__"))
            .with_child(refgenie_field("name", "__REFGENIE_DISPLAY_NAME__"))
            .with_child(refgenie_field("path", "__REFGENIE_ASSET__"))
    }

    #[test]
    fn test_add_entries_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = load(dir.path(), false, "all_fasta.loc", HG19);
        let version = table.version();
        let hg38 = row(["hg38", "hg38", "Human38", "/data/hg38.fa"]);
        let next = table.add_entries(
            [
                Entry::from(vec!["mm10", "mm10"]),
                Entry::from(row(["hg19", "hg19", "Human", "/data/hg19.fa"])),
                Entry::from(hg38.clone()),
            ],
            true,
            false,
            None,
        );
        assert_eq!(next, version + 1);
        assert_eq!(table.version(), next);
        assert_eq!(
            table.fields(),
            [row(["hg19", "hg19", "Human", "/data/hg19.fa"]), hg38]
        );
    }

    #[test]
    fn test_refgenie_repeated_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("genome_config.yaml");
        std::fs::write(&catalog, CATALOG).unwrap();
        let element = Element::new("table")
            .with_attribute("name", "t")
            .with_attribute("type", "refgenie")
            .with_attribute("asset", "fasta")
            .with_child(Element::new("file").with_attribute("path", catalog.to_string_lossy()))
            .with_child(
                Element::new("field")
                    .with_attribute("name", "value")
                    .with_attribute("column_index", "3")
                    .with_text("x"),
            )
            .with_child(
                Element::new("field")
                    .with_attribute("name", "value")
                    .with_attribute("column_index", "0")
                    .with_attribute("template", "true")
                    .with_text("${__REFGENIE_UUID__}"),
            );
        let error = Table::load(
            LoadParameters::new(element, dir.path(), LoadOrigin::Core),
            index(dir.path()),
        )
        .unwrap_err();
        assert!(error.is_configuration_error());
        assert!(matches!(*error.detail, ErrorDetail::DuplicateField(_)));
    }

    #[test]
    fn test_refgenie_remove_leaves_catalog_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("genome_config.yaml");
        std::fs::write(&catalog, CATALOG).unwrap();
        let mut refgenie = Table::load(
            LoadParameters::new(refgenie_element(&catalog), dir.path(), LoadOrigin::Core),
            index(dir.path()),
        )
        .unwrap();
        assert_eq!(refgenie.fields().len(), 1);
        let catalog_row = refgenie.fields()[0].clone();
        assert_eq!(catalog_row[0], "refgenie:hg38/fasta:default@abc");

        let tabular = load(dir.path(), true, "all_fasta.loc", HG19);
        refgenie.merge(tabular, false).unwrap();
        assert_eq!(refgenie.fields().len(), 2);

        let version = refgenie.version();
        assert_eq!(refgenie.remove_entry(&catalog_row).unwrap(), version + 1);
        assert_eq!(std::fs::read_to_string(&catalog).unwrap(), CATALOG);
        assert!(refgenie.fields().contains(&catalog_row));
        assert_eq!(refgenie.fields().len(), 2);

        let hg19 = row(["hg19", "hg19", "Human", "/data/hg19.fa"]);
        assert_eq!(refgenie.remove_entry(&hg19).unwrap(), version + 2);
        assert_eq!(std::fs::read_to_string(&catalog).unwrap(), CATALOG);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("all_fasta.loc")).unwrap(),
            ""
        );
        assert_eq!(refgenie.fields(), [catalog_row]);
    }
}
