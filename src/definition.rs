//! Table definitions parsed from `<table>` configuration elements.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ErrorDetail, xml::Element};

pub const DEFAULT_TABLE_TYPE: &str = "tabular";

pub fn as_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "y" | "t" | "1"
    )
}

/// Tool shed repository a table definition was installed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub tool_shed: String,
    pub name: String,
    pub owner: String,
    pub installed_changeset_revision: String,
}

impl RepositoryInfo {
    fn from_element(elem: &Element) -> Self {
        let text = |name: &str| {
            elem.find(name)
                .map(|child| child.text().to_owned())
                .unwrap_or_default()
        };
        Self {
            tool_shed: text("tool_shed"),
            name: text("repository_name"),
            owner: text("repository_owner"),
            installed_changeset_revision: text("installed_changeset_revision"),
        }
    }
}

/// Where a `<file>` entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "location", rename_all = "snake_case")]
pub enum FileSource {
    Path(String),
    Url(url::Url),
    FromConfig(String),
}

impl FileSource {
    fn from_element(elem: &Element) -> Option<Self> {
        if let Some(path) = elem.attr("path") {
            return Some(FileSource::Path(path.to_owned()));
        }
        if let Some(url) = elem.attr("url").filter(|url| !url.is_empty()) {
            return match url::Url::parse(url) {
                Ok(url) => Some(FileSource::Url(url)),
                Err(error) => {
                    debug!(%error, %url, "Ignoring file element with an invalid url");
                    None
                }
            };
        }
        elem.attr("from_config")
            .filter(|key| !key.is_empty())
            .map(|key| FileSource::FromConfig(key.to_owned()))
    }
}

/// Column name to index mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub columns: IndexMap<String, usize>,
    pub largest_index: usize,
}

impl ColumnSpec {
    fn finish(mut columns: IndexMap<String, usize>) -> Result<Self, ErrorDetail> {
        let Some(&value) = columns.get("value") else {
            return Err(ErrorDetail::MissingValueColumn);
        };
        columns.entry("name".to_owned()).or_insert(value);
        let largest_index = columns.values().copied().max().unwrap_or_default();
        Ok(Self {
            columns,
            largest_index,
        })
    }

    /// Build from an ordered list of names, index = position.
    pub fn from_names<I, S>(names: I) -> Result<Self, ErrorDetail>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| (name.into(), index))
            .collect();
        Self::finish(columns)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    pub fn min_width(&self) -> usize {
        self.largest_index + 1
    }

    /// Column name for every index; the `value` column wins when names share an index.
    pub fn names(&self) -> Vec<Option<String>> {
        (0..=self.largest_index)
            .map(|i| {
                let mut found: Option<&str> = None;
                for (name, &index) in &self.columns {
                    if index != i {
                        continue;
                    }
                    if found.is_none() || name == "value" {
                        found = Some(name);
                    }
                }
                found.map(str::to_owned)
            })
            .collect()
    }

    pub fn sorted_names(&self) -> Vec<String> {
        use itertools::Itertools as _;
        self.columns
            .iter()
            .sorted_by_key(|(_, index)| **index)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn describe(&self) -> String {
        format!("{:?}", self.columns)
    }
}

/// One `<field>` of a refgenie table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub value: String,
    pub column_index: usize,
    pub template: bool,
    pub strip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefgenieSpec {
    pub asset: String,
    pub fields: Vec<FieldSpec>,
}

/// Closed set of table variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableKind {
    Tabular,
    Refgenie(RefgenieSpec),
}

type KindConstructor =
    fn(&Element, &mut IndexMap<String, String>) -> Result<(TableKind, ColumnSpec), ErrorDetail>;

/// Type tag to constructor table.
const TABLE_KINDS: &[(&str, KindConstructor)] =
    &[("tabular", tabular_kind), ("refgenie", refgenie_kind)];

fn tabular_kind(
    elem: &Element,
    empty_field_values: &mut IndexMap<String, String>,
) -> Result<(TableKind, ColumnSpec), ErrorDetail> {
    if let Some(columns) = elem.find("columns") {
        let spec = ColumnSpec::from_names(columns.text().split(',').map(str::trim))?;
        return Ok((TableKind::Tabular, spec));
    }
    let mut columns = IndexMap::new();
    for column in elem.find_all("column") {
        let name = column.attr("name").ok_or(ErrorDetail::MissingAttribute {
            element: "column",
            attribute: "name",
        })?;
        let index = column.attr("index").ok_or(ErrorDetail::MissingAttribute {
            element: "column",
            attribute: "index",
        })?;
        let index = index
            .trim()
            .parse::<usize>()
            .map_err(|_| ErrorDetail::InvalidColumnIndex(index.to_owned()))?;
        columns.insert(name.to_owned(), index);
        if let Some(empty) = column.attr("empty_field_value") {
            empty_field_values.insert(name.to_owned(), empty.to_owned());
        }
    }
    Ok((TableKind::Tabular, ColumnSpec::finish(columns)?))
}

fn refgenie_kind(
    elem: &Element,
    empty_field_values: &mut IndexMap<String, String>,
) -> Result<(TableKind, ColumnSpec), ErrorDetail> {
    let asset = elem
        .attr("asset")
        .filter(|asset| !asset.is_empty())
        .ok_or(ErrorDetail::MissingAsset)?;
    let mut columns = IndexMap::new();
    let mut fields = Vec::new();
    for (position, field) in elem.find_all("field").enumerate() {
        let name = field
            .attr("name")
            .filter(|name| !name.is_empty())
            .ok_or(ErrorDetail::MissingAttribute {
                element: "field",
                attribute: "name",
            })?;
        let column_index = match field.attr("column_index") {
            Some(index) => index
                .trim()
                .parse::<usize>()
                .map_err(|_| ErrorDetail::InvalidColumnIndex(index.to_owned()))?,
            None => position,
        };
        if columns.contains_key(name) {
            return Err(ErrorDetail::DuplicateField(name.to_owned()));
        }
        if let Some(empty) = field.attr("empty_field_value") {
            empty_field_values.insert(name.to_owned(), empty.to_owned());
        }
        columns.insert(name.to_owned(), column_index);
        fields.push(FieldSpec {
            name: name.to_owned(),
            value: field.text().to_owned(),
            column_index,
            template: field.attr("template").is_some_and(as_bool),
            strip: field.attr("strip").is_some_and(as_bool),
        });
    }
    let spec = ColumnSpec::finish(columns)?;
    Ok((
        TableKind::Refgenie(RefgenieSpec {
            asset: asset.to_owned(),
            fields,
        }),
        spec,
    ))
}

impl TableKind {
    pub fn tag(&self) -> &'static str {
        match self {
            TableKind::Tabular => "tabular",
            TableKind::Refgenie(_) => "refgenie",
        }
    }
}

/// Schema and formatting of a table, shared by all variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: ColumnSpec,
    pub separator: String,
    pub comment_char: String,
    pub empty_field_value: String,
    #[serde(default)]
    pub empty_field_values: IndexMap<String, String>,
    pub allow_duplicate_entries: bool,
}

impl TableSchema {
    pub fn empty_field_by_name(&self, name: Option<&str>) -> &str {
        name.and_then(|name| self.empty_field_values.get(name))
            .unwrap_or(&self.empty_field_value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub kind: TableKind,
    pub schema: TableSchema,
    pub files: Vec<FileSource>,
    pub repository: Option<RepositoryInfo>,
}

impl TableDefinition {
    pub fn from_element(elem: &Element) -> Result<Self, ErrorDetail> {
        let tag = elem.attr("type").unwrap_or(DEFAULT_TABLE_TYPE);
        let constructor = TABLE_KINDS
            .iter()
            .find_map(|(key, constructor)| (*key == tag).then_some(*constructor))
            .ok_or_else(|| ErrorDetail::UnknownTableType(tag.to_owned()))?;
        let name = elem.attr("name").ok_or(ErrorDetail::MissingAttribute {
            element: "table",
            attribute: "name",
        })?;
        let mut empty_field_values = IndexMap::new();
        let (kind, columns) = constructor(elem, &mut empty_field_values)?;
        let files = elem
            .find_all("file")
            .filter_map(|file| {
                let source = FileSource::from_element(file);
                if source.is_none() {
                    debug!(
                        table = %name,
                        element = %file.to_pretty_string().trim_end(),
                        "Encountered a file element without a path value"
                    );
                }
                source
            })
            .collect();
        Ok(Self {
            kind,
            schema: TableSchema {
                name: name.to_owned(),
                columns,
                separator: elem.attr("separator").unwrap_or("\t").to_owned(),
                comment_char: elem.attr("comment_char").unwrap_or("#").to_owned(),
                empty_field_value: elem.attr("empty_field_value").unwrap_or_default().to_owned(),
                empty_field_values,
                allow_duplicate_entries: elem
                    .attr("allow_duplicate_entries")
                    .is_none_or(as_bool),
            },
            files,
            repository: elem
                .find("tool_shed_repository")
                .map(RepositoryInfo::from_element),
        })
    }
}
