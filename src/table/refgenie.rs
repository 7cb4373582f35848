//! Tables backed by a refgenie asset catalog
//!
//! Instead of reading rows from a delimited file, every genome/asset/tag
//! entry of the configured asset type becomes one row whose fields are
//! rendered from the `<field>` templates of the table definition.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::{
    ErrorDetail,
    definition::{RefgenieSpec, TableSchema},
    template::{self, Accessor},
};

use super::{FileFormat, FileInfo, Row, RowSource, tabular};

const UUID: &str = "__REFGENIE_UUID__";
const GENOME: &str = "__REFGENIE_GENOME__";
const TAG: &str = "__REFGENIE_TAG__";
const DISPLAY_NAME: &str = "__REFGENIE_DISPLAY_NAME__";
const ASSET: &str = "__REFGENIE_ASSET__";
const ASSET_NAME: &str = "__REFGENIE_ASSET_NAME__";
const DIGEST: &str = "__REFGENIE_DIGEST__";
const GENOME_ATTRIBUTES: &str = "__REFGENIE_GENOME_ATTRIBUTES__";
const CATALOG: &str = "__REFGENIE__";
const SEEK_KEY: &str = "__REFGENIE_SEEK_KEY__";

/// Read access to an asset catalog.
pub trait AssetCatalog {
    /// Human readable origin of the catalog, e.g. its config file.
    fn source(&self) -> String;

    fn genomes_by_asset(&self, asset: &str) -> Vec<String>;

    fn genome_attributes(&self, genome: &str) -> serde_json::Map<String, serde_json::Value>;

    /// `(asset, tag)` pairs available for a genome.
    fn tagged_assets(&self, genome: &str) -> Vec<(String, String)>;

    fn digest(&self, genome: &str, asset: &str, tag: &str) -> Option<String>;

    /// Resolve a local path; `seek_key` defaults to the asset name.
    fn seek(&self, genome: &str, asset: &str, tag: &str, seek_key: Option<&str>)
    -> Option<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog ({path:?}): {error}")]
    Read {
        error: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse catalog ({path:?}): {error}")]
    Parse {
        error: serde_yaml::Error,
        path: PathBuf,
    },
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    genome_folder: Option<PathBuf>,
    #[serde(default)]
    genomes: IndexMap<String, GenomeEntry>,
}

#[derive(Deserialize)]
struct GenomeEntry {
    #[serde(default)]
    assets: IndexMap<String, AssetEntry>,
    #[serde(flatten)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct AssetEntry {
    #[serde(default)]
    tags: IndexMap<String, TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    #[serde(default)]
    asset_path: Option<String>,
    #[serde(default)]
    asset_digest: Option<String>,
    #[serde(default)]
    seek_keys: IndexMap<String, String>,
}

/// A refgenie configuration file read from disk.
pub struct YamlCatalog {
    path: PathBuf,
    genome_folder: PathBuf,
    genomes: IndexMap<String, GenomeEntry>,
}

impl YamlCatalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|error| CatalogError::Read {
            error,
            path: path.to_owned(),
        })?;
        Self::parse(&src, path)
    }

    pub fn parse(src: &str, path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let file: CatalogFile = serde_yaml::from_str(src).map_err(|error| CatalogError::Parse {
            error,
            path: path.to_owned(),
        })?;
        let base = path.parent().unwrap_or(Path::new(""));
        let genome_folder = match file.genome_folder {
            Some(folder) => base.join(folder),
            None => base.to_owned(),
        };
        Ok(Self {
            path: path.to_owned(),
            genome_folder,
            genomes: file.genomes,
        })
    }

    fn tag(&self, genome: &str, asset: &str, tag: &str) -> Option<&TagEntry> {
        self.genomes.get(genome)?.assets.get(asset)?.tags.get(tag)
    }
}

impl AssetCatalog for YamlCatalog {
    fn source(&self) -> String {
        self.path.display().to_string()
    }

    fn genomes_by_asset(&self, asset: &str) -> Vec<String> {
        self.genomes
            .iter()
            .filter(|(_, entry)| {
                entry
                    .assets
                    .get(asset)
                    .is_some_and(|asset| !asset.tags.is_empty())
            })
            .map(|(genome, _)| genome.clone())
            .collect()
    }

    fn genome_attributes(&self, genome: &str) -> serde_json::Map<String, serde_json::Value> {
        self.genomes
            .get(genome)
            .map(|entry| entry.attributes.clone())
            .unwrap_or_default()
    }

    fn tagged_assets(&self, genome: &str) -> Vec<(String, String)> {
        let Some(entry) = self.genomes.get(genome) else {
            return Vec::new();
        };
        entry
            .assets
            .iter()
            .flat_map(|(asset, entry)| {
                entry
                    .tags
                    .keys()
                    .map(move |tag| (asset.clone(), tag.clone()))
            })
            .collect()
    }

    fn digest(&self, genome: &str, asset: &str, tag: &str) -> Option<String> {
        self.tag(genome, asset, tag)?.asset_digest.clone()
    }

    fn seek(
        &self,
        genome: &str,
        asset: &str,
        tag: &str,
        seek_key: Option<&str>,
    ) -> Option<String> {
        let entry = self.tag(genome, asset, tag)?;
        let base = self
            .genome_folder
            .join(genome)
            .join(entry.asset_path.as_deref().unwrap_or(asset));
        let key = seek_key.unwrap_or(asset);
        let path = match entry.seek_keys.get(key) {
            Some(relative) => base.join(relative),
            None if key == asset => base,
            None => return None,
        };
        Some(path.display().to_string())
    }
}

/// Values available to field templates for one catalog entry.
struct CatalogEntry<'a> {
    catalog: &'a dyn AssetCatalog,
    genome: &'a str,
    asset: &'a str,
    tag: &'a str,
    uuid: String,
    digest: String,
    display_name: String,
    attributes: serde_json::Map<String, serde_json::Value>,
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl CatalogEntry<'_> {
    fn resolve(&self, name: &str, accessor: Option<Accessor<'_>>) -> Option<String> {
        match (name, accessor) {
            (UUID, None) => Some(self.uuid.clone()),
            (GENOME, None) => Some(self.genome.to_owned()),
            (TAG, None) => Some(self.tag.to_owned()),
            (DISPLAY_NAME, None) => Some(self.display_name.clone()),
            (ASSET, None) => self.catalog.seek(self.genome, self.asset, self.tag, None),
            (ASSET_NAME, None) => Some(self.asset.to_owned()),
            (DIGEST, None) => Some(self.digest.clone()),
            (GENOME_ATTRIBUTES, None) => serde_json::to_string(&self.attributes).ok(),
            (GENOME_ATTRIBUTES, Some(Accessor::Key(key))) => {
                self.attributes.get(key).map(value_to_string)
            }
            (CATALOG, None) => Some(self.catalog.source()),
            (SEEK_KEY, Some(Accessor::Call(key))) => {
                self.catalog.seek(self.genome, self.asset, self.tag, Some(key))
            }
            _ => None,
        }
    }
}

impl RefgenieSpec {
    pub fn rows_from_catalog(&self, schema: &TableSchema, catalog: &dyn AssetCatalog) -> Vec<Row> {
        let width = self
            .fields
            .iter()
            .map(|field| field.column_index + 1)
            .fold(schema.columns.min_width(), usize::max);
        let mut rows = Vec::new();
        for genome in catalog.genomes_by_asset(&self.asset) {
            let attributes = catalog.genome_attributes(&genome);
            let description = attributes
                .get("genome_description")
                .map(value_to_string)
                .filter(|description| !description.is_empty())
                .map(|description| format!("{description} (refgenie: {genome})"));
            for (asset, tag) in catalog.tagged_assets(&genome) {
                if asset != self.asset {
                    continue;
                }
                let digest = catalog.digest(&genome, &asset, &tag).unwrap_or_default();
                let entry = CatalogEntry {
                    catalog,
                    genome: &genome,
                    asset: &asset,
                    tag: &tag,
                    uuid: format!("refgenie:{genome}/{asset}:{tag}@{digest}"),
                    display_name: description
                        .clone()
                        .unwrap_or_else(|| format!("{genome}/{asset}:{tag}")),
                    digest,
                    attributes: attributes.clone(),
                };
                let mut row = vec![String::new(); width];
                for field in &self.fields {
                    let mut value = if field.template {
                        template::substitute(&field.value, |name, accessor| {
                            entry.resolve(name, accessor)
                        })
                    } else {
                        field.value.clone()
                    };
                    if field.strip {
                        value = value.trim().to_owned();
                    }
                    if let Some(slot) = row.get_mut(field.column_index) {
                        *slot = value;
                    }
                }
                rows.push(row);
            }
        }
        rows
    }
}

impl RowSource for RefgenieSpec {
    fn parse_rows(&self, schema: &TableSchema, path: &Path, errors: &mut Vec<String>) -> Vec<Row> {
        let catalog = match YamlCatalog::open(path) {
            Ok(catalog) => catalog,
            Err(error) => {
                error!(%error, table = %schema.name, "Unable to load refgenie config file");
                errors.push(error.to_string());
                return Vec::new();
            }
        };
        let rows = self.rows_from_catalog(schema, &catalog);
        debug!(
            count = rows.len(),
            path = %path.display(),
            asset = %self.asset,
            table = %schema.name,
            "Loaded entries from refgenie catalog"
        );
        rows
    }

    fn remove_entry(
        &self,
        schema: &TableSchema,
        files: &IndexMap<String, FileInfo>,
        values: &[String],
    ) -> Result<(), ErrorDetail> {
        warn!(
            table = %schema.name,
            "Deletion from refgenie-backed data tables is not supported, only location files are updated"
        );
        tabular::remove_from_files(schema, files, values)
    }

    fn file_format(&self) -> FileFormat {
        FileFormat::Catalog
    }
}
