//! Registry of named tool data tables
//!
//! Tables arriving under a name that is already registered are merged into the
//! existing table with duplicates disallowed.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    Error, ErrorContext, ErrorDetail,
    location::LocationIndex,
    snapshot::{RegistrySnapshot, TableSnapshot},
    table::{DEFAULT_URL_TIMEOUT, LoadOrigin, LoadParameters, Table},
    xml::Element,
};

pub mod persist;

/// Which tables [`TableRegistry::reload`] rebuilds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadSelector {
    All,
    Names(Vec<String>),
    Path(String),
}

/// Result of importing definitions shipped with an installed repository.
#[derive(Debug, Default, Serialize)]
pub struct ConfigImport {
    pub elements: Vec<Element>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct TableRegistry {
    data_root: PathBuf,
    other_config: IndexMap<String, String>,
    url_timeout: Duration,
    index: Arc<LocationIndex>,
    tables: IndexMap<String, Table>,
}

fn table_elements(root: Element) -> Result<Vec<Element>, ErrorDetail> {
    match root.name.as_str() {
        "tables" => Ok(root
            .children
            .into_iter()
            .filter(|child| child.name == "table")
            .collect()),
        "table" => Ok(vec![root]),
        other => Err(ErrorDetail::UnexpectedRoot(other.to_owned())),
    }
}

impl TableRegistry {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        let index = Arc::new(LocationIndex::new(&data_root));
        Self {
            data_root,
            other_config: IndexMap::new(),
            url_timeout: DEFAULT_URL_TIMEOUT,
            index,
            tables: IndexMap::new(),
        }
    }

    pub fn with_other_config(mut self, other_config: IndexMap<String, String>) -> Self {
        self.other_config = other_config;
        self
    }

    pub fn with_url_timeout(mut self, timeout: Duration) -> Self {
        self.url_timeout = timeout;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.index = Arc::new(LocationIndex::new(&self.data_root).with_refresh_interval(interval));
        self
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn index(&self) -> &Arc<LocationIndex> {
        &self.index
    }

    fn parameters(&self, element: Element, config_path: Option<&Path>, origin: LoadOrigin) -> LoadParameters {
        let params = LoadParameters::new(element, &self.data_root, origin)
            .with_other_config(self.other_config.clone())
            .with_url_timeout(self.url_timeout);
        match config_path {
            Some(path) => params.with_config_path(path),
            None => params,
        }
    }

    /// Load every config file in order.
    pub fn load_from_configs<I, P>(&mut self, paths: I, origin: LoadOrigin) -> Result<Vec<Element>, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut elements = Vec::new();
        for path in paths {
            elements.extend(self.load_from_config(path.as_ref(), origin)?);
        }
        Ok(elements)
    }

    pub fn load_from_config(&mut self, path: &Path, origin: LoadOrigin) -> Result<Vec<Element>, Error> {
        let src = std::fs::read_to_string(path)
            .map_err(|error| ErrorContext::path(path).error(ErrorDetail::ReadDocument(error)))?;
        info!(path = %path.display(), "Loading tool data table config");
        self.load_from_str(&src, Some(path), origin)
    }

    /// Load tables from an XML document rooted at `<tables>` or a single `<table>`.
    pub fn load_from_str(
        &mut self,
        src: &str,
        config_path: Option<&Path>,
        origin: LoadOrigin,
    ) -> Result<Vec<Element>, Error> {
        let context = match config_path {
            Some(path) => ErrorContext::path(path),
            None => ErrorContext::default(),
        };
        let root = Element::parse(src).map_err(|error| context.error(ErrorDetail::ParseXml(error)))?;
        let elements = table_elements(root).map_err(|detail| context.error(detail))?;
        for element in &elements {
            let params = self.parameters(element.clone(), config_path, origin);
            let table = Table::load(params, self.index.clone())?;
            self.add_table(table)?;
        }
        Ok(elements)
    }

    /// Register a table, merging it into an existing one of the same name.
    pub fn add_table(&mut self, table: Table) -> Result<(), Error> {
        match self.tables.get_mut(table.name()) {
            Some(existing) => {
                debug!(table = %table.name(), "Merging tool data table into existing table");
                existing.merge(table, false)?;
            }
            None => {
                debug!(table = %table.name(), version = table.version(), "Loaded tool data table");
                self.tables.insert(table.name().to_owned(), table);
            }
        }
        Ok(())
    }

    /// Load definitions shipped with an installed repository, optionally
    /// recording them in the managed definitions file.
    pub fn add_entries_from_config(
        &mut self,
        path: &Path,
        definitions_path: Option<&Path>,
        persist: bool,
    ) -> Result<ConfigImport, Error> {
        let definitions_path = match (persist, definitions_path) {
            (true, None) => {
                return Err(ErrorContext::path(path).error(ErrorDetail::NoDefinitionsFile));
            }
            (true, Some(definitions_path)) => Some(definitions_path),
            (false, _) => None,
        };
        let (elements, error) = match self.load_from_config(path, LoadOrigin::Shed) {
            Ok(elements) => (elements, None),
            Err(err) => {
                let message = format!("Error attempting to parse file {}: {err}", path.display());
                error!(%err, path = %path.display(), "Failed to import tool data table config");
                (Vec::new(), Some(message))
            }
        };
        if let Some(definitions_path) = definitions_path {
            self.to_disk(definitions_path, &elements, &[])?;
        }
        Ok(ConfigImport { elements, error })
    }

    /// Write definition changes to the managed definitions file.
    pub fn to_disk(&self, path: &Path, new: &[Element], removed: &[Element]) -> Result<(), Error> {
        let created = persist::write_definitions(path, new, removed)
            .map_err(|detail| ErrorContext::path(path).error(detail))?;
        if created {
            self.index.refresh();
        }
        Ok(())
    }

    /// Reload the selected tables, returning the names that were rebuilt.
    pub fn reload(&mut self, selector: &ReloadSelector) -> Result<Vec<String>, Error> {
        let names = match selector {
            ReloadSelector::All => self.names().map(str::to_owned).collect(),
            ReloadSelector::Names(names) => names.clone(),
            ReloadSelector::Path(path) => self.table_names_by_path(path),
        };
        let mut reloaded = Vec::with_capacity(names.len());
        for name in names {
            let Some(table) = self.tables.get_mut(&name) else {
                warn!(table = %name, "Cannot reload unknown tool data table");
                continue;
            };
            let version = table.reload_from_files()?;
            debug!(table = %name, version, "Reloaded tool data table");
            reloaded.push(name);
        }
        Ok(reloaded)
    }

    pub fn table_names_by_path(&self, path: &str) -> Vec<String> {
        self.tables
            .values()
            .filter(|table| table.has_file(path))
            .map(|table| table.name().to_owned())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Like [`get_mut`](Self::get_mut) but fails with [`ErrorDetail::TableNotFound`].
    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table, Error> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| ErrorContext::default().error(ErrorDetail::TableNotFound(name.to_owned())))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Replace any table of the same name without merging.
    pub fn insert(&mut self, table: Table) -> Option<Table> {
        self.tables.insert(table.name().to_owned(), table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            data_root: self.data_root.clone(),
            other_config: self.other_config.clone(),
            tables: self
                .tables
                .iter()
                .map(|(name, table)| (name.clone(), TableSnapshot::from(table)))
                .collect(),
        }
    }

    pub fn restore(snapshot: RegistrySnapshot) -> Self {
        let mut registry = Self::new(snapshot.data_root).with_other_config(snapshot.other_config);
        let index = registry.index.clone();
        registry.tables = snapshot
            .tables
            .into_iter()
            .map(|(name, table)| (name, table.into_table(index.clone())))
            .collect();
        registry
    }

    pub fn to_json(&self, path: &Path) -> Result<(), Error> {
        let context = ErrorContext::path(path);
        let encoded = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|error| context.error(ErrorDetail::EncodeSnapshot(error)))?;
        std::fs::write(path, encoded).map_err(|error| context.error(ErrorDetail::WriteFile(error)))
    }

    pub fn from_json(path: &Path) -> Result<Self, Error> {
        let context = ErrorContext::path(path);
        let src = std::fs::read_to_string(path)
            .map_err(|error| context.error(ErrorDetail::ReadDocument(error)))?;
        let snapshot = serde_json::from_str(&src)
            .map_err(|error| context.error(ErrorDetail::DecodeSnapshot(error)))?;
        Ok(Self::restore(snapshot))
    }
}
