//! Portable registry state
//!
//! A snapshot carries enough to answer queries without touching the original
//! files, plus the load parameters so a restored table can still be reloaded.

use std::{path::PathBuf, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    definition::{FieldSpec, RefgenieSpec, TableKind, TableSchema},
    location::LocationIndex,
    table::{LoadParameters, MergeRecord, Table, TableContent, TableState},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub data_root: PathBuf,
    #[serde(default)]
    pub other_config: IndexMap<String, String>,
    pub tables: IndexMap<String, TableSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableSnapshot {
    Tabular {
        schema: TableSchema,
        content: TableContent,
        load: LoadParameters,
        #[serde(default)]
        merges: Vec<MergeRecord>,
    },
    Refgenie {
        asset: String,
        fields: Vec<FieldSpec>,
        schema: TableSchema,
        content: TableContent,
        load: LoadParameters,
        #[serde(default)]
        merges: Vec<MergeRecord>,
    },
}

impl TableSnapshot {
    pub fn name(&self) -> &str {
        match self {
            TableSnapshot::Tabular { schema, .. } | TableSnapshot::Refgenie { schema, .. } => {
                &schema.name
            }
        }
    }

    pub fn into_table(self, index: Arc<LocationIndex>) -> Table {
        let (kind, schema, content, load, merges) = match self {
            TableSnapshot::Tabular {
                schema,
                content,
                load,
                merges,
            } => (TableKind::Tabular, schema, content, load, merges),
            TableSnapshot::Refgenie {
                asset,
                fields,
                schema,
                content,
                load,
                merges,
            } => (
                TableKind::Refgenie(RefgenieSpec { asset, fields }),
                schema,
                content,
                load,
                merges,
            ),
        };
        Table::from_parts(
            TableState {
                kind,
                schema,
                content,
            },
            load,
            merges,
            index,
        )
    }
}

impl From<&Table> for TableSnapshot {
    fn from(table: &Table) -> Self {
        let state = table.state();
        let schema = state.schema.clone();
        let content = state.content.clone();
        let load = table.load_parameters().clone();
        let merges = table.merges().to_vec();
        match &state.kind {
            TableKind::Tabular => TableSnapshot::Tabular {
                schema,
                content,
                load,
                merges,
            },
            TableKind::Refgenie(spec) => TableSnapshot::Refgenie {
                asset: spec.asset.clone(),
                fields: spec.fields.clone(),
                schema,
                content,
                load,
                merges,
            },
        }
    }
}
