use std::path::Path;

use tempfile::TempDir;

use crate::{
    ReloadSelector, RepositoryInfo, TableKind, TableRegistry, config::Settings, table::LoadOrigin,
    xml::Element,
};

fn copy_dir(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}

fn scenario() -> (TempDir, Settings) {
    let dir = tempfile::tempdir().unwrap();
    copy_dir(Path::new("src/tests/scenario"), dir.path());
    let root = dir.path().display();
    let settings = Settings::from_yaml(&format!(
        "data_root: {root}/tool-data\n\
         table_configs:\n  - {root}/tool_data_table_conf.xml\n\
         shed_table_configs:\n  - {root}/shed_tool_data_table_conf.xml\n  - {root}/missing_shed_conf.xml\n\
         shed_definitions: {root}/shed_definitions.xml\n\
         refresh_interval_ms: 0\n"
    ))
    .unwrap();
    (dir, settings)
}

fn loc(dir: &TempDir, name: &str) -> String {
    dir.path()
        .join("tool-data")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn row(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|field| (*field).to_owned()).collect()
}

fn fetch_genome_repository() -> RepositoryInfo {
    RepositoryInfo {
        tool_shed: "toolshed.g2.bx.psu.edu".to_owned(),
        name: "data_manager_fetch_genome".to_owned(),
        owner: "devteam".to_owned(),
        installed_changeset_revision: "b1bc53e9bbc5".to_owned(),
    }
}

#[test]
fn test_load_scenario() {
    let (dir, settings) = scenario();
    let registry = settings.open_registry().unwrap();
    assert_eq!(
        registry.names().collect::<Vec<_>>(),
        ["all_fasta", "__dbkeys__", "twobit", "fasta_refgenie"]
    );

    let all_fasta = registry.get("all_fasta").unwrap();
    assert!(!all_fasta.allow_duplicate_entries());
    assert_eq!(
        all_fasta.fields(),
        [
            row(&["hg19", "hg19", "Human (hg19)", "/data/hg19/hg19.fa"]),
            row(&["mm10", "mm10", "Mouse (mm10)", "/data/mm10/mm10.fa"]),
            row(&["hg38", "hg38", "Human (hg38)", "/data/hg38/hg38.fa"]),
        ]
    );
    let shed = &all_fasta.files()[&loc(&dir, "all_fasta_shed.loc")];
    assert!(shed.from_shed_config);
    assert_eq!(shed.repository, Some(fetch_genome_repository()));
    assert_eq!(all_fasta.version(), 2);

    let dbkeys = registry.get("__dbkeys__").unwrap();
    assert_eq!(
        dbkeys.get_entry("value", "hg19", "len_path").as_deref(),
        Some("/data/len/hg19.len")
    );

    let twobit = registry.get("twobit").unwrap();
    assert!(twobit.has_file(&loc(&dir, "twobit.loc.sample")));
    assert_eq!(
        twobit.get_entries("value", "hg19", "path"),
        ["/data/hg19/hg19.2bit"]
    );

    let refgenie = registry.get("fasta_refgenie").unwrap();
    assert!(matches!(refgenie.kind(), TableKind::Refgenie(spec) if spec.asset == "fasta"));
    let genome_path = dir
        .path()
        .join("refgenie/genomes/hg38/fasta/hg38.fa")
        .to_string_lossy()
        .into_owned();
    assert_eq!(
        refgenie.named_fields(),
        [[
            ("value", "refgenie:hg38/fasta:default@a6ed8ed8b9ef"),
            ("dbkey", "hg38"),
            ("name", "Homo sapiens (GRCh38) (refgenie: hg38)"),
            ("path", genome_path.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect::<indexmap::IndexMap<_, _>>()]
    );
}

#[test]
fn test_add_entry_bumps_version() {
    let (_dir, settings) = scenario();
    let mut registry = settings.open_registry().unwrap();
    let dbkeys = registry.get_mut("__dbkeys__").unwrap();
    let version = dbkeys.version();
    let next = dbkeys
        .add_entry(
            vec!["hg38", "Human Dec. 2013 (GRCh38/hg38) (hg38)", "/data/len/hg38.len"],
            true,
            false,
            None,
        )
        .unwrap();
    assert_eq!(next, version + 1);
    assert!(dbkeys.is_current_version(next));
    assert_eq!(
        dbkeys.get_entries("value", "hg38", "len_path"),
        ["/data/len/hg38.len"]
    );
}

#[test]
fn test_persist_follows_repository_and_survives_reload() {
    let (dir, settings) = scenario();
    let mut registry = settings.open_registry().unwrap();
    let repository = fetch_genome_repository();
    let all_fasta = registry.get_mut("all_fasta").unwrap();

    let dm6 = row(&["dm6", "dm6", "Fly (dm6)", "/data/dm6/dm6.fa"]);
    all_fasta
        .add_entry(dm6.clone(), false, true, Some(&repository))
        .unwrap();
    let yeast = row(&["sacCer3", "sacCer3", "Yeast (sacCer3)", "/data/sacCer3/sacCer3.fa"]);
    all_fasta.add_entry(yeast.clone(), false, true, None).unwrap();

    let shed_file = std::fs::read_to_string(loc(&dir, "all_fasta_shed.loc")).unwrap();
    assert!(shed_file.ends_with("dm6\tdm6\tFly (dm6)\t/data/dm6/dm6.fa\n"));
    let core_file = std::fs::read_to_string(loc(&dir, "all_fasta.loc")).unwrap();
    assert!(core_file.ends_with("sacCer3\tsacCer3\tYeast (sacCer3)\t/data/sacCer3/sacCer3.fa\n"));

    let before = all_fasta.fields().to_vec();
    let version = all_fasta.version();
    assert_eq!(all_fasta.reload_from_files().unwrap(), version + 1);
    assert_eq!(all_fasta.fields().len(), before.len());
    assert!(before.iter().all(|row| all_fasta.fields().contains(row)));

    all_fasta.remove_entry(&dm6).unwrap();
    assert!(!all_fasta.fields().contains(&dm6));
    assert!(all_fasta.fields().contains(&yeast));
    let shed_file = std::fs::read_to_string(loc(&dir, "all_fasta_shed.loc")).unwrap();
    assert!(!shed_file.contains("dm6"));
}

#[test]
fn test_reload_by_path_sees_external_edits() {
    let (dir, settings) = scenario();
    let mut registry = settings.open_registry().unwrap();
    let dbkeys_loc = loc(&dir, "dbkeys.loc");
    let version = registry.get("__dbkeys__").unwrap().version();
    let mut content = std::fs::read_to_string(&dbkeys_loc).unwrap();
    content.push_str("mm10\tMouse Dec. 2011 (GRCm38/mm10) (mm10)\t/data/len/mm10.len\n");
    std::fs::write(&dbkeys_loc, content).unwrap();

    assert_eq!(
        registry.reload(&ReloadSelector::Path(dbkeys_loc)).unwrap(),
        ["__dbkeys__"]
    );
    let dbkeys = registry.get("__dbkeys__").unwrap();
    assert_eq!(dbkeys.version(), version + 1);
    assert_eq!(dbkeys.fields().len(), 2);
}

#[test]
fn test_loading_config_twice_adds_nothing() {
    let (dir, settings) = scenario();
    let mut registry = settings.open_registry().unwrap();
    let counts: Vec<_> = registry
        .tables()
        .map(|table| (table.fields().len(), table.files().len(), table.version()))
        .collect();
    registry
        .load_from_config(&dir.path().join("tool_data_table_conf.xml"), LoadOrigin::Core)
        .unwrap();
    let again: Vec<_> = registry
        .tables()
        .map(|table| (table.fields().len(), table.files().len(), table.version()))
        .collect();
    assert_eq!(counts, again);
    assert_eq!(registry.len(), 4);
}

#[test]
fn test_install_and_uninstall_definitions() {
    let (dir, settings) = scenario();
    let mut registry = settings.open_registry().unwrap();
    let definitions = settings.shed_definitions.clone().unwrap();

    let import = registry
        .add_entries_from_config(
            &dir.path().join("install/tool_data_table_conf.xml.sample"),
            Some(&definitions),
            true,
        )
        .unwrap();
    assert!(import.error.is_none());
    assert_eq!(import.elements.len(), 1);
    let bwa = registry.get("bwa_indexes").unwrap();
    assert!(bwa.fields().is_empty());
    assert_eq!(bwa.missing_index_file(), Some(loc(&dir, "bwa_index.loc").as_str()));

    let written = Element::parse(&std::fs::read_to_string(&definitions).unwrap()).unwrap();
    assert_eq!(written.children, import.elements);

    registry.to_disk(&definitions, &[], &import.elements).unwrap();
    let written = Element::parse(&std::fs::read_to_string(&definitions).unwrap()).unwrap();
    assert_eq!(written.name, "tables");
    assert!(written.children.is_empty());
}

#[test]
fn test_install_reports_unknown_table_type() {
    let (dir, settings) = scenario();
    let mut registry = settings.open_registry().unwrap();
    let definitions = settings.shed_definitions.clone().unwrap();
    let path = dir.path().join("install/unknown_type.xml");
    let import = registry
        .add_entries_from_config(&path, Some(&definitions), true)
        .unwrap();
    let message = import.error.unwrap();
    assert!(message.starts_with(&format!("Error attempting to parse file {}: ", path.display())));
    assert!(message.contains("sqlite"));
    assert!(import.elements.is_empty());
    assert!(!registry.contains("blast_dbs"));
    assert!(!definitions.exists());
}

#[test]
fn test_snapshot_restore_without_files() {
    let (dir, settings) = scenario();
    let mut registry = settings.open_registry().unwrap();
    registry
        .get_mut("__dbkeys__")
        .unwrap()
        .add_entry(vec!["hg38", "Human (hg38)", "/data/len/hg38.len"], true, false, None)
        .unwrap();
    let snapshot_path = dir.path().join("snapshot.json");
    registry.to_json(&snapshot_path).unwrap();
    std::fs::remove_dir_all(dir.path().join("tool-data")).unwrap();

    let restored = TableRegistry::from_json(&snapshot_path).unwrap();
    assert_eq!(
        restored.names().collect::<Vec<_>>(),
        registry.names().collect::<Vec<_>>()
    );
    for table in registry.tables() {
        let other = restored.get(table.name()).unwrap();
        assert_eq!(other.fields(), table.fields());
        assert_eq!(other.version(), table.version());
        assert_eq!(other.kind(), table.kind());
        assert_eq!(other.merges(), table.merges());
    }
    assert_eq!(
        restored
            .get("__dbkeys__")
            .unwrap()
            .get_entry("value", "hg38", "len_path")
            .as_deref(),
        Some("/data/len/hg38.len")
    );
}
