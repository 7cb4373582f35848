//! Named view of a single table row and the files it points at.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableField {
    data: IndexMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct FieldDescription {
    pub name: Option<String>,
    pub fields: IndexMap<String, String>,
    pub base_dir: Option<PathBuf>,
    pub files: IndexMap<String, u64>,
    pub fingerprint: String,
}

impl TableField {
    pub fn new(data: IndexMap<String, String>) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn data(&self) -> &IndexMap<String, String> {
        &self.data
    }

    /// Absolute form of the `path` column.
    pub fn base_path(&self) -> Option<PathBuf> {
        let path = Path::new(self.get("path")?);
        Some(std::path::absolute(path).unwrap_or_else(|_| path.to_owned()))
    }

    /// The `path` column itself when it is a directory, its parent otherwise.
    pub fn base_dir(&self) -> Option<PathBuf> {
        let path = self.base_path()?;
        if path.is_dir() {
            Some(path)
        } else {
            path.parent().map(Path::to_owned)
        }
    }

    pub fn clean_base_dir(&self, path: &str) -> String {
        let Some(base_dir) = self.base_dir() else {
            return path.to_owned();
        };
        let base_dir = base_dir.to_string_lossy();
        match path.strip_prefix(base_dir.as_ref()) {
            Some(rest) => rest.trim_start_matches('/').to_owned(),
            None => path.to_owned(),
        }
    }

    /// Every file whose path starts with the base path (index files share a prefix).
    pub fn files(&self) -> Vec<PathBuf> {
        let Some(base_path) = self.base_path() else {
            return Vec::new();
        };
        let pattern = format!("{}*", glob::Pattern::escape(&base_path.to_string_lossy()));
        match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(Result::ok).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn filesize_map(&self, rm_base_dir: bool) -> IndexMap<String, u64> {
        self.files()
            .into_iter()
            .filter_map(|path| {
                let size = std::fs::metadata(&path).ok()?.len();
                let path = path.to_string_lossy().into_owned();
                let key = if rm_base_dir {
                    self.clean_base_dir(&path)
                } else {
                    path
                };
                Some((key, size))
            })
            .collect()
    }

    /// Digest over the relative file names and sizes.
    pub fn fingerprint(&self) -> String {
        let mut files = self.filesize_map(true);
        files.sort_keys();
        let mut hasher = blake3::Hasher::new();
        for (name, size) in &files {
            hasher.update(name.as_bytes());
            hasher.update(size.to_string().as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn describe(&self) -> FieldDescription {
        FieldDescription {
            name: self.get("value").map(str::to_owned),
            fields: self.data.clone(),
            base_dir: self.base_dir(),
            files: self.filesize_map(true),
            fingerprint: self.fingerprint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indexmap::indexmap;

    use super::TableField;

    #[test]
    fn test_files_and_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hg19.fa"), ">chr1\nACGT\n").unwrap();
        std::fs::write(dir.path().join("hg19.fa.fai"), "chr1\t4\n").unwrap();
        std::fs::write(dir.path().join("mm10.fa"), ">chr1\n").unwrap();
        let path = dir.path().join("hg19.fa").to_string_lossy().into_owned();
        let field = TableField::new(indexmap! {
            "value".to_owned() => "hg19".to_owned(),
            "path".to_owned() => path,
        });

        assert_eq!(field.base_dir().as_deref(), Some(dir.path()));
        let sizes = field.filesize_map(true);
        assert_eq!(sizes.get("hg19.fa"), Some(&11));
        assert_eq!(sizes.get("hg19.fa.fai"), Some(&7));
        assert_eq!(sizes.len(), 2);

        let before = field.fingerprint();
        assert_eq!(before, field.fingerprint());
        std::fs::write(dir.path().join("hg19.fa.gzi"), "x").unwrap();
        assert_ne!(before, field.fingerprint());
    }
}
