use std::{fs, io::Write as _, path::Path};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::{ErrorDetail, xml::Element};

fn existing_root(path: &Path) -> Result<Element, ErrorDetail> {
    let src = fs::read_to_string(path).map_err(ErrorDetail::ReadDocument)?;
    match Element::parse(&src) {
        Ok(root) if root.name == "tables" => Ok(root),
        Ok(root) => Ok(Element::new("tables").with_child(root)),
        Err(error) => {
            debug!(%error, path = %path.display(), "Could not parse existing tool data table config, assume no existing elements");
            Ok(Element::new("tables"))
        }
    }
}

/// Rewrite the managed definitions file with `new` appended and every element
/// equal to one of `removed` dropped. Returns whether the file was created.
pub fn write_definitions(
    path: &Path,
    new: &[Element],
    removed: &[Element],
) -> Result<bool, ErrorDetail> {
    if new.is_empty() && removed.is_empty() {
        return Ok(false);
    }
    let created = !path.exists();
    let mut root = if created {
        Element::new("tables")
    } else {
        existing_root(path)?
    };
    root.children.retain(|child| !removed.contains(child));
    root.children.extend(new.iter().cloned());

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(ErrorDetail::WriteFile)?;
    file.write_all(root.to_document().as_bytes())
        .map_err(ErrorDetail::WriteFile)?;
    file.flush().map_err(ErrorDetail::WriteFile)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(ErrorDetail::WriteFile)?;
    }
    file.persist(path)
        .map_err(|error| ErrorDetail::WriteFile(error.error))?;
    debug!(path = %path.display(), created, "Wrote tool data table definitions");
    Ok(created)
}
