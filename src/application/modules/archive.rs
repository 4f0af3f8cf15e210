//! Packaged module import from zip archives

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use zip::ZipArchive;

use crate::application::errors::{ModuleError, ModuleResult};
use crate::domain::entities::{is_valid_module_id, ModuleManifest, MANIFEST_FILE};

struct Entry {
    index: usize,
    path: PathBuf,
    is_dir: bool,
}

fn zip_error(e: zip::result::ZipError) -> ModuleError {
    ModuleError::Archive(e.to_string())
}

/// Extract an archive holding exactly one `<module_id>/` directory into
/// `modules_dir`. The manifest is checked before anything is written, and a
/// failed extraction removes the partial directory. Returns the module id.
pub fn extract_module(archive_path: &Path, modules_dir: &Path) -> ModuleResult<String> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| ModuleError::Archive(format!("Not a zip archive: {}", e)))?;
    if archive.len() == 0 {
        return Err(ModuleError::Archive("Archive is empty".to_string()));
    }

    let mut roots = BTreeSet::new();
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(zip_error)?;
        let Some(path) = entry.enclosed_name() else {
            return Err(ModuleError::Archive(format!("Unsafe path in archive: {}", entry.name())));
        };
        let Some(Component::Normal(first)) = path.components().next() else {
            continue;
        };
        let root = first.to_string_lossy().to_string();
        // Finder metadata
        if root == "__MACOSX" {
            continue;
        }
        // A file at the top level counts as its own root
        roots.insert(root);
        entries.push(Entry {
            index,
            is_dir: entry.is_dir(),
            path,
        });
    }

    let module_id = match (roots.len(), roots.into_iter().next()) {
        (1, Some(root)) => root,
        _ => {
            return Err(ModuleError::Archive(
                "Archive must contain exactly one module directory".to_string(),
            ))
        }
    };
    if !is_valid_module_id(&module_id) {
        return Err(ModuleError::Archive(format!("Module id invalid: '{}'", module_id)));
    }

    let manifest_path = Path::new(&module_id).join(MANIFEST_FILE);
    let manifest_index = entries
        .iter()
        .find(|e| !e.is_dir && e.path == manifest_path)
        .map(|e| e.index)
        .ok_or_else(|| ModuleError::Archive(format!("Manifest not found: {}/{}", module_id, MANIFEST_FILE)))?;

    let mut text = String::new();
    archive
        .by_index(manifest_index)
        .map_err(zip_error)?
        .read_to_string(&mut text)?;
    ModuleManifest::from_yaml(&text)
        .and_then(|m| m.validate(&module_id))
        .map_err(|e| ModuleError::Archive(e.to_string()))?;

    let target = modules_dir.join(&module_id);
    if target.exists() {
        return Err(ModuleError::Archive(format!("Module already exists: {}", module_id)));
    }
    fs::create_dir_all(modules_dir)?;

    if let Err(e) = write_entries(&mut archive, &entries, modules_dir) {
        if let Err(cleanup) = fs::remove_dir_all(&target) {
            tracing::warn!("Failed to remove partial module {}: {}", target.display(), cleanup);
        }
        return Err(e);
    }

    tracing::info!("Extracted module {} into {}", module_id, modules_dir.display());
    Ok(module_id)
}

fn write_entries(archive: &mut ZipArchive<File>, entries: &[Entry], root: &Path) -> ModuleResult<()> {
    for entry in entries {
        let out = root.join(&entry.path);
        if entry.is_dir {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut source = archive.by_index(entry.index).map_err(zip_error)?;
        let mut file = File::create(&out)?;
        std::io::copy(&mut source, &mut file)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, files: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, body) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    const MANIFEST: &str = "id: gamma\nname: Gamma\nversion: '0.1'\n";

    #[test]
    fn test_extracts_single_module() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("gamma.zip");
        build_zip(&zip_path, &[("gamma/module.yaml", MANIFEST), ("gamma/schema.sql", "SELECT 1;")]);

        let modules = tmp.path().join("modules");
        assert_eq!(extract_module(&zip_path, &modules).unwrap(), "gamma");
        assert!(modules.join("gamma/module.yaml").is_file());
        assert!(modules.join("gamma/schema.sql").is_file());
    }

    #[test]
    fn test_rejects_non_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("not.zip");
        fs::write(&path, "plain text").unwrap();

        let err = extract_module(&path, tmp.path()).unwrap_err();
        assert!(err.to_string().contains("Not a zip archive"));
    }

    #[test]
    fn test_rejects_two_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("two.zip");
        build_zip(&zip_path, &[("gamma/module.yaml", MANIFEST), ("delta/module.yaml", MANIFEST)]);

        assert!(extract_module(&zip_path, &tmp.path().join("modules")).is_err());
    }

    #[test]
    fn test_rejects_missing_manifest_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("gamma.zip");
        build_zip(&zip_path, &[("gamma/readme.txt", "hi")]);

        let modules = tmp.path().join("modules");
        let err = extract_module(&zip_path, &modules).unwrap_err();
        assert!(err.to_string().contains("Manifest not found"));
        assert!(!modules.join("gamma").exists());
    }

    #[test]
    fn test_rejects_existing_target() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("gamma.zip");
        build_zip(&zip_path, &[("gamma/module.yaml", MANIFEST)]);

        let modules = tmp.path().join("modules");
        fs::create_dir_all(modules.join("gamma")).unwrap();
        let err = extract_module(&zip_path, &modules).unwrap_err();
        assert_eq!(err.to_string(), "Archive error: Module already exists: gamma");
    }
}
