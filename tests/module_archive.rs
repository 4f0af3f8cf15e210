mod common;

use std::sync::Arc;

use shop_bot::application::errors::ModuleError;
use shop_bot::application::messaging::Dispatcher;
use shop_bot::domain::entities::{ModuleManifest, ModuleStatus};

use common::*;

#[test]
fn test_import_installs_disabled_module() {
    let tmp = tempfile::tempdir().unwrap();
    let modules = tmp.path().join("modules");
    let archive = tmp.path().join("alpha.zip");
    build_zip(
        &archive,
        &[
            ("alpha/module.yaml", ALPHA_MANIFEST),
            ("alpha/templates/modules/alpha/index.html", "<p>alpha</p>"),
        ],
    );
    let db = memory_db();
    let loader = new_loader(&modules, &db);

    let id = loader.import_module_from_zip(&archive, false).unwrap();

    assert_eq!(id, "alpha");
    assert!(modules.join("alpha/templates/modules/alpha/index.html").is_file());
    let on_disk = ModuleManifest::from_dir(modules.join("alpha")).unwrap();
    assert_eq!(on_disk, ModuleManifest::from_yaml(ALPHA_MANIFEST).unwrap());
    assert_eq!(loader.get_module_status("alpha").unwrap(), ModuleStatus::Disabled);
    assert!(loader.discover_modules().contains_key("alpha"));
    assert!(!loader.is_loaded("alpha"));
}

#[test]
fn test_import_with_auto_enable() {
    let tmp = tempfile::tempdir().unwrap();
    let modules = tmp.path().join("modules");
    let archive = tmp.path().join("alpha.zip");
    build_zip(&archive, &[("alpha/module.yaml", ALPHA_MANIFEST)]);
    let db = memory_db();
    let loader = new_loader(&modules, &db);
    let dispatcher = Arc::new(Dispatcher::new("root", "/"));
    loader.set_dispatcher(Arc::clone(&dispatcher));

    loader.import_module_from_zip(&archive, true).unwrap();

    assert_eq!(loader.get_module_status("alpha").unwrap(), ModuleStatus::Enabled);
    assert!(db.table_exists("alpha_items").unwrap());
    assert_eq!(dispatcher.sub_groups().len(), 1);
}

#[test]
fn test_import_after_discovery_sees_new_module() {
    let tmp = tempfile::tempdir().unwrap();
    let modules = tmp.path().join("modules");
    write_module(&modules, "gamma", &data_manifest("gamma", ""), &[]);
    let archive = tmp.path().join("delta.zip");
    build_zip(&archive, &[("delta/module.yaml", data_manifest("delta", "").as_str())]);
    let db = memory_db();
    let loader = new_loader(&modules, &db);
    assert_eq!(loader.discover_modules().len(), 1);

    loader.import_module_from_zip(&archive, false).unwrap();

    let ids: Vec<String> = loader.discover_modules().into_keys().collect();
    assert_eq!(ids, vec!["delta".to_string(), "gamma".to_string()]);
}

#[test]
fn test_import_refuses_existing_module() {
    let tmp = tempfile::tempdir().unwrap();
    let modules = tmp.path().join("modules");
    write_module(&modules, "gamma", &data_manifest("gamma", ""), &[("keep.txt", "original")]);
    let archive = tmp.path().join("gamma.zip");
    build_zip(
        &archive,
        &[
            ("gamma/module.yaml", data_manifest("gamma", "").as_str()),
            ("gamma/keep.txt", "replaced"),
        ],
    );
    let db = memory_db();
    let loader = new_loader(&modules, &db);

    let err = loader.import_module_from_zip(&archive, false).unwrap_err();

    assert!(matches!(err, ModuleError::Archive(_)));
    assert_eq!(err.to_string(), "Archive error: Module already exists: gamma");
    assert_eq!(std::fs::read_to_string(modules.join("gamma/keep.txt")).unwrap(), "original");
}

#[test]
fn test_import_rejects_invalid_manifest_without_writing() {
    let tmp = tempfile::tempdir().unwrap();
    let modules = tmp.path().join("modules");
    let archive = tmp.path().join("bad.zip");
    build_zip(
        &archive,
        &[
            ("bad/module.yaml", data_manifest("other", "").as_str()),
            ("bad/schema.sql", "CREATE TABLE bad_x (id INTEGER);"),
        ],
    );
    let db = memory_db();
    let loader = new_loader(&modules, &db);

    let err = loader.import_module_from_zip(&archive, false).unwrap_err();

    assert!(err.to_string().contains("Module id mismatch: other vs folder bad"));
    assert!(!modules.join("bad").exists());
    assert_eq!(loader.get_module_status("bad").unwrap(), ModuleStatus::Missing);
}

#[test]
fn test_import_rejects_archive_with_two_roots() {
    let tmp = tempfile::tempdir().unwrap();
    let modules = tmp.path().join("modules");
    let archive = tmp.path().join("two.zip");
    build_zip(
        &archive,
        &[
            ("gamma/module.yaml", data_manifest("gamma", "").as_str()),
            ("delta/module.yaml", data_manifest("delta", "").as_str()),
        ],
    );
    let db = memory_db();
    let loader = new_loader(&modules, &db);

    let err = loader.import_module_from_zip(&archive, false).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Archive error: Archive must contain exactly one module directory"
    );
    assert!(!modules.join("gamma").exists());
    assert!(!modules.join("delta").exists());
}

#[test]
fn test_import_rejects_non_zip_upload() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = tmp.path().join("junk.zip");
    std::fs::write(&archive, b"definitely not a zip").unwrap();
    let db = memory_db();
    let loader = new_loader(&tmp.path().join("modules"), &db);

    let err = loader.import_module_from_zip(&archive, false).unwrap_err();
    assert!(err.to_string().starts_with("Archive error: Not a zip archive"));
}

#[test]
fn test_imported_module_can_be_deleted() {
    let tmp = tempfile::tempdir().unwrap();
    let modules = tmp.path().join("modules");
    let archive = tmp.path().join("alpha.zip");
    build_zip(&archive, &[("alpha/module.yaml", ALPHA_MANIFEST)]);
    let db = memory_db();
    let loader = new_loader(&modules, &db);

    loader.import_module_from_zip(&archive, true).unwrap();
    loader.delete_module("alpha").unwrap();

    assert!(!modules.join("alpha").exists());
    assert!(!db.table_exists("alpha_items").unwrap());

    // Same archive installs again after deletion
    loader.import_module_from_zip(&archive, false).unwrap();
    assert_eq!(loader.get_module_status("alpha").unwrap(), ModuleStatus::Disabled);
}
