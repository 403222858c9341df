//! Acquisition against the in-memory host: instance reuse, idempotence,
//! instance selection and read-only/writable transitions.

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use sturdy_sheets::memory::MemoryHost;
use sturdy_sheets::{
    AcquireOptions, Automation, CellValue, CloseMode, Error, ExcelSelector, IfAbsent, IfUnsaved,
    Keeper, SheetRef,
};

fn workbook(dir: &Path, name: &str, a1: f64) -> PathBuf {
    let path = dir.join(name);
    MemoryHost::write_workbook_file(&path, &[(1, 1, CellValue::from(a1))]).unwrap();
    path
}

fn on_disk(path: &Path) -> CellValue {
    MemoryHost::read_workbook_file(path).unwrap().cell(1, 1)
}

/// Empty host: the first acquire starts one instance, the second reuses it.
#[test]
fn test_first_acquire_starts_one_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());

    let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    assert!(!book.read_only().unwrap());
    assert!(book.saved().unwrap());
    assert_eq!(keeper.automation().started_instances(), 1);

    let again = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    assert_eq!(book, again);
    assert_eq!(keeper.automation().started_instances(), 1);
    assert_eq!(keeper.automation().open_book_count(), 1);
}

#[test]
fn test_acquire_is_idempotent_with_options() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());
    let options = AcquireOptions::new().read_only(true).visible(true);

    let first = keeper.acquire(&path, &options).unwrap();
    let second = keeper.acquire(&path, &options).unwrap();
    assert_eq!(first, second);
    assert!(second.read_only().unwrap());
    assert!(second.visible().unwrap());
    assert_eq!(keeper.automation().started_instances(), 1);
}

#[test]
fn test_relative_and_absolute_paths_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());

    let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    let dotted = dir.path().join(".").join("workbook.xls");
    let again = keeper.acquire(&dotted, &AcquireOptions::new()).unwrap();
    assert_eq!(book, again);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let keeper = Keeper::new(MemoryHost::new());
    let missing = dir.path().join("missing.xls");

    let err = keeper
        .acquire(&missing, &AcquireOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(ref p) if p.ends_with("missing.xls")));
    assert_eq!(keeper.automation().started_instances(), 0);

    assert!(matches!(
        keeper.acquire("", &AcquireOptions::new()),
        Err(Error::FileNameNotGiven)
    ));
    assert!(matches!(
        keeper.acquire(dir.path(), &AcquireOptions::new()),
        Err(Error::FileIsDirectory(_))
    ));
}

#[test]
fn test_if_absent_create() {
    let dir = tempfile::tempdir().unwrap();
    let keeper = Keeper::new(MemoryHost::new());
    let path = dir.path().join("fresh.xls");

    let book = keeper
        .acquire(&path, &AcquireOptions::new().if_absent(IfAbsent::Create))
        .unwrap();
    assert!(path.is_file());
    assert!(book.saved().unwrap());
    assert_eq!(book.get(1, 1).unwrap(), CellValue::Null);
}

#[test]
fn test_force_new_opens_second_copy() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());

    let first = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    let second = keeper
        .acquire(
            &path,
            &AcquireOptions::new()
                .force_excel(ExcelSelector::New)
                .read_only(true),
        )
        .unwrap();
    assert_ne!(first.instance(), second.instance());
    assert_eq!(keeper.automation().started_instances(), 2);
    assert_eq!(keeper.automation().open_book_count(), 2);
}

#[test]
fn test_explicit_instance_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());
    let chosen = keeper.start_excel().unwrap();
    let _other = keeper.start_excel().unwrap();

    let book = keeper
        .acquire(
            &path,
            &AcquireOptions::new()
                .excel(chosen.id())
                .force_excel(ExcelSelector::New),
        )
        .unwrap();
    assert_eq!(book.instance(), chosen.id());
    assert_eq!(keeper.automation().started_instances(), 2);
}

#[test]
fn test_default_selector_only_when_not_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());

    let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    let again = keeper
        .acquire(
            &path,
            &AcquireOptions::new().default_excel(ExcelSelector::New),
        )
        .unwrap();
    assert_eq!(book, again);
    assert_eq!(keeper.automation().started_instances(), 1);
}

#[test]
fn test_reopens_in_last_known_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let other = workbook(dir.path(), "other.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());

    let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    let first_instance = book.instance();
    book.close(CloseMode::Raise).unwrap();

    // A newer instance becomes current.
    let newer = keeper
        .acquire(&other, &AcquireOptions::new().force_excel(ExcelSelector::New))
        .unwrap();
    assert_ne!(newer.instance(), first_instance);

    let reopened = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    assert_eq!(reopened.instance(), first_instance);
}

#[test]
fn test_adopts_externally_started_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let host = MemoryHost::new();
    let external = host.start_external_instance();
    let keeper = Keeper::new(host);

    let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    assert_eq!(book.instance(), external);
    assert_eq!(keeper.automation().started_instances(), 0);
}

/// A dirty copy in an instance the keeper never saw still counts as open.
#[test]
fn test_unsaved_book_in_external_instance_raises() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "workbook.xls", 1.0);
    let host = MemoryHost::new();
    let external = host.start_external_instance();
    let id = host.open_book(external, &path, true).unwrap();
    host.write_cell(id, &SheetRef::Index(0), 1, 1, CellValue::from(5.0))
        .unwrap();
    let keeper = Keeper::new(host);

    let err = keeper
        .acquire(
            &path,
            &AcquireOptions::new()
                .read_only(false)
                .if_unsaved(IfUnsaved::Raise),
        )
        .unwrap_err();
    assert!(matches!(err, Error::WorkbookNotSaved(p) if p.ends_with("workbook.xls")));
    assert!(keeper.automation().is_book_alive(id));
    assert!(!keeper.automation().is_saved(id).unwrap());
    assert_eq!(keeper.automation().started_instances(), 0);

    let found = keeper.find_open_book(&path).unwrap().unwrap();
    assert_eq!(found.instance(), external);
}

#[test]
fn test_read_only_to_writable_saves_pending_edit() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "a.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());

    let read_only = keeper
        .acquire(&path, &AcquireOptions::new().read_only(true))
        .unwrap();
    read_only.set(1, 1, "pending").unwrap();

    let writable = keeper
        .acquire(
            &path,
            &AcquireOptions::new()
                .read_only(false)
                .if_unsaved(IfUnsaved::Save),
        )
        .unwrap();
    assert_eq!(on_disk(&path), CellValue::from("pending"));
    assert!(!writable.read_only().unwrap());
    assert!(writable.saved().unwrap());
    assert!(!read_only.is_alive());
}

#[test]
fn test_saved_read_only_book_reopened_writable() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "a.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());

    let read_only = keeper
        .acquire(&path, &AcquireOptions::new().read_only(true))
        .unwrap();
    let writable = keeper
        .acquire(&path, &AcquireOptions::new().read_only(false))
        .unwrap();
    assert!(!writable.read_only().unwrap());
    assert_eq!(writable.instance(), read_only.instance());
    assert_eq!(keeper.automation().open_book_count(), 1);
}

#[test]
fn test_option_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "a.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());

    let options = AcquireOptions::parse([("f", "new"), ("read_only", "true")]).unwrap();
    let book = keeper.acquire(&path, &options).unwrap();
    assert!(book.read_only().unwrap());

    assert!(matches!(
        AcquireOptions::parse([("if_unsaved", "shrug")]),
        Err(Error::OptionInvalid(_))
    ));
}

#[test]
fn test_options_from_json() {
    let options: AcquireOptions = serde_json::from_str(
        r#"{"force": "new", "if_unsaved": "accept", "read_only": true}"#,
    )
    .unwrap();
    assert_eq!(
        options,
        AcquireOptions::new()
            .force_excel(ExcelSelector::New)
            .if_unsaved(IfUnsaved::Accept)
            .read_only(true)
    );
    assert!(serde_json::from_str::<AcquireOptions>(r#"{"if_unsaved": "maybe"}"#).is_err());
}

#[test]
fn test_handles_track_liveness() {
    let dir = tempfile::tempdir().unwrap();
    let path = workbook(dir.path(), "a.xls", 1.0);
    let keeper = Keeper::new(MemoryHost::new());
    let book = keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    let excel = book.excel();

    assert!(book.is_alive());
    assert!(excel.is_alive());
    keeper.automation().kill(excel.id());
    assert!(!book.is_alive());
    assert!(!excel.is_alive());
    assert!(keeper.excel_instances().is_empty());
    assert!(keeper.automation().is_alive(excel.id()).is_ok());
}
