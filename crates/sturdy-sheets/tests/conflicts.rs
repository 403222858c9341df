//! Unsaved and same-name conflicts during acquisition.

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use sturdy_sheets::memory::MemoryHost;
use sturdy_sheets::{
    AcquireOptions, Automation, CellValue, CloseMode, Error, ExcelSelector, IfObstructed,
    IfUnsaved, Keeper, SheetRef,
};

struct Fixture {
    dir: tempfile::TempDir,
    keeper: Keeper<MemoryHost>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            keeper: Keeper::new(MemoryHost::new()),
        }
    }

    /// Write `sub/name` with A1 = `a1`.
    fn workbook(&self, sub: &str, name: &str, a1: f64) -> PathBuf {
        let dir = self.dir.path().join(sub);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        MemoryHost::write_workbook_file(&path, &[(1, 1, CellValue::from(a1))]).unwrap();
        path
    }
}

fn on_disk(path: &Path) -> CellValue {
    MemoryHost::read_workbook_file(path).unwrap().cell(1, 1)
}

#[test]
fn test_unsaved_raise() {
    let f = Fixture::new();
    let path = f.workbook("", "book.xls", 1.0);
    let book = f.keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    book.set(1, 1, 2).unwrap();

    let err = f
        .keeper
        .acquire(&path, &AcquireOptions::new().if_unsaved(IfUnsaved::Raise))
        .unwrap_err();
    assert!(matches!(err, Error::WorkbookNotSaved(ref p) if p.ends_with("book.xls")));
    assert!(!book.saved().unwrap());
}

#[test]
fn test_unsaved_accept_returns_same_handle() {
    let f = Fixture::new();
    let path = f.workbook("", "book.xls", 1.0);
    let book = f.keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    book.set(1, 1, 2).unwrap();

    let again = f
        .keeper
        .acquire(&path, &AcquireOptions::new().if_unsaved(IfUnsaved::Accept))
        .unwrap();
    assert_eq!(book, again);
    assert!(!again.saved().unwrap());
    assert_eq!(again.get(1, 1).unwrap(), CellValue::Number(2.0));
}

#[test]
fn test_unsaved_accept_remembers_instance() {
    let f = Fixture::new();
    let path = f.workbook("", "book.xls", 1.0);
    let own = f.keeper.start_excel().unwrap();
    let external = f.keeper.automation().start_external_instance();
    let id = f.keeper.automation().open_book(external, &path, false).unwrap();
    f.keeper
        .automation()
        .write_cell(id, &SheetRef::Index(0), 1, 1, CellValue::from(2.0))
        .unwrap();

    let book = f
        .keeper
        .acquire(&path, &AcquireOptions::new().if_unsaved(IfUnsaved::Accept))
        .unwrap();
    assert_eq!(book.instance(), external);
    book.close(CloseMode::Forget).unwrap();

    let reopened = f.keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    assert_eq!(reopened.instance(), external);
    assert_ne!(reopened.instance(), own.id());
}

#[test]
fn test_unsaved_forget_never_reaches_disk() {
    let f = Fixture::new();
    let path = f.workbook("", "book.xls", 1.0);
    let book = f.keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    book.set(1, 1, 2).unwrap();

    let fresh = f
        .keeper
        .acquire(&path, &AcquireOptions::new().if_unsaved(IfUnsaved::Forget))
        .unwrap();
    assert_eq!(fresh.get(1, 1).unwrap(), CellValue::Number(1.0));
    assert!(fresh.saved().unwrap());
    assert!(!book.is_alive());

    let again = f.keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    assert_eq!(again.get(1, 1).unwrap(), CellValue::Number(1.0));
    assert_eq!(on_disk(&path), CellValue::Number(1.0));
}

#[test]
fn test_unsaved_save_persists() {
    let f = Fixture::new();
    let path = f.workbook("", "book.xls", 1.0);
    let book = f.keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    book.set(1, 1, 2).unwrap();

    let fresh = f
        .keeper
        .acquire(&path, &AcquireOptions::new().if_unsaved(IfUnsaved::Save))
        .unwrap();
    assert_eq!(on_disk(&path), CellValue::Number(2.0));
    assert_eq!(fresh.instance(), book.instance());
    assert!(fresh.saved().unwrap());
}

#[test]
fn test_unsaved_new_excel_leaves_original() {
    let f = Fixture::new();
    let path = f.workbook("", "book.xls", 1.0);
    let book = f.keeper.acquire(&path, &AcquireOptions::new()).unwrap();
    book.set(1, 1, 2).unwrap();

    let copy = f
        .keeper
        .acquire(&path, &AcquireOptions::new().if_unsaved(IfUnsaved::NewExcel))
        .unwrap();
    assert_ne!(copy.instance(), book.instance());
    assert_eq!(copy.get(1, 1).unwrap(), CellValue::Number(1.0));
    assert!(!book.saved().unwrap());
    assert_eq!(f.keeper.automation().started_instances(), 2);
}

/// `a/file.xls` open, request `b/file.xls`, and the other way round.
#[test]
fn test_name_collision_is_symmetric() {
    for (first, second) in [("a", "b"), ("b", "a")] {
        let f = Fixture::new();
        let open = f.workbook(first, "file.xls", 1.0);
        let requested = f.workbook(second, "file.xls", 2.0);
        f.keeper.acquire(&open, &AcquireOptions::new()).unwrap();

        let err = f
            .keeper
            .acquire(
                &requested,
                &AcquireOptions::new().if_obstructed(IfObstructed::Raise),
            )
            .unwrap_err();
        match err {
            Error::WorkbookBlocked { requested: r, blocking } => {
                assert!(r.ends_with(Path::new(second).join("file.xls")));
                assert!(blocking.ends_with(Path::new(first).join("file.xls")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

/// Under the default selector a same-named workbook in another instance
/// obstructs too, even when a newer instance has become current.
#[test]
fn test_name_collision_across_instances_with_default_selector() {
    let f = Fixture::new();
    let open = f.workbook("a", "file.xls", 1.0);
    let requested = f.workbook("b", "file.xls", 2.0);
    let unrelated = f.workbook("", "other.xls", 3.0);
    let blocker = f.keeper.acquire(&open, &AcquireOptions::new()).unwrap();
    let newer = f
        .keeper
        .acquire(&unrelated, &AcquireOptions::new().force_excel(ExcelSelector::New))
        .unwrap();
    assert_ne!(newer.instance(), blocker.instance());
    assert_eq!(f.keeper.current_excel().unwrap().id(), newer.instance());

    let err = f
        .keeper
        .acquire(&requested, &AcquireOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::WorkbookBlocked { blocking, .. } if blocking.ends_with("a/file.xls")));
    assert!(blocker.is_alive());

    let book = f
        .keeper
        .acquire(
            &requested,
            &AcquireOptions::new().if_obstructed(IfObstructed::Forget),
        )
        .unwrap();
    assert!(!blocker.is_alive());
    assert_eq!(book.instance(), newer.instance());
    assert_eq!(book.get(1, 1).unwrap(), CellValue::Number(2.0));
}

#[test]
fn test_collision_is_case_insensitive() {
    let f = Fixture::new();
    let open = f.workbook("a", "File.xls", 1.0);
    let requested = f.workbook("b", "file.XLS", 2.0);
    f.keeper.acquire(&open, &AcquireOptions::new()).unwrap();

    assert!(matches!(
        f.keeper.acquire(&requested, &AcquireOptions::new()),
        Err(Error::WorkbookBlocked { .. })
    ));
}

#[test]
fn test_obstructed_forget_closes_blocker() {
    let f = Fixture::new();
    let open = f.workbook("a", "file.xls", 1.0);
    let requested = f.workbook("b", "file.xls", 2.0);
    let blocker = f.keeper.acquire(&open, &AcquireOptions::new()).unwrap();
    blocker.set(1, 1, 9).unwrap();

    let book = f
        .keeper
        .acquire(
            &requested,
            &AcquireOptions::new().if_obstructed(IfObstructed::Forget),
        )
        .unwrap();
    assert!(!blocker.is_alive());
    assert_eq!(book.instance(), blocker.instance());
    assert_eq!(book.get(1, 1).unwrap(), CellValue::Number(2.0));
    assert_eq!(on_disk(&open), CellValue::Number(1.0));
}

#[test]
fn test_obstructed_save_persists_blocker() {
    let f = Fixture::new();
    let open = f.workbook("a", "file.xls", 1.0);
    let requested = f.workbook("b", "file.xls", 2.0);
    let blocker = f.keeper.acquire(&open, &AcquireOptions::new()).unwrap();
    blocker.set(1, 1, 9).unwrap();

    f.keeper
        .acquire(
            &requested,
            &AcquireOptions::new().if_obstructed(IfObstructed::Save),
        )
        .unwrap();
    assert_eq!(on_disk(&open), CellValue::Number(9.0));
}

#[test]
fn test_obstructed_close_if_saved() {
    let f = Fixture::new();
    let open = f.workbook("a", "file.xls", 1.0);
    let requested = f.workbook("b", "file.xls", 2.0);
    let blocker = f.keeper.acquire(&open, &AcquireOptions::new()).unwrap();
    let options = AcquireOptions::new().if_obstructed(IfObstructed::CloseIfSaved);

    blocker.set(1, 1, 9).unwrap();
    assert!(matches!(
        f.keeper.acquire(&requested, &options),
        Err(Error::WorkbookBlocked { .. })
    ));
    assert!(blocker.is_alive());

    blocker.save().unwrap();
    let book = f.keeper.acquire(&requested, &options).unwrap();
    assert!(!blocker.is_alive());
    assert_eq!(book.get(1, 1).unwrap(), CellValue::Number(2.0));
}

#[test]
fn test_obstructed_new_excel() {
    let f = Fixture::new();
    let open = f.workbook("a", "file.xls", 1.0);
    let requested = f.workbook("b", "file.xls", 2.0);
    let blocker = f.keeper.acquire(&open, &AcquireOptions::new()).unwrap();

    let book = f
        .keeper
        .acquire(
            &requested,
            &AcquireOptions::new().if_obstructed(IfObstructed::NewExcel),
        )
        .unwrap();
    assert!(blocker.is_alive());
    assert_ne!(book.instance(), blocker.instance());
}

#[test]
fn test_no_collision_across_instances() {
    let f = Fixture::new();
    let open = f.workbook("a", "file.xls", 1.0);
    let requested = f.workbook("b", "file.xls", 2.0);
    let blocker = f.keeper.acquire(&open, &AcquireOptions::new()).unwrap();

    let book = f
        .keeper
        .acquire(
            &requested,
            &AcquireOptions::new().force_excel(ExcelSelector::New),
        )
        .unwrap();
    assert!(blocker.is_alive());
    assert_ne!(book.instance(), blocker.instance());

    let found = f.keeper.find_blocking_book(&requested).unwrap().unwrap();
    assert_eq!(found, blocker);
}
