//! Conflict resolution: carry out what a policy token says about a
//! conflicting workbook.
//!
//! Each function either fails with an error naming the files involved, or
//! performs its side effect (discard and close, save and close) and tells the
//! caller how to continue. Nothing is retried.

use std::path::Path;

use crate::automation::{Automation, BookInfo};
use crate::error::{Error, Result};
use crate::options::{CloseMode, IfObstructed, IfUnsaved};

/// How acquisition continues after a conflict was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The conflicting workbook is out of the way; open as planned.
    Proceed,
    /// Hand back the conflicting workbook itself.
    ReturnExisting,
    /// Leave the conflict alone and open in a fresh instance.
    UseNewInstance,
}

/// Handle a request for `book`, which is open with unsaved changes.
pub fn resolve_unsaved<A: Automation + ?Sized>(
    automation: &A,
    policy: IfUnsaved,
    book: &BookInfo,
) -> Result<Resolution> {
    tracing::debug!(path = %book.path.display(), %policy, "workbook has unsaved changes");
    match policy {
        IfUnsaved::Raise => Err(Error::WorkbookNotSaved(book.path.clone())),
        IfUnsaved::Accept => Ok(Resolution::ReturnExisting),
        IfUnsaved::Forget => {
            automation.close_book(book.id)?;
            Ok(Resolution::Proceed)
        }
        IfUnsaved::Save => {
            automation.save(book.id)?;
            automation.close_book(book.id)?;
            Ok(Resolution::Proceed)
        }
        IfUnsaved::NewExcel => Ok(Resolution::UseNewInstance),
    }
}

/// Handle `blocker`, a different workbook with the same file name as
/// `requested`.
pub fn resolve_obstruction<A: Automation + ?Sized>(
    automation: &A,
    policy: IfObstructed,
    blocker: &BookInfo,
    requested: &Path,
) -> Result<Resolution> {
    tracing::debug!(
        requested = %requested.display(),
        blocking = %blocker.path.display(),
        %policy,
        "workbook blocked by a same-named workbook"
    );
    let blocked = || Error::WorkbookBlocked {
        requested: requested.to_path_buf(),
        blocking: blocker.path.clone(),
    };
    match policy {
        IfObstructed::Raise => Err(blocked()),
        IfObstructed::Forget => {
            automation.close_book(blocker.id)?;
            Ok(Resolution::Proceed)
        }
        IfObstructed::Save => {
            automation.save(blocker.id)?;
            automation.close_book(blocker.id)?;
            Ok(Resolution::Proceed)
        }
        IfObstructed::CloseIfSaved => {
            if automation.is_saved(blocker.id)? {
                automation.close_book(blocker.id)?;
                Ok(Resolution::Proceed)
            } else {
                Err(blocked())
            }
        }
        IfObstructed::NewExcel => Ok(Resolution::UseNewInstance),
    }
}

/// Close `book` according to `mode`. Returns whether it was closed.
pub fn release<A: Automation + ?Sized>(
    automation: &A,
    mode: CloseMode,
    book: &BookInfo,
) -> Result<bool> {
    if automation.is_saved(book.id)? {
        automation.close_book(book.id)?;
        return Ok(true);
    }
    match mode {
        CloseMode::Raise => Err(Error::WorkbookNotSaved(book.path.clone())),
        CloseMode::Forget => {
            automation.close_book(book.id)?;
            Ok(true)
        }
        CloseMode::Save => {
            automation.save(book.id)?;
            automation.close_book(book.id)?;
            Ok(true)
        }
        CloseMode::KeepOpen => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use crate::{CellValue, SheetRef};

    struct Fixture {
        _dir: tempfile::TempDir,
        host: MemoryHost,
        book: BookInfo,
    }

    fn dirty_book() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirty.xls");
        MemoryHost::write_workbook_file(&path, &[(1, 1, CellValue::from(1.0))]).unwrap();
        let host = MemoryHost::new();
        let app = host.start_instance(false, false).unwrap();
        let id = host.open_book(app, &path, false).unwrap();
        host.write_cell(id, &SheetRef::Index(0), 1, 1, CellValue::from(2.0))
            .unwrap();
        let book = host.book_info(id).unwrap();
        Fixture {
            _dir: dir,
            host,
            book,
        }
    }

    fn on_disk(fixture: &Fixture) -> CellValue {
        MemoryHost::read_workbook_file(&fixture.book.path)
            .unwrap()
            .cell(1, 1)
    }

    #[test]
    fn test_unsaved_raise_names_the_file() {
        let f = dirty_book();
        let err = resolve_unsaved(&f.host, IfUnsaved::Raise, &f.book).unwrap_err();
        assert!(err.to_string().contains("dirty.xls"));
        assert!(f.host.is_book_alive(f.book.id));
    }

    #[test]
    fn test_unsaved_forget_discards() {
        let f = dirty_book();
        let r = resolve_unsaved(&f.host, IfUnsaved::Forget, &f.book).unwrap();
        assert_eq!(r, Resolution::Proceed);
        assert!(!f.host.is_book_alive(f.book.id));
        assert_eq!(on_disk(&f), CellValue::Number(1.0));
    }

    #[test]
    fn test_unsaved_save_flushes() {
        let f = dirty_book();
        let r = resolve_unsaved(&f.host, IfUnsaved::Save, &f.book).unwrap();
        assert_eq!(r, Resolution::Proceed);
        assert_eq!(on_disk(&f), CellValue::Number(2.0));
    }

    #[test]
    fn test_unsaved_deferred_tokens_touch_nothing() {
        let f = dirty_book();
        assert_eq!(
            resolve_unsaved(&f.host, IfUnsaved::Accept, &f.book).unwrap(),
            Resolution::ReturnExisting
        );
        assert_eq!(
            resolve_unsaved(&f.host, IfUnsaved::NewExcel, &f.book).unwrap(),
            Resolution::UseNewInstance
        );
        assert!(!f.host.is_saved(f.book.id).unwrap());
    }

    #[test]
    fn test_close_if_saved_refuses_dirty_blocker() {
        let f = dirty_book();
        let requested = Path::new("/elsewhere/dirty.xls");
        let err = resolve_obstruction(&f.host, IfObstructed::CloseIfSaved, &f.book, requested)
            .unwrap_err();
        match err {
            Error::WorkbookBlocked { requested, blocking } => {
                assert_eq!(requested, Path::new("/elsewhere/dirty.xls"));
                assert_eq!(blocking, f.book.path);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.host.is_book_alive(f.book.id));
    }

    #[test]
    fn test_release_modes() {
        let f = dirty_book();
        assert!(matches!(
            release(&f.host, CloseMode::Raise, &f.book),
            Err(Error::WorkbookNotSaved(_))
        ));
        assert!(!release(&f.host, CloseMode::KeepOpen, &f.book).unwrap());
        assert!(f.host.is_book_alive(f.book.id));
        assert!(release(&f.host, CloseMode::Save, &f.book).unwrap());
        assert!(!f.host.is_book_alive(f.book.id));
        assert_eq!(on_disk(&f), CellValue::Number(2.0));
    }
}
