//! Scoped access that leaves a workbook the way it was found.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::automation::{Automation, BookInfo, InstanceId};
use crate::book::Book;
use crate::error::Result;
use crate::keeper::{validate, Keeper};
use crate::options::{ExcelSelector, IfAbsent, UnobtrusiveOptions};
use crate::path::BookPath;

/// State of an already open workbook before the work ran.
#[derive(Debug, Clone, Copy)]
struct Remembered {
    instance: InstanceId,
    saved: bool,
    read_only: bool,
    visible: bool,
    instance_visible: bool,
}

impl<A: Automation> Keeper<A> {
    /// Run `work` on the workbook at `path` without disturbing its state.
    ///
    /// If the workbook is not open it is opened (in the instance chosen by
    /// `if_closed`), and afterwards closed again, quitting the instance if
    /// this call started it. If it is open, its saved state, access mode and
    /// visibility are restored when the work is done. With `writable` set
    /// the work's edits are saved, unless the workbook already had unsaved
    /// changes of its own; without it they are discarded.
    ///
    /// Cleanup runs on every exit path. An error from `work` is returned
    /// after cleanup; a panic in `work` is resumed after cleanup.
    pub fn unobtrusively<'s, R, F>(
        &'s self,
        path: impl AsRef<Path>,
        options: &UnobtrusiveOptions,
        work: F,
    ) -> Result<R>
    where
        F: FnOnce(&Book<'s, A>) -> Result<R>,
    {
        let (path, _) = validate(path.as_ref(), IfAbsent::Raise)?;
        let mut registry = self.registry();
        registry.discover(self.automation());
        let open = registry.find_open_document(self.automation(), &path)?;
        drop(registry);
        match open {
            Some(info) => self.borrow_open(info, &path, options, work),
            None => self.open_temporarily(&path, options, work),
        }
    }

    fn open_temporarily<'s, R, F>(
        &'s self,
        path: &BookPath,
        options: &UnobtrusiveOptions,
        work: F,
    ) -> Result<R>
    where
        F: FnOnce(&Book<'s, A>) -> Result<R>,
    {
        let (mut instance, mut started) = match options.if_closed {
            ExcelSelector::New => (self.start_instance(options.visible)?, true),
            ExcelSelector::Current => {
                let current = self.registry().current(self.automation());
                match current {
                    Some(instance) => (instance, false),
                    None => (self.start_instance(options.visible)?, true),
                }
            }
            ExcelSelector::Instance(instance) => {
                self.ensure_alive(instance)?;
                (instance, false)
            }
        };
        if !started {
            let blocker = self
                .registry()
                .find_name_collision_in(self.automation(), path, instance)?;
            if let Some(blocker) = blocker {
                tracing::debug!(
                    path = %path,
                    blocking = %blocker.path.display(),
                    "same-named workbook open, using a fresh instance"
                );
                instance = self.start_instance(options.visible)?;
                started = true;
            }
        }

        let book = match self.open_in(instance, path, true, !options.writable, options.visible) {
            Ok(book) => book,
            Err(err) => {
                if started {
                    self.quit_quietly(instance);
                }
                return Err(err);
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            work(&book).and_then(|value| {
                if options.writable && book.is_alive() && !book.saved()? {
                    book.save()?;
                }
                Ok(value)
            })
        }));

        // The work may have closed the workbook itself.
        let mut cleanup = if book.is_alive() {
            self.automation().close_book(book.id())
        } else {
            Ok(())
        };
        if started {
            let quit = self.quit_instance(instance);
            cleanup = cleanup.and(quit);
        }
        tracing::debug!(path = %path, started, "unobtrusive access done");
        finish(outcome, cleanup)
    }

    fn borrow_open<'s, R, F>(
        &'s self,
        info: BookInfo,
        path: &BookPath,
        options: &UnobtrusiveOptions,
        work: F,
    ) -> Result<R>
    where
        F: FnOnce(&Book<'s, A>) -> Result<R>,
    {
        let automation = self.automation();
        let before = Remembered {
            instance: info.instance,
            saved: automation.is_saved(info.id)?,
            read_only: info.read_only,
            visible: automation.book_visible(info.id)?,
            instance_visible: automation.visible(info.instance)?,
        };

        let reopened = options.writable && before.read_only && before.saved;
        let book = if reopened {
            tracing::debug!(path = %path, "reopening read-only workbook for writing");
            automation.close_book(info.id)?;
            self.open_in(before.instance, path, true, false, None)?
        } else {
            Book::new(self, info.id, info.instance, path.clone())
        };
        if let Some(visible) = options.visible {
            book.set_visible(visible)?;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            work(&book).and_then(|value| {
                if options.writable && before.saved && book.is_alive() && !book.saved()? {
                    book.save()?;
                }
                Ok(value)
            })
        }));

        let restore_visibility = reopened || options.visible.is_some();
        let cleanup = self.restore(book, path, &before, restore_visibility);
        finish(outcome, cleanup)
    }

    /// Bring a borrowed workbook back to its remembered state.
    fn restore<'s>(
        &'s self,
        mut book: Book<'s, A>,
        path: &BookPath,
        before: &Remembered,
        restore_visibility: bool,
    ) -> Result<()> {
        let automation = self.automation();
        if !book.is_alive() {
            tracing::debug!(path = %path, "workbook was closed during the work, reopening");
            book = self.open_in(before.instance, path, true, before.read_only, None)?;
            book.set_visible(before.visible)?;
            automation.set_visible(before.instance, before.instance_visible)?;
            return Ok(());
        }
        let dirty = !book.saved()?;
        let reopen = if before.saved && dirty {
            tracing::debug!(path = %path, "discarding edits to restore saved workbook");
            true
        } else {
            !dirty && book.read_only()? != before.read_only
        };
        if reopen {
            automation.close_book(book.id())?;
            book = self.open_in(before.instance, path, true, before.read_only, None)?;
        }
        if restore_visibility || reopen {
            book.set_visible(before.visible)?;
            automation.set_visible(before.instance, before.instance_visible)?;
        }
        Ok(())
    }

    fn quit_instance(&self, instance: InstanceId) -> Result<()> {
        self.automation().quit(instance)?;
        self.registry().prune(instance);
        tracing::info!(%instance, "quit instance");
        Ok(())
    }

    fn quit_quietly(&self, instance: InstanceId) {
        if let Err(err) = self.quit_instance(instance) {
            tracing::warn!(%instance, error = %err, "failed to quit instance");
        }
    }
}

/// The work's result wins over a cleanup error, which is only logged then.
/// A panic from the work is resumed once cleanup has run.
fn finish<R>(outcome: std::thread::Result<Result<R>>, cleanup: Result<()>) -> Result<R> {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(payload) => {
            if let Err(err) = cleanup {
                tracing::warn!(error = %err, "cleanup failed after a panic");
            }
            panic::resume_unwind(payload)
        }
    };
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            tracing::warn!(error = %cleanup_err, "cleanup failed after an error");
            Err(err)
        }
    }
}
