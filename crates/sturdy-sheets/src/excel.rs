//! Instance handle.

use std::fmt;

use crate::automation::{Automation, InstanceId};
use crate::book::Book;
use crate::error::{Error, Result};
use crate::keeper::Keeper;
use crate::options::CloseMode;
use crate::Calculation;

/// A handle to a host application instance.
///
/// The instance may die at any time (a user closes it, it crashes); every
/// method goes to the backend, so calls on a dead instance fail with the
/// backend's error. Use [`Excel::is_alive`] to probe first.
pub struct Excel<'k, A: Automation> {
    keeper: &'k Keeper<A>,
    id: InstanceId,
}

impl<'k, A: Automation> Excel<'k, A> {
    pub(crate) fn new(keeper: &'k Keeper<A>, id: InstanceId) -> Self {
        Self { keeper, id }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    fn automation(&self) -> &'k A {
        self.keeper.automation()
    }

    /// Probe the instance. A failing probe counts as dead and drops the
    /// instance from the keeper's registry.
    pub fn is_alive(&self) -> bool {
        self.keeper.registry().probe(self.automation(), self.id)
    }

    pub fn visible(&self) -> Result<bool> {
        self.automation().visible(self.id)
    }

    pub fn set_visible(&self, visible: bool) -> Result<()> {
        self.automation().set_visible(self.id, visible)
    }

    pub fn display_alerts(&self) -> Result<bool> {
        self.automation().display_alerts(self.id)
    }

    pub fn set_display_alerts(&self, display_alerts: bool) -> Result<()> {
        self.automation().set_display_alerts(self.id, display_alerts)
    }

    /// Calculation mode; [`Calculation::Unset`] while no workbook is open.
    pub fn calculation(&self) -> Result<Calculation> {
        self.automation().calculation(self.id)
    }

    /// Set the calculation mode. It is reported once a workbook is open.
    pub fn set_calculation(&self, mode: Calculation) -> Result<()> {
        if mode == Calculation::Unset {
            return Err(Error::option("calculation: unset cannot be assigned"));
        }
        self.automation().set_calculation(self.id, mode)
    }

    /// Workbooks open in this instance.
    pub fn books(&self) -> Result<Vec<Book<'k, A>>> {
        self.automation()
            .books(self.id)?
            .into_iter()
            .map(|info| Book::from_info(self.keeper, info))
            .collect()
    }

    /// Workbooks of this instance with unsaved changes.
    pub fn unsaved_books(&self) -> Result<Vec<Book<'k, A>>> {
        let mut unsaved = Vec::new();
        for book in self.books()? {
            if !book.saved()? {
                unsaved.push(book);
            }
        }
        Ok(unsaved)
    }

    /// Close every workbook according to `mode` and quit the instance.
    ///
    /// With [`CloseMode::Raise`] nothing is touched if any workbook has
    /// unsaved changes. With [`CloseMode::KeepOpen`] the instance keeps
    /// running when unsaved workbooks remain.
    pub fn close(&self, mode: CloseMode) -> Result<()> {
        if mode == CloseMode::Raise {
            if let Some(book) = self.unsaved_books()?.first() {
                return Err(Error::WorkbookNotSaved(book.path().to_path_buf()));
            }
        }
        let mut kept = 0;
        for book in self.books()? {
            book.close(mode)?;
            if book.is_alive() {
                kept += 1;
            }
        }
        if kept > 0 {
            tracing::debug!(instance = %self.id, kept, "instance kept running for unsaved workbooks");
            return Ok(());
        }
        self.automation().quit(self.id)?;
        self.keeper.registry().prune(self.id);
        tracing::info!(instance = %self.id, "quit instance");
        Ok(())
    }
}

impl<A: Automation> PartialEq for Excel<'_, A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<A: Automation> Eq for Excel<'_, A> {}

impl<A: Automation> fmt::Debug for Excel<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Excel").field(&self.id).finish()
    }
}
