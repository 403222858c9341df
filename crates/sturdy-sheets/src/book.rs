//! Workbook handle: ergonomic API for an open workbook.

use std::fmt;
use std::path::Path;

use crate::automation::{Automation, BookId, BookInfo, InstanceId};
use crate::error::{Error, Result};
use crate::excel::Excel;
use crate::keeper::Keeper;
use crate::options::{CloseMode, IfExists, IfObstructed, SaveAsOptions};
use crate::path::BookPath;
use crate::resolver;
use crate::sheet::Sheet;
use crate::{CellValue, SheetRef};

/// A handle to an open workbook.
///
/// Handles compare equal when they refer to the same native workbook in the
/// same instance. State (saved, read-only, visible) is always read from the
/// host, never cached, since the workbook may be changed from outside.
pub struct Book<'k, A: Automation> {
    keeper: &'k Keeper<A>,
    id: BookId,
    instance: InstanceId,
    path: BookPath,
}

impl<'k, A: Automation> Book<'k, A> {
    pub(crate) fn new(keeper: &'k Keeper<A>, id: BookId, instance: InstanceId, path: BookPath) -> Self {
        Self {
            keeper,
            id,
            instance,
            path,
        }
    }

    pub(crate) fn from_info(keeper: &'k Keeper<A>, info: BookInfo) -> Result<Self> {
        let path = BookPath::new(&info.path)?;
        Ok(Self::new(keeper, info.id, info.instance, path))
    }

    pub fn id(&self) -> BookId {
        self.id
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// The instance holding this workbook.
    pub fn excel(&self) -> Excel<'k, A> {
        Excel::new(self.keeper, self.instance)
    }

    /// Normalized absolute path.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub(crate) fn book_path(&self) -> &BookPath {
        &self.path
    }

    /// File name without directory.
    pub fn name(&self) -> String {
        self.path
            .as_path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn automation(&self) -> &'k A {
        self.keeper.automation()
    }

    /// Whether the native workbook is still open.
    pub fn is_alive(&self) -> bool {
        self.automation().is_book_alive(self.id)
    }

    /// Whether the workbook has no unsaved changes.
    pub fn saved(&self) -> Result<bool> {
        self.automation().is_saved(self.id)
    }

    pub fn read_only(&self) -> Result<bool> {
        Ok(self.automation().book_info(self.id)?.read_only)
    }

    pub fn visible(&self) -> Result<bool> {
        self.automation().book_visible(self.id)
    }

    /// Show or hide the workbook window. Showing it also shows its instance.
    pub fn set_visible(&self, visible: bool) -> Result<()> {
        self.automation().set_book_visible(self.id, visible)
    }

    /// A worksheet by 0-based index or by name.
    pub fn sheet(&self, sheet: impl Into<SheetRef>) -> Sheet<'_, 'k, A> {
        Sheet::new(self, sheet.into())
    }

    /// Read a cell of the first sheet (1-based row and column).
    pub fn get(&self, row: u32, col: u32) -> Result<CellValue> {
        self.sheet(SheetRef::Index(0)).cell(row, col)
    }

    /// Write a cell of the first sheet (1-based row and column).
    pub fn set(&self, row: u32, col: u32, value: impl Into<CellValue>) -> Result<()> {
        self.sheet(SheetRef::Index(0)).set_cell(row, col, value)
    }

    pub(crate) fn read_cell(&self, sheet: &SheetRef, row: u32, col: u32) -> Result<CellValue> {
        self.automation().read_cell(self.id, sheet, row, col)
    }

    pub(crate) fn write_cell(
        &self,
        sheet: &SheetRef,
        row: u32,
        col: u32,
        value: CellValue,
    ) -> Result<()> {
        self.automation().write_cell(self.id, sheet, row, col, value)
    }

    /// Flush the workbook to its own path.
    pub fn save(&self) -> Result<()> {
        tracing::debug!(path = %self.path, "saving workbook");
        self.automation().save(self.id)
    }

    /// Save under a new path; the handle follows the workbook to it.
    ///
    /// An existing file is only replaced with [`IfExists::Overwrite`]. A
    /// different workbook with the same file name open in the same instance
    /// is handled by `if_obstructed`.
    pub fn save_as(&mut self, path: impl AsRef<Path>, options: &SaveAsOptions) -> Result<()> {
        if options.if_obstructed == IfObstructed::NewExcel {
            return Err(Error::option(
                "if_obstructed: new_excel cannot be used when saving",
            ));
        }
        let target = BookPath::new(path)?;
        let automation = self.automation();
        if target.as_path().is_dir() {
            return Err(Error::FileIsDirectory(target.as_path().to_path_buf()));
        }
        if target == self.path {
            return self.save();
        }
        if target.as_path().exists() && options.if_exists == IfExists::Raise {
            return Err(Error::FileAlreadyExists(target.as_path().to_path_buf()));
        }

        for other in automation.books(self.instance)? {
            if other.id == self.id {
                continue;
            }
            if BookPath::new(&other.path)?.basename() == target.basename() {
                resolver::resolve_obstruction(
                    automation,
                    options.if_obstructed,
                    &other,
                    target.as_path(),
                )?;
            }
        }

        tracing::info!(from = %self.path, to = %target, "saving workbook under new name");
        automation.save_as(self.id, target.as_path())?;
        self.keeper.registry().record(target.clone(), self.instance);
        self.path = target;
        Ok(())
    }

    /// Close the workbook according to `mode`. With [`CloseMode::KeepOpen`]
    /// a workbook with unsaved changes stays open and the handle stays valid.
    pub fn close(&self, mode: CloseMode) -> Result<()> {
        let info = self.automation().book_info(self.id)?;
        let closed = resolver::release(self.automation(), mode, &info)?;
        if closed {
            tracing::info!(path = %self.path, "closed workbook");
        } else {
            tracing::debug!(path = %self.path, "workbook has unsaved changes, kept open");
        }
        Ok(())
    }
}

impl<A: Automation> PartialEq for Book<'_, A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.instance == other.instance
    }
}

impl<A: Automation> Eq for Book<'_, A> {}

impl<A: Automation> fmt::Debug for Book<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Book")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("path", &self.path.as_path())
            .finish()
    }
}
