//! The narrow capability interface the policy engine needs from a host.
//!
//! Implementations wrap the native automation transport (see the
//! `sturdy-sheets-excel-com` crate) or simulate it ([`crate::memory::MemoryHost`]).
//! All calls are blocking. Methods take `&self`; implementations keep their
//! mutable state behind interior mutability, the way a bridge process handle
//! serializes access to its pipes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{Calculation, CellValue, SheetRef};

/// Opaque handle of a running host application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

/// Opaque handle of an open workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "excel#{}", self.0)
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "book#{}", self.0)
    }
}

/// An open workbook as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookInfo {
    pub id: BookId,
    pub instance: InstanceId,
    /// Full path of the workbook, in the caller's path space.
    pub path: PathBuf,
    pub read_only: bool,
}

/// Operations on host instances and their workbooks.
///
/// Starting an instance is the factory seam: a `Keeper` never constructs
/// instances itself, it asks its `Automation` for one.
pub trait Automation {
    /// Start a fresh application instance.
    fn start_instance(&self, visible: bool, display_alerts: bool) -> Result<InstanceId>;

    /// Instances that are already running, including ones started elsewhere.
    fn running_instances(&self) -> Result<Vec<InstanceId>>;

    /// Liveness probe. Callers treat an error as "not alive".
    fn is_alive(&self, instance: InstanceId) -> Result<bool>;

    fn visible(&self, instance: InstanceId) -> Result<bool>;
    fn set_visible(&self, instance: InstanceId, visible: bool) -> Result<()>;
    fn display_alerts(&self, instance: InstanceId) -> Result<bool>;
    fn set_display_alerts(&self, instance: InstanceId, display_alerts: bool) -> Result<()>;
    fn calculation(&self, instance: InstanceId) -> Result<Calculation>;
    fn set_calculation(&self, instance: InstanceId, mode: Calculation) -> Result<()>;

    /// Workbooks currently open in `instance`.
    fn books(&self, instance: InstanceId) -> Result<Vec<BookInfo>>;

    /// Current state of an open workbook; fails once it has been closed.
    fn book_info(&self, book: BookId) -> Result<BookInfo>;

    /// Open an existing file. Opening a path that is already open in the same
    /// instance returns the existing workbook.
    fn open_book(&self, instance: InstanceId, path: &Path, read_only: bool) -> Result<BookId>;

    /// Create an empty workbook and save it at `path`.
    fn create_book(&self, instance: InstanceId, path: &Path) -> Result<BookId>;

    /// Whether the workbook has no unsaved changes.
    fn is_saved(&self, book: BookId) -> Result<bool>;

    /// Effective visibility: the workbook window is shown and so is its instance.
    fn book_visible(&self, book: BookId) -> Result<bool>;
    fn set_book_visible(&self, book: BookId, visible: bool) -> Result<()>;

    /// Read a cell. Rows and columns are 1-based.
    fn read_cell(&self, book: BookId, sheet: &SheetRef, row: u32, col: u32) -> Result<CellValue>;

    /// Write a cell, marking the workbook unsaved. Rows and columns are 1-based.
    fn write_cell(
        &self,
        book: BookId,
        sheet: &SheetRef,
        row: u32,
        col: u32,
        value: CellValue,
    ) -> Result<()>;

    /// Flush the workbook to its own path.
    fn save(&self, book: BookId) -> Result<()>;

    /// Write the workbook to `path`, overwriting it, and rebind the workbook
    /// to that path.
    fn save_as(&self, book: BookId, path: &Path) -> Result<()>;

    /// Close the workbook, discarding unsaved changes.
    fn close_book(&self, book: BookId) -> Result<()>;

    /// Quit the instance, discarding unsaved changes of its workbooks.
    fn quit(&self, instance: InstanceId) -> Result<()>;

    fn is_book_alive(&self, book: BookId) -> bool {
        self.book_info(book).is_ok()
    }
}
