//! Robust acquisition of spreadsheet workbooks over Excel automation.
//!
//! Automating a spreadsheet application that a user may be running at the
//! same time is fragile: the workbook may already be open (perhaps with
//! unsaved edits), a different workbook with the same file name may block
//! it, the instance that had it open may have died. A [`Keeper`] tracks the
//! instances it has seen and resolves each of these conditions according to
//! declarative policies in [`AcquireOptions`].
//!
//! # Architecture
//!
//! ```text
//! Keeper::acquire(path, options)
//!     ├── Registry      known instances, last instance per path
//!     ├── resolver      if_unsaved / if_obstructed / close policies
//!     └── Automation    MemoryHost, or ExcelBridge (sturdy-sheets-excel-com)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sturdy_sheets::memory::MemoryHost;
//! use sturdy_sheets::{AcquireOptions, CloseMode, IfUnsaved, Keeper};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dir = tempfile::tempdir()?;
//!     let path = dir.path().join("report.xls");
//!     MemoryHost::write_workbook_file(&path, &[])?;
//!
//!     let keeper = Keeper::new(MemoryHost::new());
//!     let book = keeper.acquire(&path, &AcquireOptions::new())?;
//!     book.set(1, 1, "draft")?;
//!
//!     // Already open with unsaved changes: hand back the same workbook.
//!     let again = keeper.acquire(&path, &AcquireOptions::new().if_unsaved(IfUnsaved::Accept))?;
//!     assert_eq!(book, again);
//!
//!     book.close(CloseMode::Save)?;
//!     Ok(())
//! }
//! ```

mod automation;
mod book;
mod error;
mod excel;
mod keeper;
pub mod memory;
mod options;
mod path;
mod registry;
pub mod resolver;
mod sheet;
mod unobtrusive;

pub use automation::{Automation, BookId, BookInfo, InstanceId};
pub use book::Book;
pub use error::{Error, Result};
pub use excel::Excel;
pub use excel_com_protocol::{Calculation, CellValue, SheetRef};
pub use keeper::Keeper;
pub use options::{
    AcquireOptions, CloseMode, ExcelOptions, ExcelSelector, IfAbsent, IfExists, IfObstructed,
    IfUnsaved, SaveAsOptions, UnobtrusiveOptions,
};
pub use path::BookPath;
pub use registry::Registry;
