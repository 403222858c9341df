//! Excel COM automation backend for sturdy-sheets.
//!
//! This crate spawns the Windows `excel-com-bridge.exe` (under WINE on Linux,
//! directly on Windows), which automates any number of `Excel.Application`
//! instances through COM. The two sides talk JSON-over-stdio. [`ExcelBridge`]
//! implements [`sturdy_sheets::Automation`], so a [`sturdy_sheets::Keeper`]
//! built on it applies its acquisition policies to real Excel.
//!
//! # Architecture
//!
//! ```text
//! Keeper (sturdy-sheets)
//!     └── ExcelBridge (this crate)
//!           └── spawns: [wine] excel-com-bridge.exe
//!                 └── COM: Excel.Application (one or more)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sturdy_sheets::{AcquireOptions, CloseMode, Keeper};
//! use sturdy_sheets_excel_com::{ExcelBridge, ExcelBridgeConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bridge = ExcelBridge::start(ExcelBridgeConfig::default())?;
//!     let keeper = Keeper::new(bridge);
//!     let book = keeper.acquire("report.xlsx", &AcquireOptions::new())?;
//!     book.set(1, 1, "Hello")?;
//!     book.close(CloseMode::Save)?;
//!     Ok(())
//! }
//! ```

mod bridge;
mod paths;

pub use bridge::{BridgeError, ExcelBridge, ExcelBridgeConfig};
pub use paths::{linux_to_wine_path, wine_to_linux_path};
