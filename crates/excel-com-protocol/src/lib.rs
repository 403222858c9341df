//! Shared protocol types for communication between the sturdy-sheets client
//! and the Windows COM bridge process (run natively or under WINE).
//!
//! The protocol is JSON-over-stdio: one JSON object per line in each direction.
//! Instances and workbooks are referred to by opaque `u64` handles that the
//! bridge hands out and keeps stable for as long as the native object lives.

use serde::{Deserialize, Serialize};

/// A command sent from the client to the bridge process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Monotonically increasing request ID for correlating responses.
    pub id: u64,
    /// The command to execute.
    #[serde(flatten)]
    pub command: Command,
}

/// Commands the client can send to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum Command {
    /// Initialize COM. Does not start Excel.
    Init,

    /// Start a fresh Excel.Application instance. Returns an instance handle.
    StartInstance { visible: bool, display_alerts: bool },

    /// Attach to Excel instances that are already running. Returns the
    /// handles of every instance the bridge knows about afterwards.
    ConnectRunning,

    /// Liveness probe. Never fails for a dead instance; reports `alive: false`.
    Probe { instance: u64 },

    SetVisible { instance: u64, visible: bool },
    GetVisible { instance: u64 },
    SetDisplayAlerts { instance: u64, display_alerts: bool },
    GetDisplayAlerts { instance: u64 },
    SetCalculation { instance: u64, mode: Calculation },
    GetCalculation { instance: u64 },

    /// List the workbooks currently open in an instance.
    ListWorkbooks { instance: u64 },

    /// Open an existing workbook (Windows path). Returns a workbook handle.
    OpenWorkbook {
        instance: u64,
        path: String,
        read_only: bool,
    },

    /// Create a new empty workbook and save it at `path`.
    CreateWorkbook { instance: u64, path: String },

    /// Current path, owning instance and access mode of a workbook.
    GetWorkbookInfo { workbook: u64 },

    /// Whether the workbook has no unsaved changes.
    IsSaved { workbook: u64 },

    SetWorkbookVisible { workbook: u64, visible: bool },
    GetWorkbookVisible { workbook: u64 },

    /// Set a cell's value. Rows and columns are 1-based.
    SetCellValue {
        workbook: u64,
        sheet: SheetRef,
        row: u32,
        col: u32,
        value: CellValue,
    },

    /// Get a cell's value. Rows and columns are 1-based.
    GetCellValue {
        workbook: u64,
        sheet: SheetRef,
        row: u32,
        col: u32,
    },

    /// Save the workbook to its own path.
    SaveWorkbook { workbook: u64 },

    /// Save the workbook under a new path (Windows path), overwriting silently.
    /// Format is inferred from extension (.xlsx, .xls, .csv).
    SaveWorkbookAs { workbook: u64, path: String },

    /// Close a workbook, discarding unsaved changes.
    CloseWorkbook { workbook: u64 },

    /// Quit an instance. Open workbooks are closed without saving.
    QuitInstance { instance: u64 },

    /// Shut down the bridge: release every handle and uninitialize COM.
    /// Instances are left running.
    Shutdown,
}

/// Reference to a worksheet, by 0-based index or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetRef {
    Index(u32),
    Name(String),
}

impl Default for SheetRef {
    fn default() -> Self {
        SheetRef::Index(0)
    }
}

impl From<u32> for SheetRef {
    fn from(index: u32) -> Self {
        SheetRef::Index(index)
    }
}

impl From<&str> for SheetRef {
    fn from(name: &str) -> Self {
        SheetRef::Name(name.to_string())
    }
}

impl From<String> for SheetRef {
    fn from(name: String) -> Self {
        SheetRef::Name(name)
    }
}

/// Calculation mode of an Excel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calculation {
    Automatic,
    Manual,
    /// No workbook is open, so Excel reports no mode.
    #[default]
    Unset,
}

/// A cell value that can be sent to/from Excel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Error(CellError),
}

/// Excel error values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellError {
    pub code: String,
}

/// An open workbook as reported by `ListWorkbooks` and `GetWorkbookInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookInfo {
    pub workbook: u64,
    pub instance: u64,
    /// Full Windows path (`Workbook.FullName`).
    pub path: String,
    pub read_only: bool,
}

/// A response sent from the bridge back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The request ID this response corresponds to.
    pub id: u64,
    /// The result of the command.
    #[serde(flatten)]
    pub result: ResponseResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ResponseResult {
    #[serde(rename = "ok")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Data returned in successful responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// Handle to a newly started or attached instance.
    InstanceHandle { instance: u64 },
    /// Handles of all known instances.
    Instances { instances: Vec<u64> },
    /// Handle to a newly created/opened workbook.
    WorkbookHandle { workbook: u64 },
    /// Open workbooks of an instance.
    Workbooks { workbooks: Vec<WorkbookInfo> },
    /// A single workbook.
    Workbook { info: WorkbookInfo },
    /// Liveness probe result.
    Alive { alive: bool },
    /// A calculation mode.
    Calculation { calculation: Calculation },
    /// A boolean property (visibility, saved state, ...).
    Flag { flag: bool },
    /// A cell value.
    Value { value: CellValue },
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Parse a command-line style literal: numbers, `TRUE`/`FALSE`, an empty
    /// string as null, anything else as text.
    pub fn parse_literal(s: &str) -> Self {
        if s.is_empty() {
            return CellValue::Null;
        }
        if let Ok(n) = s.parse::<f64>() {
            return CellValue::Number(n);
        }
        match s.to_ascii_uppercase().as_str() {
            "TRUE" => CellValue::Bool(true),
            "FALSE" => CellValue::Bool(false),
            _ => CellValue::String(s.to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "<empty>"),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Error(e) => write!(f, "{}", e.code),
        }
    }
}
