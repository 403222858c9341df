//! Subprocess management and JSON IPC for the bridge process.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use excel_com_protocol::{
    Calculation, CellValue, Command as BridgeCommand, Request, Response, ResponseData,
    ResponseResult, SheetRef, WorkbookInfo,
};
use sturdy_sheets::{Automation, BookId, BookInfo, InstanceId};

use crate::paths::{linux_to_wine_path, wine_to_linux_path};

/// Errors from the Excel COM bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to spawn bridge process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Bridge process not running")]
    NotRunning,

    #[error("Failed to send command to bridge: {0}")]
    SendFailed(String),

    #[error("Failed to read response from bridge: {0}")]
    ReadFailed(String),

    #[error("No response from bridge within {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Bridge returned error: {0}")]
    BridgeError(String),

    #[error("Unexpected response data for {0}")]
    UnexpectedResponse(&'static str),

    #[error("WINE not found. Install WINE and ensure 'wine' is in PATH.")]
    WineNotFound,

    #[error("Bridge executable not found at: {0}")]
    BridgeExeNotFound(String),
}

impl From<BridgeError> for sturdy_sheets::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::BridgeError(message) => sturdy_sheets::Error::Automation(message),
            other => sturdy_sheets::Error::Automation(other.to_string()),
        }
    }
}

/// Configuration for the Excel COM bridge.
#[derive(Debug, Clone)]
pub struct ExcelBridgeConfig {
    /// Path to the `excel-com-bridge.exe` Windows executable.
    /// If None, will search in common locations relative to the current binary.
    pub bridge_exe_path: Option<PathBuf>,

    /// Path to the WINE executable. `None` runs the bridge directly, which is
    /// the default on Windows.
    pub wine_path: Option<PathBuf>,

    /// Optional WINEPREFIX to use (for isolating the WINE environment).
    pub wine_prefix: Option<PathBuf>,

    /// Timeout for waiting for bridge responses.
    pub timeout: Duration,
}

impl Default for ExcelBridgeConfig {
    fn default() -> Self {
        Self {
            bridge_exe_path: None,
            wine_path: if cfg!(windows) {
                None
            } else {
                Some(PathBuf::from("wine"))
            },
            wine_prefix: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// An [`Automation`] backend driving real Excel through the bridge process.
///
/// Paths cross the bridge as Windows paths; under WINE they are converted in
/// both directions, so callers and the keeper only ever see host paths.
pub struct ExcelBridge {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    responses: Mutex<Receiver<std::io::Result<String>>>,
    next_id: AtomicU64,
    timeout: Duration,
    /// WINEPREFIX used for drive letter mapping; `None` when running natively.
    wine_prefix: Option<PathBuf>,
}

impl ExcelBridge {
    /// Start the bridge process and initialize COM. No instance is started.
    pub fn start(config: ExcelBridgeConfig) -> Result<Self, BridgeError> {
        let exe_path = config.bridge_exe_path.unwrap_or_else(find_bridge_exe);

        if !exe_path.exists() {
            return Err(BridgeError::BridgeExeNotFound(
                exe_path.display().to_string(),
            ));
        }

        let mut cmd = match &config.wine_path {
            Some(wine) => {
                let mut cmd = std::process::Command::new(wine);
                if let Some(prefix) = &config.wine_prefix {
                    cmd.env("WINEPREFIX", prefix);
                }
                cmd.arg(&exe_path);
                cmd
            }
            None => std::process::Command::new(&exe_path),
        };
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit()); // Bridge diagnostics go to our stderr

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound && config.wine_path.is_some() {
                BridgeError::WineNotFound
            } else {
                BridgeError::SpawnFailed(e)
            }
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BridgeError::NotRunning);
        };

        let wine_prefix = config.wine_path.as_ref().map(|_| {
            config
                .wine_prefix
                .clone()
                .unwrap_or_else(default_wine_prefix)
        });

        let bridge = Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            responses: Mutex::new(spawn_reader(stdout)),
            next_id: AtomicU64::new(1),
            timeout: config.timeout,
            wine_prefix,
        };

        bridge.send_command(BridgeCommand::Init)?;
        tracing::info!(exe = %exe_path.display(), wine = bridge.wine_prefix.is_some(), "bridge started");

        Ok(bridge)
    }

    /// Send a command to the bridge and wait for the response.
    fn send_command(&self, command: BridgeCommand) -> Result<Option<ResponseData>, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let request = Request { id, command };
        let json = serde_json::to_string(&request)?;
        tracing::trace!(%json, "bridge request");

        // Hold the response channel for the whole exchange so concurrent
        // callers cannot steal each other's responses.
        let responses = lock(&self.responses);

        {
            let mut stdin = lock(&self.stdin);
            writeln!(stdin, "{json}").map_err(|e| BridgeError::SendFailed(e.to_string()))?;
            stdin
                .flush()
                .map_err(|e| BridgeError::SendFailed(e.to_string()))?;
        }

        loop {
            let line = match responses.recv_timeout(self.timeout) {
                Ok(line) => line.map_err(|e| BridgeError::ReadFailed(e.to_string()))?,
                Err(RecvTimeoutError::Timeout) => return Err(BridgeError::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(BridgeError::NotRunning),
            };
            let response: Response = serde_json::from_str(&line)?;
            if response.id != id {
                // Late answer to a request that already timed out.
                tracing::debug!(expected = id, got = response.id, "discarding stale response");
                continue;
            }
            return match response.result {
                ResponseResult::Ok { data } => Ok(data),
                ResponseResult::Error { message } => Err(BridgeError::BridgeError(message)),
            };
        }
    }

    /// Shut down the bridge process. Excel instances keep running.
    pub fn shutdown(self) -> Result<(), BridgeError> {
        if let Err(e) = self.send_command(BridgeCommand::Shutdown) {
            tracing::debug!(error = %e, "bridge did not acknowledge shutdown");
        }

        let mut child = lock(&self.child);
        child.wait()?;

        Ok(())
    }

    fn to_bridge_path(&self, path: &Path) -> String {
        match self.wine_prefix {
            Some(_) => linux_to_wine_path(path),
            None => path.display().to_string(),
        }
    }

    fn from_bridge_path(&self, raw: &str) -> PathBuf {
        match &self.wine_prefix {
            Some(prefix) => wine_to_linux_path(raw, prefix),
            None => PathBuf::from(raw),
        }
    }

    fn book_info_from(&self, info: WorkbookInfo) -> BookInfo {
        BookInfo {
            id: BookId(info.workbook),
            instance: InstanceId(info.instance),
            path: self.from_bridge_path(&info.path),
            read_only: info.read_only,
        }
    }

    fn unit(&self, command: BridgeCommand) -> sturdy_sheets::Result<()> {
        self.send_command(command)?;
        Ok(())
    }

    fn flag(&self, command: BridgeCommand, what: &'static str) -> sturdy_sheets::Result<bool> {
        match self.send_command(command)? {
            Some(ResponseData::Flag { flag }) => Ok(flag),
            _ => Err(BridgeError::UnexpectedResponse(what).into()),
        }
    }

    fn workbook_handle(&self, command: BridgeCommand, what: &'static str) -> sturdy_sheets::Result<BookId> {
        match self.send_command(command)? {
            Some(ResponseData::WorkbookHandle { workbook }) => Ok(BookId(workbook)),
            _ => Err(BridgeError::UnexpectedResponse(what).into()),
        }
    }
}

impl Automation for ExcelBridge {
    fn start_instance(&self, visible: bool, display_alerts: bool) -> sturdy_sheets::Result<InstanceId> {
        match self.send_command(BridgeCommand::StartInstance {
            visible,
            display_alerts,
        })? {
            Some(ResponseData::InstanceHandle { instance }) => Ok(InstanceId(instance)),
            _ => Err(BridgeError::UnexpectedResponse("StartInstance").into()),
        }
    }

    fn running_instances(&self) -> sturdy_sheets::Result<Vec<InstanceId>> {
        match self.send_command(BridgeCommand::ConnectRunning)? {
            Some(ResponseData::Instances { instances }) => {
                Ok(instances.into_iter().map(InstanceId).collect())
            }
            _ => Err(BridgeError::UnexpectedResponse("ConnectRunning").into()),
        }
    }

    fn is_alive(&self, instance: InstanceId) -> sturdy_sheets::Result<bool> {
        match self.send_command(BridgeCommand::Probe {
            instance: instance.0,
        })? {
            Some(ResponseData::Alive { alive }) => Ok(alive),
            _ => Err(BridgeError::UnexpectedResponse("Probe").into()),
        }
    }

    fn visible(&self, instance: InstanceId) -> sturdy_sheets::Result<bool> {
        self.flag(
            BridgeCommand::GetVisible {
                instance: instance.0,
            },
            "GetVisible",
        )
    }

    fn set_visible(&self, instance: InstanceId, visible: bool) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::SetVisible {
            instance: instance.0,
            visible,
        })
    }

    fn display_alerts(&self, instance: InstanceId) -> sturdy_sheets::Result<bool> {
        self.flag(
            BridgeCommand::GetDisplayAlerts {
                instance: instance.0,
            },
            "GetDisplayAlerts",
        )
    }

    fn set_display_alerts(&self, instance: InstanceId, display_alerts: bool) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::SetDisplayAlerts {
            instance: instance.0,
            display_alerts,
        })
    }

    fn calculation(&self, instance: InstanceId) -> sturdy_sheets::Result<Calculation> {
        match self.send_command(BridgeCommand::GetCalculation {
            instance: instance.0,
        })? {
            Some(ResponseData::Calculation { calculation }) => Ok(calculation),
            _ => Err(BridgeError::UnexpectedResponse("GetCalculation").into()),
        }
    }

    fn set_calculation(&self, instance: InstanceId, mode: Calculation) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::SetCalculation {
            instance: instance.0,
            mode,
        })
    }

    fn books(&self, instance: InstanceId) -> sturdy_sheets::Result<Vec<BookInfo>> {
        match self.send_command(BridgeCommand::ListWorkbooks {
            instance: instance.0,
        })? {
            Some(ResponseData::Workbooks { workbooks }) => Ok(workbooks
                .into_iter()
                .map(|info| self.book_info_from(info))
                .collect()),
            _ => Err(BridgeError::UnexpectedResponse("ListWorkbooks").into()),
        }
    }

    fn book_info(&self, book: BookId) -> sturdy_sheets::Result<BookInfo> {
        match self.send_command(BridgeCommand::GetWorkbookInfo { workbook: book.0 })? {
            Some(ResponseData::Workbook { info }) => Ok(self.book_info_from(info)),
            _ => Err(BridgeError::UnexpectedResponse("GetWorkbookInfo").into()),
        }
    }

    fn open_book(&self, instance: InstanceId, path: &Path, read_only: bool) -> sturdy_sheets::Result<BookId> {
        self.workbook_handle(
            BridgeCommand::OpenWorkbook {
                instance: instance.0,
                path: self.to_bridge_path(path),
                read_only,
            },
            "OpenWorkbook",
        )
    }

    fn create_book(&self, instance: InstanceId, path: &Path) -> sturdy_sheets::Result<BookId> {
        self.workbook_handle(
            BridgeCommand::CreateWorkbook {
                instance: instance.0,
                path: self.to_bridge_path(path),
            },
            "CreateWorkbook",
        )
    }

    fn is_saved(&self, book: BookId) -> sturdy_sheets::Result<bool> {
        self.flag(BridgeCommand::IsSaved { workbook: book.0 }, "IsSaved")
    }

    fn book_visible(&self, book: BookId) -> sturdy_sheets::Result<bool> {
        self.flag(
            BridgeCommand::GetWorkbookVisible { workbook: book.0 },
            "GetWorkbookVisible",
        )
    }

    fn set_book_visible(&self, book: BookId, visible: bool) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::SetWorkbookVisible {
            workbook: book.0,
            visible,
        })
    }

    fn read_cell(
        &self,
        book: BookId,
        sheet: &SheetRef,
        row: u32,
        col: u32,
    ) -> sturdy_sheets::Result<CellValue> {
        match self.send_command(BridgeCommand::GetCellValue {
            workbook: book.0,
            sheet: sheet.clone(),
            row,
            col,
        })? {
            Some(ResponseData::Value { value }) => Ok(value),
            _ => Err(BridgeError::UnexpectedResponse("GetCellValue").into()),
        }
    }

    fn write_cell(
        &self,
        book: BookId,
        sheet: &SheetRef,
        row: u32,
        col: u32,
        value: CellValue,
    ) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::SetCellValue {
            workbook: book.0,
            sheet: sheet.clone(),
            row,
            col,
            value,
        })
    }

    fn save(&self, book: BookId) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::SaveWorkbook { workbook: book.0 })
    }

    fn save_as(&self, book: BookId, path: &Path) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::SaveWorkbookAs {
            workbook: book.0,
            path: self.to_bridge_path(path),
        })
    }

    fn close_book(&self, book: BookId) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::CloseWorkbook { workbook: book.0 })
    }

    fn quit(&self, instance: InstanceId) -> sturdy_sheets::Result<()> {
        self.unit(BridgeCommand::QuitInstance {
            instance: instance.0,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read response lines on a separate thread so waits can time out.
fn spawn_reader(stdout: ChildStdout) -> Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}

fn default_wine_prefix() -> PathBuf {
    if let Some(prefix) = std::env::var_os("WINEPREFIX") {
        return PathBuf::from(prefix);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".wine")
}

/// Attempt to locate the bridge exe relative to the current executable or in common paths.
fn find_bridge_exe() -> PathBuf {
    // Check next to the current executable
    if let Ok(mut exe) = std::env::current_exe() {
        exe.pop();
        let candidate = exe.join("excel-com-bridge.exe");
        if candidate.exists() {
            return candidate;
        }
    }

    // Check in the target directory (for development)
    for profile in ["release", "debug"] {
        let candidate = PathBuf::from("target/x86_64-pc-windows-gnu")
            .join(profile)
            .join("excel-com-bridge.exe");
        if candidate.exists() {
            return candidate;
        }
    }

    // Default: assume it's in the current directory
    PathBuf::from("excel-com-bridge.exe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_becomes_automation_error() {
        let err: sturdy_sheets::Error = BridgeError::BridgeError("Open failed".into()).into();
        assert!(matches!(err, sturdy_sheets::Error::Automation(ref m) if m == "Open failed"));

        let err: sturdy_sheets::Error = BridgeError::Timeout(Duration::from_secs(2)).into();
        assert!(err.to_string().contains("2s"));
    }

    #[test]
    fn test_missing_bridge_exe() {
        let config = ExcelBridgeConfig {
            bridge_exe_path: Some(PathBuf::from("/nonexistent/excel-com-bridge.exe")),
            ..Default::default()
        };
        assert!(matches!(
            ExcelBridge::start(config),
            Err(BridgeError::BridgeExeNotFound(_))
        ));
    }
}
