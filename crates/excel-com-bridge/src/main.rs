//! Excel COM Bridge: a Windows process that automates one or more Excel
//! instances via COM, controlled by JSON commands over stdin/stdout.
//!
//! Runs natively on Windows, or cross-compiled from Linux and run under WINE.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! - Reads `Request` objects from stdin
//! - Writes `Response` objects to stdout
//! - Diagnostic/log messages go to stderr (never stdout)

#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod excel;

#[cfg(not(windows))]
fn main() {
    eprintln!("excel-com-bridge must be compiled for Windows (--target x86_64-pc-windows-gnu)");
    eprintln!("and run natively or under WINE on Linux.");
    std::process::exit(1);
}

#[cfg(windows)]
fn main() {
    use std::io::{self, BufRead, Write};

    use excel_com_protocol::*;

    // Use stderr for all diagnostic output so stdout stays clean for protocol
    eprintln!("[excel-com-bridge] Starting up...");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut session: Option<excel::Session> = None;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("[excel-com-bridge] stdin read error: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                let response = handle_command(&mut session, &request);
                if matches!(request.command, Command::Shutdown) {
                    write_response(&mut out, &response);
                    eprintln!("[excel-com-bridge] Shutdown complete, exiting.");
                    return;
                }
                response
            }
            Err(e) => {
                eprintln!("[excel-com-bridge] JSON parse error: {e}");
                eprintln!("[excel-com-bridge] Line was: {line}");
                // id=0 since we couldn't parse the request
                Response {
                    id: 0,
                    result: ResponseResult::Error {
                        message: format!("JSON parse error: {e}"),
                    },
                }
            }
        };
        write_response(&mut out, &response);
    }

    // stdin closed without a Shutdown: release handles, leave Excel running
    if let Some(mut session) = session {
        session.release();
        uninit_com();
    }

    eprintln!("[excel-com-bridge] Process exiting.");
}

#[cfg(windows)]
fn write_response(out: &mut impl std::io::Write, response: &excel_com_protocol::Response) {
    match serde_json::to_string(response) {
        Ok(json) => {
            let _ = writeln!(out, "{json}");
            let _ = out.flush();
        }
        Err(e) => eprintln!("[excel-com-bridge] failed to encode response: {e}"),
    }
}

#[cfg(windows)]
fn handle_command(
    session: &mut Option<excel::Session>,
    request: &excel_com_protocol::Request,
) -> excel_com_protocol::Response {
    use excel_com_protocol::*;

    fn ok(data: ResponseData) -> Result<ResponseResult, String> {
        Ok(ResponseResult::Ok { data: Some(data) })
    }

    fn done() -> Result<ResponseResult, String> {
        Ok(ResponseResult::Ok { data: None })
    }

    let id = request.id;

    let result = match &request.command {
        Command::Init => init_com(session),
        Command::StartInstance {
            visible,
            display_alerts,
        } => with_session(session, |s| {
            let instance = s.start_instance(*visible, *display_alerts)?;
            ok(ResponseData::InstanceHandle { instance })
        }),
        Command::ConnectRunning => with_session(session, |s| {
            let instances = s.connect_running()?;
            ok(ResponseData::Instances { instances })
        }),
        Command::Probe { instance } => with_session(session, |s| {
            ok(ResponseData::Alive {
                alive: s.probe(*instance),
            })
        }),
        Command::SetVisible { instance, visible } => with_session(session, |s| {
            s.set_flag(*instance, "Visible", *visible)?;
            done()
        }),
        Command::GetVisible { instance } => with_session(session, |s| {
            ok(ResponseData::Flag {
                flag: s.get_flag(*instance, "Visible")?,
            })
        }),
        Command::SetDisplayAlerts {
            instance,
            display_alerts,
        } => with_session(session, |s| {
            s.set_flag(*instance, "DisplayAlerts", *display_alerts)?;
            done()
        }),
        Command::GetDisplayAlerts { instance } => with_session(session, |s| {
            ok(ResponseData::Flag {
                flag: s.get_flag(*instance, "DisplayAlerts")?,
            })
        }),
        Command::SetCalculation { instance, mode } => with_session(session, |s| {
            s.set_calculation(*instance, *mode)?;
            done()
        }),
        Command::GetCalculation { instance } => with_session(session, |s| {
            ok(ResponseData::Calculation {
                calculation: s.calculation(*instance)?,
            })
        }),
        Command::ListWorkbooks { instance } => with_session(session, |s| {
            ok(ResponseData::Workbooks {
                workbooks: s.list_workbooks(*instance)?,
            })
        }),
        Command::OpenWorkbook {
            instance,
            path,
            read_only,
        } => with_session(session, |s| {
            let workbook = s.open_workbook(*instance, path, *read_only)?;
            ok(ResponseData::WorkbookHandle { workbook })
        }),
        Command::CreateWorkbook { instance, path } => with_session(session, |s| {
            let workbook = s.create_workbook(*instance, path)?;
            ok(ResponseData::WorkbookHandle { workbook })
        }),
        Command::GetWorkbookInfo { workbook } => with_session(session, |s| {
            ok(ResponseData::Workbook {
                info: s.workbook_info(*workbook)?,
            })
        }),
        Command::IsSaved { workbook } => with_session(session, |s| {
            ok(ResponseData::Flag {
                flag: s.is_saved(*workbook)?,
            })
        }),
        Command::SetWorkbookVisible { workbook, visible } => with_session(session, |s| {
            s.set_workbook_visible(*workbook, *visible)?;
            done()
        }),
        Command::GetWorkbookVisible { workbook } => with_session(session, |s| {
            ok(ResponseData::Flag {
                flag: s.workbook_visible(*workbook)?,
            })
        }),
        Command::SetCellValue {
            workbook,
            sheet,
            row,
            col,
            value,
        } => with_session(session, |s| {
            s.set_cell_value(*workbook, sheet, *row, *col, value)?;
            done()
        }),
        Command::GetCellValue {
            workbook,
            sheet,
            row,
            col,
        } => with_session(session, |s| {
            let value = s.get_cell_value(*workbook, sheet, *row, *col)?;
            ok(ResponseData::Value { value })
        }),
        Command::SaveWorkbook { workbook } => with_session(session, |s| {
            s.save_workbook(*workbook)?;
            done()
        }),
        Command::SaveWorkbookAs { workbook, path } => with_session(session, |s| {
            s.save_workbook_as(*workbook, path)?;
            done()
        }),
        Command::CloseWorkbook { workbook } => with_session(session, |s| {
            s.close_workbook(*workbook)?;
            done()
        }),
        Command::QuitInstance { instance } => with_session(session, |s| {
            s.quit_instance(*instance)?;
            done()
        }),
        Command::Shutdown => {
            if let Some(mut s) = session.take() {
                s.release();
                uninit_com();
            }
            ResponseResult::Ok { data: None }
        }
    };

    Response { id, result }
}

#[cfg(windows)]
fn init_com(session: &mut Option<excel::Session>) -> excel_com_protocol::ResponseResult {
    use excel_com_protocol::ResponseResult;
    use windows::Win32::System::Com::{CoInitializeEx, COINIT_APARTMENTTHREADED};

    if session.is_some() {
        return ResponseResult::Ok { data: None }; // Already initialized
    }

    // Initialize COM in Single-Threaded Apartment mode (required by Excel)
    unsafe {
        let hr = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
        if let Err(e) = hr.ok() {
            return ResponseResult::Error {
                message: format!("CoInitializeEx failed: {e}"),
            };
        }
    }

    eprintln!("[excel-com-bridge] COM initialized (STA)");
    *session = Some(excel::Session::new());
    ResponseResult::Ok { data: None }
}

#[cfg(windows)]
fn uninit_com() {
    unsafe {
        windows::Win32::System::Com::CoUninitialize();
    }
    eprintln!("[excel-com-bridge] COM uninitialized");
}

#[cfg(windows)]
fn with_session(
    session: &mut Option<excel::Session>,
    f: impl FnOnce(&mut excel::Session) -> Result<excel_com_protocol::ResponseResult, String>,
) -> excel_com_protocol::ResponseResult {
    match session.as_mut() {
        Some(s) => match f(s) {
            Ok(r) => r,
            Err(e) => excel_com_protocol::ResponseResult::Error { message: e },
        },
        None => excel_com_protocol::ResponseResult::Error {
            message: "COM not initialized. Send 'Init' command first.".to_string(),
        },
    }
}
