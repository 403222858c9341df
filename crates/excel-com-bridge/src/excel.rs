//! Excel-specific COM automation layer built on top of the generic IDispatch wrapper.
//!
//! A [`Session`] tracks every Excel instance the client has started or attached
//! to, and every workbook it has seen, under stable `u64` handles.

#![cfg(windows)]

use std::collections::HashMap;

use windows::Win32::System::Variant::VARIANT;

use excel_com_protocol::{Calculation, CellError, CellValue, SheetRef, WorkbookInfo};

use crate::dispatch::{
    variant_bool, variant_empty, variant_f64, variant_get_bool, variant_get_f64,
    variant_get_string, variant_i32, variant_is_empty, variant_is_error, variant_str,
    DispatchObject,
};

// XlCalculation
const XL_CALCULATION_AUTOMATIC: i32 = -4105;
const XL_CALCULATION_MANUAL: i32 = -4135;
const XL_CALCULATION_SEMIAUTOMATIC: i32 = 2;

// XlFileFormat
const XL_OPEN_XML_WORKBOOK: i32 = 51;
const XL_WORKBOOK_NORMAL: i32 = -4143;
const XL_CSV: i32 = 6;

/// One Excel.Application instance.
struct ExcelApp {
    app: DispatchObject,
    /// Main window handle, used to recognize an instance we already track.
    hwnd: i64,
}

struct WorkbookEntry {
    instance: u64,
    object: DispatchObject,
}

/// All instances and workbooks known to this bridge process.
#[derive(Default)]
pub struct Session {
    instances: HashMap<u64, ExcelApp>,
    workbooks: HashMap<u64, WorkbookEntry>,
    next_handle: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            ..Default::default()
        }
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn app(&self, instance: u64) -> Result<&DispatchObject, String> {
        self.instances
            .get(&instance)
            .map(|entry| &entry.app)
            .ok_or_else(|| format!("Unknown instance handle: {instance}"))
    }

    fn workbook(&self, workbook: u64) -> Result<&WorkbookEntry, String> {
        self.workbooks
            .get(&workbook)
            .ok_or_else(|| format!("Unknown workbook handle: {workbook}"))
    }

    fn track_instance(&mut self, app: DispatchObject) -> Result<u64, String> {
        let hwnd = app.get_f64("Hwnd")? as i64;
        if let Some((handle, _)) = self.instances.iter().find(|(_, known)| known.hwnd == hwnd) {
            return Ok(*handle);
        }
        let handle = self.allocate();
        self.instances.insert(handle, ExcelApp { app, hwnd });
        Ok(handle)
    }

    /// Register a workbook object, reusing the handle of one we already track
    /// under the same full name in the same instance.
    fn track_workbook(&mut self, instance: u64, object: DispatchObject) -> Result<u64, String> {
        let full_name = object.get_string("FullName")?;
        for (handle, entry) in &self.workbooks {
            if entry.instance == instance
                && entry
                    .object
                    .get_string("FullName")
                    .is_ok_and(|name| name.eq_ignore_ascii_case(&full_name))
            {
                return Ok(*handle);
            }
        }
        let handle = self.allocate();
        self.workbooks
            .insert(handle, WorkbookEntry { instance, object });
        Ok(handle)
    }

    /// Start a fresh Excel.Application instance.
    pub fn start_instance(&mut self, visible: bool, display_alerts: bool) -> Result<u64, String> {
        let app = DispatchObject::create_from_progid("Excel.Application")?;
        app.set_property("Visible", variant_bool(visible))?;
        app.set_property("DisplayAlerts", variant_bool(display_alerts))?;
        let handle = self.track_instance(app)?;
        eprintln!("[excel-com-bridge] started instance {handle}");
        Ok(handle)
    }

    /// Attach to the Excel instance registered as running, if any, and return
    /// every known instance handle.
    pub fn connect_running(&mut self) -> Result<Vec<u64>, String> {
        if let Some(app) = DispatchObject::get_active("Excel.Application")? {
            let handle = self.track_instance(app)?;
            eprintln!("[excel-com-bridge] attached to running instance {handle}");
        }
        Ok(self.instances.keys().copied().collect())
    }

    /// Liveness probe. A dead instance is forgotten together with its workbooks.
    pub fn probe(&mut self, instance: u64) -> bool {
        let alive = match self.instances.get(&instance) {
            Some(entry) => entry.app.get_property("Hwnd").is_ok(),
            None => false,
        };
        if !alive {
            self.forget_instance(instance);
        }
        alive
    }

    fn forget_instance(&mut self, instance: u64) {
        self.instances.remove(&instance);
        self.workbooks.retain(|_, entry| entry.instance != instance);
    }

    pub fn get_flag(&self, instance: u64, name: &str) -> Result<bool, String> {
        self.app(instance)?.get_bool(name)
    }

    pub fn set_flag(&self, instance: u64, name: &str, value: bool) -> Result<(), String> {
        self.app(instance)?.set_property(name, variant_bool(value))
    }

    pub fn calculation(&self, instance: u64) -> Result<Calculation, String> {
        let app = self.app(instance)?;
        // Excel refuses to report a mode while no workbook is open.
        if app.get_child("Workbooks")?.get_f64("Count")? < 1.0 {
            return Ok(Calculation::Unset);
        }
        match app.get_f64("Calculation")? as i32 {
            XL_CALCULATION_MANUAL => Ok(Calculation::Manual),
            XL_CALCULATION_AUTOMATIC | XL_CALCULATION_SEMIAUTOMATIC => Ok(Calculation::Automatic),
            other => Err(format!("Unknown calculation mode {other}")),
        }
    }

    pub fn set_calculation(&self, instance: u64, mode: Calculation) -> Result<(), String> {
        let value = match mode {
            Calculation::Automatic => XL_CALCULATION_AUTOMATIC,
            Calculation::Manual => XL_CALCULATION_MANUAL,
            Calculation::Unset => return Err("Calculation mode 'unset' cannot be set".to_string()),
        };
        self.app(instance)?
            .set_property("Calculation", variant_i32(value))
    }

    /// List the workbooks open in an instance, including ones opened by a user.
    pub fn list_workbooks(&mut self, instance: u64) -> Result<Vec<WorkbookInfo>, String> {
        let collection = self.app(instance)?.get_child("Workbooks")?;
        let count = collection.get_f64("Count")? as i32;
        let mut handles = Vec::new();
        for index in 1..=count {
            let object = collection.get_indexed("Item", &[variant_i32(index)])?;
            handles.push(self.track_workbook(instance, object)?);
        }
        // Drop handles of workbooks closed behind our back.
        self.workbooks
            .retain(|handle, entry| entry.instance != instance || handles.contains(handle));
        handles.into_iter().map(|h| self.workbook_info(h)).collect()
    }

    pub fn workbook_info(&self, workbook: u64) -> Result<WorkbookInfo, String> {
        let entry = self.workbook(workbook)?;
        Ok(WorkbookInfo {
            workbook,
            instance: entry.instance,
            path: entry.object.get_string("FullName")?,
            read_only: entry.object.get_bool("ReadOnly")?,
        })
    }

    /// Open an existing workbook. Excel hands back the already open workbook
    /// when the same file is open in this instance.
    pub fn open_workbook(&mut self, instance: u64, path: &str, read_only: bool) -> Result<u64, String> {
        let collection = self.app(instance)?.get_child("Workbooks")?;
        // Workbooks.Open(Filename, UpdateLinks, ReadOnly)
        let object = collection.invoke_child(
            "Open",
            &[variant_str(path), variant_i32(0), variant_bool(read_only)],
        )?;
        self.track_workbook(instance, object)
    }

    /// Create a new empty workbook saved at `path`.
    pub fn create_workbook(&mut self, instance: u64, path: &str) -> Result<u64, String> {
        let collection = self.app(instance)?.get_child("Workbooks")?;
        let object = collection.invoke_child("Add", &[])?;
        object.invoke_method("SaveAs", &[variant_str(path), variant_i32(file_format(path))])?;
        self.track_workbook(instance, object)
    }

    pub fn is_saved(&self, workbook: u64) -> Result<bool, String> {
        self.workbook(workbook)?.object.get_bool("Saved")
    }

    fn first_window(&self, workbook: u64) -> Result<DispatchObject, String> {
        self.workbook(workbook)?
            .object
            .get_child("Windows")?
            .get_indexed("Item", &[variant_i32(1)])
    }

    /// Visible when both the workbook's window and its instance are shown.
    pub fn workbook_visible(&self, workbook: u64) -> Result<bool, String> {
        let instance = self.workbook(workbook)?.instance;
        Ok(self.first_window(workbook)?.get_bool("Visible")?
            && self.app(instance)?.get_bool("Visible")?)
    }

    pub fn set_workbook_visible(&self, workbook: u64, visible: bool) -> Result<(), String> {
        let instance = self.workbook(workbook)?.instance;
        if visible {
            self.app(instance)?
                .set_property("Visible", variant_bool(true))?;
        }
        self.first_window(workbook)?
            .set_property("Visible", variant_bool(visible))
    }

    /// Get a worksheet from a workbook.
    fn get_sheet(&self, workbook: u64, sheet: &SheetRef) -> Result<DispatchObject, String> {
        let sheets = self.workbook(workbook)?.object.get_child("Worksheets")?;
        match sheet {
            SheetRef::Index(idx) => {
                // Excel worksheets are 1-based, our protocol uses 0-based
                let excel_index = (*idx as i32) + 1;
                sheets.get_indexed("Item", &[variant_i32(excel_index)])
            }
            SheetRef::Name(name) => sheets.get_indexed("Item", &[variant_str(name)]),
        }
    }

    fn get_cell(&self, workbook: u64, sheet: &SheetRef, row: u32, col: u32) -> Result<DispatchObject, String> {
        let ws = self.get_sheet(workbook, sheet)?;
        ws.get_indexed("Cells", &[variant_i32(row as i32), variant_i32(col as i32)])
    }

    pub fn set_cell_value(
        &self,
        workbook: u64,
        sheet: &SheetRef,
        row: u32,
        col: u32,
        value: &CellValue,
    ) -> Result<(), String> {
        let cell = self.get_cell(workbook, sheet, row, col)?;
        cell.set_property("Value", cell_value_to_variant(value))
    }

    pub fn get_cell_value(&self, workbook: u64, sheet: &SheetRef, row: u32, col: u32) -> Result<CellValue, String> {
        let cell = self.get_cell(workbook, sheet, row, col)?;
        let variant = cell.get_property("Value")?;
        Ok(variant_to_cell_value(&variant))
    }

    /// Save to the workbook's own path. A read-only workbook is written
    /// through SaveAs onto its own path.
    pub fn save_workbook(&self, workbook: u64) -> Result<(), String> {
        let object = &self.workbook(workbook)?.object;
        if object.get_bool("ReadOnly")? {
            let path = object.get_string("FullName")?;
            let format = object.get_f64("FileFormat")? as i32;
            object.invoke_method("SaveAs", &[variant_str(&path), variant_i32(format)])?;
        } else {
            object.invoke_method("Save", &[])?;
        }
        Ok(())
    }

    /// Save under a new path. Format is inferred from the extension.
    pub fn save_workbook_as(&self, workbook: u64, path: &str) -> Result<(), String> {
        let object = &self.workbook(workbook)?.object;
        object.invoke_method("SaveAs", &[variant_str(path), variant_i32(file_format(path))])?;
        Ok(())
    }

    /// Close a workbook without saving.
    pub fn close_workbook(&mut self, workbook: u64) -> Result<(), String> {
        let entry = self
            .workbooks
            .remove(&workbook)
            .ok_or_else(|| format!("Unknown workbook handle: {workbook}"))?;
        entry.object.invoke_method("Close", &[variant_bool(false)])?;
        Ok(())
    }

    /// Close every workbook of an instance without saving and quit it.
    pub fn quit_instance(&mut self, instance: u64) -> Result<(), String> {
        let app = self.app(instance)?.clone();
        let collection = app.get_child("Workbooks")?;
        let count = collection.get_f64("Count")? as i32;
        // Close from the end so indices stay valid.
        for index in (1..=count).rev() {
            let object = collection.get_indexed("Item", &[variant_i32(index)])?;
            object.invoke_method("Close", &[variant_bool(false)])?;
        }
        app.invoke_method("Quit", &[])?;
        self.forget_instance(instance);
        eprintln!("[excel-com-bridge] quit instance {instance}");
        Ok(())
    }

    /// Release every COM reference. Instances keep running.
    pub fn release(&mut self) {
        self.workbooks.clear();
        self.instances.clear();
    }
}

fn file_format(path: &str) -> i32 {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".xls") {
        XL_WORKBOOK_NORMAL
    } else if lower.ends_with(".csv") {
        XL_CSV
    } else {
        XL_OPEN_XML_WORKBOOK
    }
}

/// Convert our protocol CellValue to a COM VARIANT.
fn cell_value_to_variant(value: &CellValue) -> VARIANT {
    match value {
        CellValue::Null => variant_empty(),
        CellValue::Bool(b) => variant_bool(*b),
        CellValue::Number(n) => variant_f64(*n),
        CellValue::String(s) => variant_str(s),
        CellValue::Error(_) => variant_empty(), // Can't set error values
    }
}

/// Convert a COM VARIANT to our protocol CellValue.
fn variant_to_cell_value(variant: &VARIANT) -> CellValue {
    if variant_is_empty(variant) {
        CellValue::Null
    } else if let Some(b) = variant_get_bool(variant) {
        CellValue::Bool(b)
    } else if let Some(n) = variant_get_f64(variant) {
        CellValue::Number(n)
    } else if let Some(s) = variant_get_string(variant) {
        CellValue::String(s)
    } else if variant_is_error(variant) {
        CellValue::Error(CellError {
            code: "#ERR(VT_ERROR)".to_string(),
        })
    } else {
        CellValue::Null
    }
}
