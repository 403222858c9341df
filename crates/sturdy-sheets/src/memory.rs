//! A simulated automation host.
//!
//! `MemoryHost` behaves like a set of Excel instances as far as the policy
//! engine can observe: workbooks are loaded from and saved to real files,
//! unsaved edits live only in memory, an instance refuses to open two
//! workbooks with the same file name, and instances can be killed from
//! "outside" to exercise liveness probing.
//!
//! Workbook files are JSON documents ([`StoredWorkbook`]): a list of sheets,
//! each a list of non-empty cells.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::automation::{Automation, BookId, BookInfo, InstanceId};
use crate::error::{Error, Result};
use crate::{Calculation, CellValue, SheetRef};

/// On-disk representation of a workbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWorkbook {
    pub sheets: Vec<StoredSheet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSheet {
    pub name: String,
    pub cells: Vec<StoredCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCell {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
}

impl Default for StoredWorkbook {
    fn default() -> Self {
        Self {
            sheets: vec![StoredSheet {
                name: "Sheet1".to_string(),
                cells: Vec::new(),
            }],
        }
    }
}

impl StoredWorkbook {
    /// Value of a cell on the first sheet, `Null` if empty.
    pub fn cell(&self, row: u32, col: u32) -> CellValue {
        self.sheets
            .first()
            .and_then(|sheet| {
                sheet
                    .cells
                    .iter()
                    .find(|cell| cell.row == row && cell.col == col)
            })
            .map(|cell| cell.value.clone())
            .unwrap_or(CellValue::Null)
    }
}

/// Grid of a loaded sheet.
#[derive(Debug, Clone)]
struct SheetData {
    name: String,
    cells: BTreeMap<(u32, u32), CellValue>,
}

#[derive(Debug)]
struct InstanceState {
    alive: bool,
    visible: bool,
    display_alerts: bool,
    calculation: Calculation,
    books: Vec<BookId>,
}

#[derive(Debug)]
struct BookState {
    instance: InstanceId,
    path: PathBuf,
    read_only: bool,
    saved: bool,
    window_visible: bool,
    sheets: Vec<SheetData>,
}

#[derive(Debug, Default)]
struct HostState {
    next_id: u64,
    instances: BTreeMap<InstanceId, InstanceState>,
    books: BTreeMap<BookId, BookState>,
    failing_probes: HashSet<InstanceId>,
    started: usize,
}

/// In-process stand-in for the automated spreadsheet application.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<HostState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a workbook file with the given cells on its first sheet.
    pub fn write_workbook_file(path: &Path, cells: &[(u32, u32, CellValue)]) -> Result<()> {
        let mut stored = StoredWorkbook::default();
        stored.sheets[0].cells = cells
            .iter()
            .map(|(row, col, value)| StoredCell {
                row: *row,
                col: *col,
                value: value.clone(),
            })
            .collect();
        write_stored(path, &stored)
    }

    /// Read a workbook file as it currently is on disk.
    pub fn read_workbook_file(path: &Path) -> Result<StoredWorkbook> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| Error::WorkbookFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Simulate an instance started outside this process (e.g. by a user).
    pub fn start_external_instance(&self) -> InstanceId {
        let mut state = self.lock();
        let id = InstanceId(state.allocate());
        state.instances.insert(id, InstanceState::new(true, true));
        id
    }

    /// Simulate the instance's process being killed from outside.
    pub fn kill(&self, instance: InstanceId) {
        let mut state = self.lock();
        if let Some(app) = state.instances.get_mut(&instance) {
            app.alive = false;
            let books = std::mem::take(&mut app.books);
            for book in books {
                state.books.remove(&book);
            }
        }
    }

    /// Make liveness probes of `instance` fail with an error.
    pub fn fail_probes(&self, instance: InstanceId) {
        self.lock().failing_probes.insert(instance);
    }

    /// Number of instances started through [`Automation::start_instance`].
    pub fn started_instances(&self) -> usize {
        self.lock().started
    }

    /// Instances that are currently alive.
    pub fn live_instances(&self) -> Vec<InstanceId> {
        self.lock()
            .instances
            .iter()
            .filter(|(_, app)| app.alive)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of workbooks open across all instances.
    pub fn open_book_count(&self) -> usize {
        self.lock().books.len()
    }
}

impl InstanceState {
    fn new(visible: bool, display_alerts: bool) -> Self {
        Self {
            alive: true,
            visible,
            display_alerts,
            calculation: Calculation::Automatic,
            books: Vec::new(),
        }
    }
}

impl HostState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn instance(&self, id: InstanceId) -> Result<&InstanceState> {
        match self.instances.get(&id) {
            Some(app) if app.alive => Ok(app),
            _ => Err(Error::ObjectNotAlive(format!("{id} is not running"))),
        }
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut InstanceState> {
        match self.instances.get_mut(&id) {
            Some(app) if app.alive => Ok(app),
            _ => Err(Error::ObjectNotAlive(format!("{id} is not running"))),
        }
    }

    fn book(&self, id: BookId) -> Result<&BookState> {
        self.books
            .get(&id)
            .ok_or_else(|| Error::ObjectNotAlive(format!("{id} is closed")))
    }

    fn book_mut(&mut self, id: BookId) -> Result<&mut BookState> {
        self.books
            .get_mut(&id)
            .ok_or_else(|| Error::ObjectNotAlive(format!("{id} is closed")))
    }

    fn info(&self, id: BookId) -> Result<BookInfo> {
        let book = self.book(id)?;
        Ok(BookInfo {
            id,
            instance: book.instance,
            path: book.path.clone(),
            read_only: book.read_only,
        })
    }

    /// Refuse a second workbook with the same file name, as Excel does.
    /// Returns the workbook already open under exactly `path`, if any.
    fn check_open(&self, instance: InstanceId, path: &Path) -> Result<Option<BookId>> {
        let wanted = path_key(path);
        let wanted_name = file_name_key(path);
        for id in &self.instance(instance)?.books {
            let book = self.book(*id)?;
            if path_key(&book.path) == wanted {
                return Ok(Some(*id));
            }
            if file_name_key(&book.path) == wanted_name {
                return Err(Error::automation(format!(
                    "a workbook named '{}' is already open in {instance}",
                    book.path.display()
                )));
            }
        }
        Ok(None)
    }

    fn insert_book(
        &mut self,
        instance: InstanceId,
        path: &Path,
        read_only: bool,
        stored: StoredWorkbook,
    ) -> Result<BookId> {
        self.instance(instance)?;
        let id = BookId(self.allocate());
        self.books.insert(
            id,
            BookState {
                instance,
                path: path.to_path_buf(),
                read_only,
                saved: true,
                window_visible: true,
                sheets: stored.sheets.into_iter().map(SheetData::from).collect(),
            },
        );
        self.instance_mut(instance)?.books.push(id);
        Ok(id)
    }
}

impl From<StoredSheet> for SheetData {
    fn from(sheet: StoredSheet) -> Self {
        Self {
            name: sheet.name,
            cells: sheet
                .cells
                .into_iter()
                .map(|cell| ((cell.row, cell.col), cell.value))
                .collect(),
        }
    }
}

impl BookState {
    fn stored(&self) -> StoredWorkbook {
        StoredWorkbook {
            sheets: self
                .sheets
                .iter()
                .map(|sheet| StoredSheet {
                    name: sheet.name.clone(),
                    cells: sheet
                        .cells
                        .iter()
                        .map(|(&(row, col), value)| StoredCell {
                            row,
                            col,
                            value: value.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn sheet(&self, sheet: &SheetRef) -> Result<&SheetData> {
        let found = match sheet {
            SheetRef::Index(idx) => self.sheets.get(*idx as usize),
            SheetRef::Name(name) => self
                .sheets
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(name)),
        };
        found.ok_or_else(|| Error::automation(format!("no sheet {sheet:?} in {}", self.path.display())))
    }

    fn sheet_mut(&mut self, sheet: &SheetRef) -> Result<&mut SheetData> {
        let path = self.path.clone();
        let found = match sheet {
            SheetRef::Index(idx) => self.sheets.get_mut(*idx as usize),
            SheetRef::Name(name) => self
                .sheets
                .iter_mut()
                .find(|s| s.name.eq_ignore_ascii_case(name)),
        };
        found.ok_or_else(|| Error::automation(format!("no sheet {sheet:?} in {}", path.display())))
    }
}

fn write_stored(path: &Path, stored: &StoredWorkbook) -> Result<()> {
    let json = serde_json::to_string_pretty(stored).map_err(|source| Error::WorkbookFormat {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json)?;
    Ok(())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn file_name_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

impl Automation for MemoryHost {
    fn start_instance(&self, visible: bool, display_alerts: bool) -> Result<InstanceId> {
        let mut state = self.lock();
        let id = InstanceId(state.allocate());
        state
            .instances
            .insert(id, InstanceState::new(visible, display_alerts));
        state.started += 1;
        Ok(id)
    }

    fn running_instances(&self) -> Result<Vec<InstanceId>> {
        Ok(self.live_instances())
    }

    fn is_alive(&self, instance: InstanceId) -> Result<bool> {
        let state = self.lock();
        if state.failing_probes.contains(&instance) {
            return Err(Error::automation(format!(
                "RPC server unavailable while probing {instance}"
            )));
        }
        Ok(state.instances.get(&instance).is_some_and(|app| app.alive))
    }

    fn visible(&self, instance: InstanceId) -> Result<bool> {
        Ok(self.lock().instance(instance)?.visible)
    }

    fn set_visible(&self, instance: InstanceId, visible: bool) -> Result<()> {
        self.lock().instance_mut(instance)?.visible = visible;
        Ok(())
    }

    fn display_alerts(&self, instance: InstanceId) -> Result<bool> {
        Ok(self.lock().instance(instance)?.display_alerts)
    }

    fn set_display_alerts(&self, instance: InstanceId, display_alerts: bool) -> Result<()> {
        self.lock().instance_mut(instance)?.display_alerts = display_alerts;
        Ok(())
    }

    fn calculation(&self, instance: InstanceId) -> Result<Calculation> {
        let state = self.lock();
        let app = state.instance(instance)?;
        // Excel only reports a mode while a workbook is open.
        if app.books.is_empty() {
            Ok(Calculation::Unset)
        } else {
            Ok(app.calculation)
        }
    }

    fn set_calculation(&self, instance: InstanceId, mode: Calculation) -> Result<()> {
        if mode == Calculation::Unset {
            return Err(Error::option("calculation mode cannot be set to unset"));
        }
        self.lock().instance_mut(instance)?.calculation = mode;
        Ok(())
    }

    fn books(&self, instance: InstanceId) -> Result<Vec<BookInfo>> {
        let state = self.lock();
        let books: Result<Vec<BookInfo>> = state
            .instance(instance)?
            .books
            .iter()
            .map(|id| state.info(*id))
            .collect();
        books
    }

    fn book_info(&self, book: BookId) -> Result<BookInfo> {
        self.lock().info(book)
    }

    fn open_book(&self, instance: InstanceId, path: &Path, read_only: bool) -> Result<BookId> {
        let mut state = self.lock();
        if let Some(existing) = state.check_open(instance, path)? {
            return Ok(existing);
        }
        if !path.is_file() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let stored = Self::read_workbook_file(path)?;
        state.insert_book(instance, path, read_only, stored)
    }

    fn create_book(&self, instance: InstanceId, path: &Path) -> Result<BookId> {
        let mut state = self.lock();
        if state.check_open(instance, path)?.is_some() {
            return Err(Error::automation(format!(
                "{} is already open",
                path.display()
            )));
        }
        let stored = StoredWorkbook::default();
        write_stored(path, &stored)?;
        state.insert_book(instance, path, false, stored)
    }

    fn is_saved(&self, book: BookId) -> Result<bool> {
        Ok(self.lock().book(book)?.saved)
    }

    fn book_visible(&self, book: BookId) -> Result<bool> {
        let state = self.lock();
        let book = state.book(book)?;
        let instance_visible = state.instance(book.instance)?.visible;
        Ok(book.window_visible && instance_visible)
    }

    fn set_book_visible(&self, book: BookId, visible: bool) -> Result<()> {
        let mut state = self.lock();
        let book = state.book_mut(book)?;
        book.window_visible = visible;
        let instance = book.instance;
        if visible {
            state.instance_mut(instance)?.visible = true;
        }
        Ok(())
    }

    fn read_cell(&self, book: BookId, sheet: &SheetRef, row: u32, col: u32) -> Result<CellValue> {
        let state = self.lock();
        let data = state.book(book)?.sheet(sheet)?;
        Ok(data.cells.get(&(row, col)).cloned().unwrap_or(CellValue::Null))
    }

    fn write_cell(
        &self,
        book: BookId,
        sheet: &SheetRef,
        row: u32,
        col: u32,
        value: CellValue,
    ) -> Result<()> {
        let mut state = self.lock();
        let book = state.book_mut(book)?;
        let data = book.sheet_mut(sheet)?;
        if value.is_null() {
            data.cells.remove(&(row, col));
        } else {
            data.cells.insert((row, col), value);
        }
        book.saved = false;
        Ok(())
    }

    // Read-only workbooks are written too; the COM bridge does the same
    // through SaveAs onto the workbook's own path.
    fn save(&self, book: BookId) -> Result<()> {
        let mut state = self.lock();
        let book = state.book_mut(book)?;
        write_stored(&book.path, &book.stored())?;
        book.saved = true;
        Ok(())
    }

    fn save_as(&self, book: BookId, path: &Path) -> Result<()> {
        let mut state = self.lock();
        let instance = state.book(book)?.instance;
        let wanted = path_key(path);
        let wanted_name = file_name_key(path);
        for other in &state.instance(instance)?.books {
            if *other == book {
                continue;
            }
            let other_path = &state.book(*other)?.path;
            if path_key(other_path) == wanted || file_name_key(other_path) == wanted_name {
                return Err(Error::automation(format!(
                    "cannot save over '{}': a workbook with that name is open",
                    other_path.display()
                )));
            }
        }
        let state_book = state.book_mut(book)?;
        write_stored(path, &state_book.stored())?;
        state_book.path = path.to_path_buf();
        state_book.read_only = false;
        state_book.saved = true;
        Ok(())
    }

    fn close_book(&self, book: BookId) -> Result<()> {
        let mut state = self.lock();
        let closed = state
            .books
            .remove(&book)
            .ok_or_else(|| Error::ObjectNotAlive(format!("{book} is closed")))?;
        if let Some(app) = state.instances.get_mut(&closed.instance) {
            app.books.retain(|id| *id != book);
        }
        Ok(())
    }

    fn quit(&self, instance: InstanceId) -> Result<()> {
        let mut state = self.lock();
        let app = state.instance_mut(instance)?;
        app.alive = false;
        let books = std::mem::take(&mut app.books);
        for book in books {
            state.books.remove(&book);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_open_edit_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xls");
        MemoryHost::write_workbook_file(&path, &[(1, 1, CellValue::from("old"))]).unwrap();

        let host = MemoryHost::new();
        let app = host.start_instance(false, false).unwrap();
        let book = host.open_book(app, &path, false).unwrap();
        assert_eq!(
            host.read_cell(book, &SheetRef::Index(0), 1, 1).unwrap(),
            CellValue::from("old")
        );

        host.write_cell(book, &SheetRef::Index(0), 1, 1, "new".into())
            .unwrap();
        assert!(!host.is_saved(book).unwrap());
        assert_eq!(
            MemoryHost::read_workbook_file(&path).unwrap().cell(1, 1),
            CellValue::from("old")
        );

        host.save(book).unwrap();
        assert!(host.is_saved(book).unwrap());
        assert_eq!(
            MemoryHost::read_workbook_file(&path).unwrap().cell(1, 1),
            CellValue::from("new")
        );
    }

    #[test]
    fn test_same_name_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        let a = dir.path().join("a").join("same.xls");
        let b = dir.path().join("b").join("same.xls");
        MemoryHost::write_workbook_file(&a, &[]).unwrap();
        MemoryHost::write_workbook_file(&b, &[]).unwrap();

        let host = MemoryHost::new();
        let app = host.start_instance(false, false).unwrap();
        let first = host.open_book(app, &a, false).unwrap();
        assert_eq!(host.open_book(app, &a, true).unwrap(), first);
        assert!(matches!(
            host.open_book(app, &b, false),
            Err(Error::Automation(_))
        ));

        let other = host.start_instance(false, false).unwrap();
        assert!(host.open_book(other, &b, false).is_ok());
    }

    #[test]
    fn test_kill_and_probe() {
        let host = MemoryHost::new();
        let app = host.start_instance(false, false).unwrap();
        assert!(host.is_alive(app).unwrap());
        host.kill(app);
        assert!(!host.is_alive(app).unwrap());
        assert!(matches!(host.books(app), Err(Error::ObjectNotAlive(_))));
    }

    #[test]
    fn test_calculation_unset_without_books() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calc.xls");
        let host = MemoryHost::new();
        let app = host.start_instance(false, false).unwrap();
        host.set_calculation(app, Calculation::Manual).unwrap();
        assert_eq!(host.calculation(app).unwrap(), Calculation::Unset);

        host.create_book(app, &path).unwrap();
        assert_eq!(host.calculation(app).unwrap(), Calculation::Manual);
    }

    #[test]
    fn test_book_visibility_follows_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vis.xls");
        let host = MemoryHost::new();
        let app = host.start_instance(false, false).unwrap();
        let book = host.create_book(app, &path).unwrap();

        assert!(!host.book_visible(book).unwrap());
        host.set_book_visible(book, true).unwrap();
        assert!(host.visible(app).unwrap());
        assert!(host.book_visible(book).unwrap());
    }

    #[test]
    fn test_external_instance_is_running_but_not_started() {
        let host = MemoryHost::new();
        let external = host.start_external_instance();
        assert_eq!(host.running_instances().unwrap(), vec![external]);
        assert_eq!(host.started_instances(), 0);
    }
}
