//! The keeper: owns the automation backend and the registry, and decides
//! which instance and workbook a request ends up with.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::automation::{Automation, BookInfo, InstanceId};
use crate::book::Book;
use crate::error::{Error, Result};
use crate::excel::Excel;
use crate::options::{
    AcquireOptions, CloseMode, ExcelOptions, ExcelSelector, IfAbsent, Target,
};
use crate::path::BookPath;
use crate::registry::Registry;
use crate::resolver::{self, Resolution};

/// Session object for robust workbook access.
///
/// Construct one per process (or per backend) and acquire workbooks through
/// it. Handles ([`Book`], [`Excel`]) borrow the keeper, so any number of them
/// can be alive at once.
pub struct Keeper<A: Automation> {
    automation: A,
    registry: Mutex<Registry>,
    excel_options: ExcelOptions,
}

impl<A: Automation> Keeper<A> {
    /// Create a keeper starting invisible, alert-free instances when needed.
    pub fn new(automation: A) -> Self {
        Self::with_options(automation, ExcelOptions::default())
    }

    /// Create a keeper applying `excel_options` to every instance it starts.
    pub fn with_options(automation: A, excel_options: ExcelOptions) -> Self {
        Self {
            automation,
            registry: Mutex::new(Registry::new()),
            excel_options,
        }
    }

    /// The automation backend.
    pub fn automation(&self) -> &A {
        &self.automation
    }

    /// Give up the keeper and return its backend, e.g. to shut a bridge down.
    pub fn into_automation(self) -> A {
        self.automation
    }

    pub fn excel_options(&self) -> &ExcelOptions {
        &self.excel_options
    }

    // Never hold the guard across another call into the keeper.
    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle for an instance. Not probed; see [`Excel::is_alive`].
    pub fn excel(&self, instance: InstanceId) -> Excel<'_, A> {
        Excel::new(self, instance)
    }

    /// Start a fresh instance with the keeper's [`ExcelOptions`].
    pub fn start_excel(&self) -> Result<Excel<'_, A>> {
        let instance = self.start_instance(None)?;
        Ok(self.excel(instance))
    }

    /// The most recently used live instance, adopting already running ones
    /// if none is known.
    pub fn current_excel(&self) -> Option<Excel<'_, A>> {
        let current = self.registry().current(&self.automation);
        current.map(|instance| self.excel(instance))
    }

    /// Known live instances, most recently used first.
    pub fn excel_instances(&self) -> Vec<Excel<'_, A>> {
        let live = self.registry().live_instances(&self.automation);
        live.into_iter().map(|instance| self.excel(instance)).collect()
    }

    /// The workbook open under `path` in any known instance.
    pub fn find_open_book(&self, path: impl AsRef<Path>) -> Result<Option<Book<'_, A>>> {
        let path = BookPath::new(path)?;
        let mut registry = self.registry();
        registry.discover(&self.automation);
        let found = registry.find_open_document(&self.automation, &path)?;
        drop(registry);
        Ok(found.map(|info| Book::new(self, info.id, info.instance, path)))
    }

    /// A different open workbook with the same file name as `path`.
    pub fn find_blocking_book(&self, path: impl AsRef<Path>) -> Result<Option<Book<'_, A>>> {
        let path = BookPath::new(path)?;
        let mut registry = self.registry();
        registry.discover(&self.automation);
        let found = registry.find_name_collision(&self.automation, &path)?;
        drop(registry);
        found.map(|info| Book::from_info(self, info)).transpose()
    }

    /// Close every known instance according to `mode`.
    pub fn close_all(&self, mode: CloseMode) -> Result<()> {
        for excel in self.excel_instances() {
            excel.close(mode)?;
        }
        Ok(())
    }

    /// Acquire the workbook at `path`.
    ///
    /// Reuses a workbook that is already open when the options allow it,
    /// applies the `if_unsaved` policy to an open workbook with unsaved
    /// changes and the `if_obstructed` policy to a same-named workbook.
    /// Instances started outside this keeper are taken into account. With an
    /// explicit or forced instance only a same-named workbook in that
    /// instance obstructs; otherwise one in any known instance does. See
    /// [`AcquireOptions`] for instance selection.
    pub fn acquire(
        &self,
        path: impl AsRef<Path>,
        options: &AcquireOptions,
    ) -> Result<Book<'_, A>> {
        let (path, exists) = validate(path.as_ref(), options.if_absent)?;
        let target = options.target();
        tracing::debug!(path = %path, ?target, "acquiring workbook");
        self.registry().discover(&self.automation);

        let existing = match target {
            Target::Pinned(instance) => {
                self.ensure_alive(instance)?;
                self.registry()
                    .find_open_document_in(&self.automation, &path, instance)?
            }
            Target::Forced(ExcelSelector::Current) => {
                let current = self.registry().current(&self.automation);
                match current {
                    Some(instance) => self.registry().find_open_document_in(
                        &self.automation,
                        &path,
                        instance,
                    )?,
                    None => None,
                }
            }
            Target::Forced(_) => None,
            Target::Default(_) => self
                .registry()
                .find_open_document(&self.automation, &path)?,
        };

        if let Some(info) = existing {
            return self.reuse(info, &path, options);
        }

        let mut instance = self.resolve_instance(&path, target, options.visible)?;
        let blocker = match target {
            Target::Default(_) => self
                .registry()
                .find_name_collision(&self.automation, &path)?,
            Target::Pinned(_) | Target::Forced(_) => self
                .registry()
                .find_name_collision_in(&self.automation, &path, instance)?,
        };
        if let Some(blocker) = blocker {
            let resolution = resolver::resolve_obstruction(
                &self.automation,
                options.if_obstructed,
                &blocker,
                path.as_path(),
            )?;
            if resolution == Resolution::UseNewInstance {
                instance = self.start_instance(options.visible)?;
            }
        }

        self.open_in(
            instance,
            &path,
            exists,
            options.read_only.unwrap_or(false),
            options.visible,
        )
    }

    /// Continue with a workbook that is already open under the requested path.
    fn reuse(
        &self,
        info: BookInfo,
        path: &BookPath,
        options: &AcquireOptions,
    ) -> Result<Book<'_, A>> {
        let automation = &self.automation;
        let read_only = options.read_only.unwrap_or(info.read_only);

        if !automation.is_saved(info.id)? {
            return match resolver::resolve_unsaved(automation, options.if_unsaved, &info)? {
                Resolution::ReturnExisting => {
                    self.registry().record(path.clone(), info.instance);
                    Ok(Book::new(self, info.id, info.instance, path.clone()))
                }
                Resolution::Proceed => {
                    self.open_in(info.instance, path, true, read_only, options.visible)
                }
                Resolution::UseNewInstance => {
                    let instance = self.start_instance(options.visible)?;
                    self.open_in(instance, path, true, read_only, options.visible)
                }
            };
        }

        if read_only != info.read_only {
            tracing::debug!(path = %path, read_only, "reopening to change access mode");
            automation.close_book(info.id)?;
            return self.open_in(info.instance, path, true, read_only, options.visible);
        }

        if let Some(visible) = options.visible {
            automation.set_book_visible(info.id, visible)?;
        }
        self.registry().record(path.clone(), info.instance);
        Ok(Book::new(self, info.id, info.instance, path.clone()))
    }

    /// Pick the instance for a workbook that is not open there yet.
    fn resolve_instance(
        &self,
        path: &BookPath,
        target: Target,
        visible: Option<bool>,
    ) -> Result<InstanceId> {
        match target {
            Target::Pinned(instance) => Ok(instance),
            Target::Forced(selector) => self.select(selector, visible),
            Target::Default(selector) => {
                let last = self
                    .registry()
                    .last_known_instance(&self.automation, path);
                match last {
                    Some(instance) => {
                        tracing::debug!(path = %path, %instance, "reopening in last known instance");
                        Ok(instance)
                    }
                    None => self.select(selector, visible),
                }
            }
        }
    }

    fn select(&self, selector: ExcelSelector, visible: Option<bool>) -> Result<InstanceId> {
        match selector {
            ExcelSelector::New => self.start_instance(visible),
            ExcelSelector::Current => {
                let current = self.registry().current(&self.automation);
                match current {
                    Some(instance) => Ok(instance),
                    None => self.start_instance(visible),
                }
            }
            ExcelSelector::Instance(instance) => {
                self.ensure_alive(instance)?;
                Ok(instance)
            }
        }
    }

    pub(crate) fn ensure_alive(&self, instance: InstanceId) -> Result<()> {
        let mut registry = self.registry();
        if registry.probe(&self.automation, instance) {
            registry.adopt(instance);
            Ok(())
        } else {
            Err(Error::ObjectNotAlive(format!("{instance} is not running")))
        }
    }

    /// Start an instance, overriding the configured visibility if asked.
    pub(crate) fn start_instance(&self, visible: Option<bool>) -> Result<InstanceId> {
        let options = self.excel_options;
        let visible = visible.unwrap_or(options.visible);
        let instance = self
            .automation
            .start_instance(visible, options.display_alerts)?;
        if let Some(mode) = options.calculation {
            self.automation.set_calculation(instance, mode)?;
        }
        tracing::info!(%instance, visible, "started instance");
        self.registry().adopt(instance);
        Ok(instance)
    }

    /// Open (or create) `path` in `instance` and record the association.
    pub(crate) fn open_in(
        &self,
        instance: InstanceId,
        path: &BookPath,
        exists: bool,
        read_only: bool,
        visible: Option<bool>,
    ) -> Result<Book<'_, A>> {
        let automation = &self.automation;
        let id = if exists {
            automation.open_book(instance, path.as_path(), read_only)?
        } else {
            tracing::info!(path = %path, %instance, "creating workbook");
            let created = automation.create_book(instance, path.as_path())?;
            if read_only {
                automation.close_book(created)?;
                automation.open_book(instance, path.as_path(), true)?
            } else {
                created
            }
        };
        if let Some(visible) = visible {
            automation.set_book_visible(id, visible)?;
        }
        tracing::info!(path = %path, %instance, read_only, "opened workbook");
        self.registry().record(path.clone(), instance);
        Ok(Book::new(self, id, instance, path.clone()))
    }
}

/// Normalize `path` and check it names a file, or may be created.
/// Returns whether the file exists.
pub(crate) fn validate(path: &Path, if_absent: IfAbsent) -> Result<(BookPath, bool)> {
    let book_path = BookPath::new(path)?;
    let on_disk = book_path.as_path();
    if on_disk.is_dir() {
        return Err(Error::FileIsDirectory(on_disk.to_path_buf()));
    }
    if on_disk.is_file() {
        return Ok((book_path, true));
    }
    match if_absent {
        IfAbsent::Raise => Err(Error::FileNotFound(on_disk.to_path_buf())),
        IfAbsent::Create => Ok((book_path, false)),
    }
}
