//! Instance registry: which instances are known, which workbooks they hold,
//! and which instance each path was last opened in.
//!
//! Nothing here is trusted without a liveness probe. A probe that fails, or
//! that errors because the process vanished, prunes the instance together
//! with every path association pointing at it.

use std::collections::HashMap;

use crate::automation::{Automation, BookInfo, InstanceId};
use crate::error::Result;
use crate::path::BookPath;

#[derive(Debug, Default)]
pub struct Registry {
    /// Known instances, least recently used first.
    instances: Vec<InstanceId>,
    last_known: HashMap<BookPath, InstanceId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known instances, most recently used first. Not probed.
    pub fn instances(&self) -> Vec<InstanceId> {
        self.instances.iter().rev().copied().collect()
    }

    /// Track `instance` and mark it most recently used.
    pub fn adopt(&mut self, instance: InstanceId) {
        self.instances.retain(|&known| known != instance);
        self.instances.push(instance);
    }

    /// Forget `instance` and every path associated with it.
    pub fn prune(&mut self, instance: InstanceId) {
        self.instances.retain(|&known| known != instance);
        self.last_known.retain(|_, known| *known != instance);
    }

    /// Probe `instance`; prune it if it is dead or the probe itself fails.
    pub fn probe<A: Automation + ?Sized>(&mut self, automation: &A, instance: InstanceId) -> bool {
        match automation.is_alive(instance) {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(%instance, "instance is gone, pruning it");
                self.prune(instance);
                false
            }
            Err(e) => {
                tracing::warn!(%instance, error = %e, "liveness probe failed, pruning instance");
                self.prune(instance);
                false
            }
        }
    }

    /// Known live instances, most recently used first.
    pub fn live_instances<A: Automation + ?Sized>(&mut self, automation: &A) -> Vec<InstanceId> {
        self.instances()
            .into_iter()
            .filter(|&instance| self.probe(automation, instance))
            .collect()
    }

    /// Adopt instances the host reports as running that are not known yet.
    /// They rank below every known instance.
    pub fn discover<A: Automation + ?Sized>(&mut self, automation: &A) {
        let running = match automation.running_instances() {
            Ok(running) => running,
            Err(e) => {
                tracing::debug!(error = %e, "could not enumerate running instances");
                return;
            }
        };
        for instance in running {
            if !self.instances.contains(&instance) && self.probe(automation, instance) {
                tracing::debug!(%instance, "adopting running instance");
                self.instances.insert(0, instance);
            }
        }
    }

    /// The most recently used live instance. When none is known, adopt
    /// instances the host reports as already running.
    pub fn current<A: Automation + ?Sized>(&mut self, automation: &A) -> Option<InstanceId> {
        if let Some(instance) = self.live_instances(automation).into_iter().next() {
            return Some(instance);
        }
        self.discover(automation);
        self.instances.last().copied()
    }

    /// The workbook open under exactly `path` in any known live instance.
    pub fn find_open_document<A: Automation + ?Sized>(
        &mut self,
        automation: &A,
        path: &BookPath,
    ) -> Result<Option<BookInfo>> {
        for instance in self.live_instances(automation) {
            if let Some(book) = find_in(automation, instance, |other| other == path)? {
                return Ok(Some(book));
            }
        }
        Ok(None)
    }

    /// The workbook open under exactly `path` in `instance`.
    pub fn find_open_document_in<A: Automation + ?Sized>(
        &mut self,
        automation: &A,
        path: &BookPath,
        instance: InstanceId,
    ) -> Result<Option<BookInfo>> {
        if !self.probe(automation, instance) {
            return Ok(None);
        }
        find_in(automation, instance, |other| other == path)
    }

    /// A workbook with the same basename but a different path, in any known
    /// live instance.
    pub fn find_name_collision<A: Automation + ?Sized>(
        &mut self,
        automation: &A,
        path: &BookPath,
    ) -> Result<Option<BookInfo>> {
        for instance in self.live_instances(automation) {
            if let Some(book) = find_in(automation, instance, |other| path.collides_with(other))? {
                return Ok(Some(book));
            }
        }
        Ok(None)
    }

    /// A workbook with the same basename but a different path in `instance`.
    pub fn find_name_collision_in<A: Automation + ?Sized>(
        &mut self,
        automation: &A,
        path: &BookPath,
        instance: InstanceId,
    ) -> Result<Option<BookInfo>> {
        if !self.probe(automation, instance) {
            return Ok(None);
        }
        find_in(automation, instance, |other| path.collides_with(other))
    }

    /// The instance `path` was last opened in, if it is still alive.
    pub fn last_known_instance<A: Automation + ?Sized>(
        &mut self,
        automation: &A,
        path: &BookPath,
    ) -> Option<InstanceId> {
        let instance = *self.last_known.get(path)?;
        if self.probe(automation, instance) {
            Some(instance)
        } else {
            None
        }
    }

    /// Associate `path` with `instance`, replacing any earlier association.
    pub fn record(&mut self, path: BookPath, instance: InstanceId) {
        self.adopt(instance);
        self.last_known.insert(path, instance);
    }
}

fn find_in<A, F>(automation: &A, instance: InstanceId, matches: F) -> Result<Option<BookInfo>>
where
    A: Automation + ?Sized,
    F: Fn(&BookPath) -> bool,
{
    for book in automation.books(instance)? {
        let book_path = BookPath::new(&book.path)?;
        if matches(&book_path) {
            return Ok(Some(book));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    fn fixture(dir: &std::path::Path, name: &str) -> BookPath {
        let path = dir.join(name);
        MemoryHost::write_workbook_file(&path, &[]).unwrap();
        BookPath::new(path).unwrap()
    }

    #[test]
    fn test_adopt_orders_by_recency() {
        let mut registry = Registry::new();
        registry.adopt(InstanceId(1));
        registry.adopt(InstanceId(2));
        registry.adopt(InstanceId(1));
        assert_eq!(registry.instances(), vec![InstanceId(1), InstanceId(2)]);
    }

    #[test]
    fn test_find_open_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path(), "a.xls");
        let host = MemoryHost::new();
        let mut registry = Registry::new();

        let app = host.start_instance(false, false).unwrap();
        registry.adopt(app);
        assert!(registry.find_open_document(&host, &path).unwrap().is_none());

        let book = host.open_book(app, path.as_path(), false).unwrap();
        let found = registry.find_open_document(&host, &path).unwrap().unwrap();
        assert_eq!(found.id, book);
        assert_eq!(found.instance, app);
    }

    #[test]
    fn test_dead_instance_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path(), "a.xls");
        let host = MemoryHost::new();
        let mut registry = Registry::new();

        let app = host.start_instance(false, false).unwrap();
        host.open_book(app, path.as_path(), false).unwrap();
        registry.record(path.clone(), app);

        host.kill(app);
        assert!(registry.find_open_document(&host, &path).unwrap().is_none());
        assert!(registry.instances().is_empty());
        assert_eq!(registry.last_known_instance(&host, &path), None);
    }

    #[test]
    fn test_probe_error_counts_as_dead() {
        let host = MemoryHost::new();
        let mut registry = Registry::new();
        let app = host.start_instance(false, false).unwrap();
        registry.adopt(app);

        host.fail_probes(app);
        assert!(!registry.probe(&host, app));
        assert!(registry.instances().is_empty());
    }

    #[test]
    fn test_name_collision_excludes_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        let a = fixture(dir.path(), "a/report.xls");
        let b = fixture(dir.path(), "b/report.xls");
        let host = MemoryHost::new();
        let mut registry = Registry::new();
        let app = host.start_instance(false, false).unwrap();
        registry.adopt(app);
        host.open_book(app, a.as_path(), false).unwrap();

        assert!(registry.find_name_collision(&host, &a).unwrap().is_none());
        let blocker = registry.find_name_collision(&host, &b).unwrap().unwrap();
        assert_eq!(BookPath::new(&blocker.path).unwrap(), a);
        assert!(registry
            .find_name_collision_in(&host, &b, app)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_last_known_instance_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path(), "a.xls");
        let host = MemoryHost::new();
        let mut registry = Registry::new();
        let first = host.start_instance(false, false).unwrap();
        let second = host.start_instance(false, false).unwrap();

        registry.record(path.clone(), first);
        registry.record(path.clone(), second);
        assert_eq!(registry.last_known_instance(&host, &path), Some(second));
    }

    #[test]
    fn test_discover_ranks_running_instances_last() {
        let host = MemoryHost::new();
        let mut registry = Registry::new();
        let own = host.start_instance(false, false).unwrap();
        registry.adopt(own);
        let external = host.start_external_instance();

        registry.discover(&host);
        registry.discover(&host);
        assert_eq!(registry.instances(), vec![own, external]);
        assert_eq!(registry.current(&host), Some(own));
    }

    #[test]
    fn test_current_adopts_running_instances() {
        let host = MemoryHost::new();
        let external = host.start_external_instance();
        let mut registry = Registry::new();

        assert_eq!(registry.current(&host), Some(external));
        assert_eq!(registry.instances(), vec![external]);
    }
}
