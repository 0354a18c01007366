#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::{json, Value};

use glossa::{
    EnumerationError, ItemError, ItemExecutor, ItemId, JobKind, ProjectId, TaskKind,
    WorkEnumerator,
};

/// Items without an explicit term count extract this many terms.
pub const DEFAULT_TERMS: u64 = 3;

/// Projects and chapters held in memory.
#[derive(Default)]
pub struct FakeLibrary {
    projects: Mutex<HashMap<ProjectId, Vec<ItemId>>>,
    broken_projects: Mutex<HashMap<ProjectId, String>>,
    panicking_projects: Mutex<HashSet<ProjectId>>,
    failing_items: Mutex<HashMap<ItemId, String>>,
    gates: Mutex<HashMap<ItemId, Receiver<()>>>,
    releases: Mutex<HashMap<ItemId, Sender<()>>>,
    calls: Mutex<Vec<(ItemId, TaskKind)>>,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, project_id: ProjectId, items: &[ItemId]) -> Self {
        self.projects
            .lock()
            .unwrap()
            .insert(project_id, items.to_vec());
        self
    }

    /// Enumeration of this project fails.
    pub fn with_broken_project(self, project_id: ProjectId, error: &str) -> Self {
        self.projects.lock().unwrap().entry(project_id).or_default();
        self.broken_projects
            .lock()
            .unwrap()
            .insert(project_id, error.to_string());
        self
    }

    /// Enumeration of this project panics.
    pub fn with_panicking_project(self, project_id: ProjectId) -> Self {
        self.projects.lock().unwrap().entry(project_id).or_default();
        self.panicking_projects.lock().unwrap().insert(project_id);
        self
    }

    pub fn with_failing_item(self, item_id: ItemId, error: &str) -> Self {
        self.failing_items
            .lock()
            .unwrap()
            .insert(item_id, error.to_string());
        self
    }

    /// Execution of `item_id` blocks until `release(item_id)` is called.
    pub fn hold(&self, item_id: ItemId) {
        let (tx, rx) = bounded(1);
        self.gates.lock().unwrap().insert(item_id, rx);
        self.releases.lock().unwrap().insert(item_id, tx);
    }

    pub fn release(&self, item_id: ItemId) {
        if let Some(tx) = self.releases.lock().unwrap().remove(&item_id) {
            let _ = tx.send(());
        }
    }

    /// Item ids passed to the executor, in call order.
    pub fn executed(&self) -> Vec<ItemId> {
        self.calls.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn calls(&self) -> Vec<(ItemId, TaskKind)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_started(&self, item_id: ItemId) -> bool {
        self.executed().contains(&item_id)
    }

    fn all_items(&self) -> HashSet<ItemId> {
        self.projects
            .lock()
            .unwrap()
            .values()
            .flatten()
            .copied()
            .collect()
    }
}

impl WorkEnumerator for FakeLibrary {
    fn project_exists(&self, project_id: ProjectId) -> bool {
        self.projects.lock().unwrap().contains_key(&project_id)
    }

    fn item_exists(&self, item_id: ItemId) -> bool {
        self.all_items().contains(&item_id)
    }

    fn enumerate(
        &self,
        project_id: ProjectId,
        _kind: JobKind,
    ) -> Result<Vec<ItemId>, EnumerationError> {
        let panics = self.panicking_projects.lock().unwrap().contains(&project_id);
        if panics {
            panic!("chapter index for project {} is corrupted", project_id);
        }
        if let Some(error) = self.broken_projects.lock().unwrap().get(&project_id) {
            return Err(EnumerationError::new(error.clone()));
        }
        Ok(self
            .projects
            .lock()
            .unwrap()
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl ItemExecutor for FakeLibrary {
    fn execute(&self, item_id: ItemId, kind: TaskKind) -> Result<Value, ItemError> {
        self.calls.lock().unwrap().push((item_id, kind));

        let gate = self.gates.lock().unwrap().remove(&item_id);
        if let Some(rx) = gate {
            rx.recv_timeout(Duration::from_secs(10))
                .expect("gated item was never released");
        }

        if let Some(error) = self.failing_items.lock().unwrap().get(&item_id) {
            return Err(ItemError::new(error.clone()));
        }
        Ok(json!({ "itemId": item_id, "termsExtracted": DEFAULT_TERMS }))
    }
}
