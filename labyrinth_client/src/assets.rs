//! Asset loading.
//!
//! Mesh collections are fetched in the background, one tokio task per issued
//! load task. Completions come back over a channel and are applied on the
//! client loop by [`AssetLoadCoordinator::apply`], which keeps a
//! completed/total barrier counter. The completion callback runs once, after
//! the last task succeeds; any failure suppresses it for good.
//!
//! Every successful task must yield one named sub-mesh, which is registered
//! as a disabled template ([`Prefab`]) for later instancing.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use labyrinth_shared::level::CorridorKind;

/// One mesh inside a loaded collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedMesh {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Result of loading one asset file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshCollection {
    pub meshes: Vec<LoadedMesh>,
}

/// Supplies mesh collections by `(base, file_name)`.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, base: &str, file_name: &str) -> anyhow::Result<MeshCollection>;
}

/// Reads JSON mesh collections from a directory.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetSource for DirAssetSource {
    async fn fetch(&self, base: &str, file_name: &str) -> anyhow::Result<MeshCollection> {
        let path = self.root.join(base).join(file_name);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }
}

/// In-memory asset source.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetSource {
    files: HashMap<String, MeshCollection>,
    failing: HashSet<String>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source serving every file of [`standard_manifest`].
    pub fn standard() -> Self {
        let mut source = Self::new();
        for (_, asset) in standard_manifest() {
            let prefab = asset.prefab;
            let mesh = LoadedMesh {
                id: format!("{}_root", prefab.mesh_name()),
                name: prefab.mesh_name().to_string(),
                children: vec![format!("{}_part0", prefab.mesh_name())],
            };
            // The player model is looked up by name, everything else by id.
            let mesh = match prefab.lookup() {
                MeshLookup::ById => LoadedMesh {
                    id: prefab.mesh_name().to_string(),
                    ..mesh
                },
                MeshLookup::ByName => mesh,
            };
            source = source.with_file(&asset.file_name, MeshCollection { meshes: vec![mesh] });
        }
        source
    }

    pub fn with_file(mut self, file_name: &str, collection: MeshCollection) -> Self {
        self.files.insert(file_name.to_string(), collection);
        self
    }

    /// Makes every fetch of `file_name` fail.
    pub fn with_failure(mut self, file_name: &str) -> Self {
        self.failing.insert(file_name.to_string());
        self
    }
}

#[async_trait]
impl AssetSource for MemoryAssetSource {
    async fn fetch(&self, _base: &str, file_name: &str) -> anyhow::Result<MeshCollection> {
        if self.failing.contains(file_name) {
            anyhow::bail!("simulated failure for {file_name}");
        }
        self.files
            .get(file_name)
            .cloned()
            .with_context(|| format!("no such asset {file_name}"))
    }
}

/// How a prefab's root mesh is found inside its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshLookup {
    ById,
    ByName,
}

/// Stable prefab names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrefabId {
    Pickup,
    Player,
    Corridor,
    Corridor4,
    CorridorT,
    CorridorL,
}

impl PrefabId {
    /// Mesh identifier inside the asset file.
    pub fn mesh_name(self) -> &'static str {
        match self {
            PrefabId::Pickup => "Barrel_WideS",
            PrefabId::Player => "YBot",
            PrefabId::Corridor => "Corridor",
            PrefabId::Corridor4 => "Corridor4",
            PrefabId::CorridorT => "CorridorT",
            PrefabId::CorridorL => "CorridorL",
        }
    }

    pub fn lookup(self) -> MeshLookup {
        match self {
            PrefabId::Player => MeshLookup::ByName,
            _ => MeshLookup::ById,
        }
    }

    pub fn for_corridor(kind: CorridorKind) -> Self {
        match kind {
            CorridorKind::Corridor => PrefabId::Corridor,
            CorridorKind::Corridor4 => PrefabId::Corridor4,
            CorridorKind::CorridorT => PrefabId::CorridorT,
            CorridorKind::CorridorL => PrefabId::CorridorL,
        }
    }

    /// Finds and registers this prefab's root mesh.
    pub fn extract(self, collection: &MeshCollection) -> Option<Prefab> {
        let name = self.mesh_name();
        let mesh = collection.meshes.iter().find(|m| match self.lookup() {
            MeshLookup::ById => m.id == name,
            MeshLookup::ByName => m.name == name,
        })?;
        Some(Prefab {
            id: self,
            mesh_id: mesh.id.clone(),
            hidden_children: mesh.children.clone(),
            enabled: false,
        })
    }
}

impl std::fmt::Display for PrefabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mesh_name())
    }
}

/// Template mesh. Disabled, with its children hidden; only instances render.
#[derive(Debug, Clone, PartialEq)]
pub struct Prefab {
    pub id: PrefabId,
    pub mesh_id: String,
    pub hidden_children: Vec<String>,
    pub enabled: bool,
}

/// Registered prefabs.
#[derive(Debug, Clone, Default)]
pub struct PrefabLibrary {
    prefabs: BTreeMap<PrefabId, Prefab>,
}

impl PrefabLibrary {
    pub fn get(&self, id: PrefabId) -> Option<&Prefab> {
        self.prefabs.get(&id)
    }

    /// Like [`get`](Self::get), but a missing prefab is an [`AssetError`].
    pub fn require(&self, id: PrefabId) -> Result<&Prefab, AssetError> {
        self.get(id).ok_or(AssetError::UnresolvedPrefab {
            task: None,
            prefab: id,
        })
    }

    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }

    fn insert(&mut self, prefab: Prefab) {
        self.prefabs.insert(prefab.id, prefab);
    }
}

/// Asset loading errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("asset task {task} failed: {reason}")]
    LoadFailure { task: String, reason: String },
    #[error("prefab {prefab} not found (task {task:?})")]
    UnresolvedPrefab {
        task: Option<String>,
        prefab: PrefabId,
    },
    #[error("asset task {0} issued twice")]
    DuplicateTask(String),
    #[error("asset loading already started")]
    AlreadyStarted,
    #[error("asset loading not started")]
    NotStarted,
    #[error("asset loading failed: {0:?}")]
    Incomplete(Vec<AssetError>),
}

/// What a task loads and which prefab it registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub file_name: String,
    pub prefab: PrefabId,
}

impl AssetRef {
    pub fn new(file_name: &str, prefab: PrefabId) -> Self {
        Self {
            file_name: file_name.to_string(),
            prefab,
        }
    }
}

/// The six load tasks of the game.
pub fn standard_manifest() -> Vec<(&'static str, AssetRef)> {
    vec![
        ("corridor4", AssetRef::new("corridor4.json", PrefabId::Corridor4)),
        ("corridor", AssetRef::new("corridorNormal.json", PrefabId::Corridor)),
        ("corridorT", AssetRef::new("corridorT.json", PrefabId::CorridorT)),
        ("corridorL", AssetRef::new("corridorL.json", PrefabId::CorridorL)),
        ("pickup", AssetRef::new("pickup.json", PrefabId::Pickup)),
        ("player", AssetRef::new("player.json", PrefabId::Player)),
    ]
}

/// Task lifecycle. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Handle returned by [`AssetLoadCoordinator::issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetTaskHandle {
    pub id: String,
}

/// A finished background load, delivered back onto the client loop.
#[derive(Debug)]
pub struct TaskCompletion {
    pub task_id: String,
    pub result: Result<MeshCollection, String>,
}

/// Barrier progress after applying a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadProgress {
    Pending { completed: usize, total: usize },
    Complete,
    Failed(AssetError),
}

struct AssetTask {
    source: AssetRef,
    status: TaskStatus,
}

type BarrierCallback = Box<dyn FnOnce(&PrefabLibrary) + Send>;

/// Issues load tasks and fires one callback when all of them succeed.
pub struct AssetLoadCoordinator {
    base: String,
    source: Arc<dyn AssetSource>,
    tasks: BTreeMap<String, AssetTask>,
    prefabs: PrefabLibrary,
    completed: usize,
    failures: Vec<AssetError>,
    on_complete: Option<BarrierCallback>,
    started: bool,
    done: bool,
    tx: mpsc::UnboundedSender<TaskCompletion>,
    rx: mpsc::UnboundedReceiver<TaskCompletion>,
}

impl AssetLoadCoordinator {
    pub fn new(source: Arc<dyn AssetSource>, base: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            base: base.to_string(),
            source,
            tasks: BTreeMap::new(),
            prefabs: PrefabLibrary::default(),
            completed: 0,
            failures: Vec::new(),
            on_complete: None,
            started: false,
            done: false,
            tx,
            rx,
        }
    }

    /// Registers a load task. Tasks can only be issued before [`start`](Self::start).
    pub fn issue(&mut self, task_id: &str, source: AssetRef) -> Result<AssetTaskHandle, AssetError> {
        if self.started {
            return Err(AssetError::AlreadyStarted);
        }
        if self.tasks.contains_key(task_id) {
            return Err(AssetError::DuplicateTask(task_id.to_string()));
        }
        debug!(task = %task_id, file = %source.file_name, prefab = %source.prefab, "Issued asset task");
        self.tasks.insert(
            task_id.to_string(),
            AssetTask {
                source,
                status: TaskStatus::Pending,
            },
        );
        Ok(AssetTaskHandle {
            id: task_id.to_string(),
        })
    }

    /// Sets the callback run once every issued task has succeeded.
    pub fn on_all_complete(&mut self, callback: impl FnOnce(&PrefabLibrary) + Send + 'static) {
        self.on_complete = Some(Box::new(callback));
    }

    /// Spawns one background load per issued task. Only the first call does anything.
    pub fn start(&mut self) -> Result<(), AssetError> {
        if self.started {
            return Err(AssetError::AlreadyStarted);
        }
        self.started = true;
        info!(tasks = self.tasks.len(), "Loading assets");
        if self.tasks.is_empty() {
            self.release_barrier();
            return Ok(());
        }

        for (id, task) in &self.tasks {
            let source = Arc::clone(&self.source);
            let tx = self.tx.clone();
            let base = self.base.clone();
            let task_id = id.clone();
            let file_name = task.source.file_name.clone();
            tokio::spawn(async move {
                let result = source
                    .fetch(&base, &file_name)
                    .await
                    .map_err(|e| format!("{e:#}"));
                // Receiver gone means the coordinator was dropped; nothing to report to.
                let _ = tx.send(TaskCompletion { task_id, result });
            });
        }
        Ok(())
    }

    /// Waits for the next background completion. `None` once nothing is outstanding.
    pub async fn next_completion(&mut self) -> Option<TaskCompletion> {
        if self.done || self.pending() == 0 {
            return None;
        }
        self.rx.recv().await
    }

    /// Applies one completion and returns the barrier state.
    ///
    /// Completions for unknown or already terminal tasks are ignored.
    pub fn apply(&mut self, completion: TaskCompletion) -> LoadProgress {
        let TaskCompletion { task_id, result } = completion;
        let Some(task) = self.tasks.get_mut(&task_id) else {
            warn!(task = %task_id, "Completion for unknown asset task");
            return self.progress();
        };
        if task.status != TaskStatus::Pending {
            warn!(task = %task_id, status = ?task.status, "Duplicate asset completion");
            return self.progress();
        }

        match result {
            Ok(collection) => match task.source.prefab.extract(&collection) {
                Some(prefab) => {
                    task.status = TaskStatus::Succeeded;
                    info!(task = %task_id, prefab = %prefab.id, mesh = %prefab.mesh_id, "Stored prefab");
                    self.prefabs.insert(prefab);
                }
                None => {
                    task.status = TaskStatus::Failed;
                    warn!(task = %task_id, prefab = %task.source.prefab, "Loaded asset lacks prefab mesh");
                    self.failures.push(AssetError::UnresolvedPrefab {
                        task: Some(task_id.clone()),
                        prefab: task.source.prefab,
                    });
                }
            },
            Err(reason) => {
                task.status = TaskStatus::Failed;
                warn!(task = %task_id, %reason, "Asset task failed");
                self.failures.push(AssetError::LoadFailure {
                    task: task_id.clone(),
                    reason,
                });
            }
        }
        self.completed += 1;

        if self.completed == self.tasks.len() {
            self.release_barrier();
        }
        self.progress()
    }

    /// Runs the callback if every task succeeded. Only the first call has any effect.
    fn release_barrier(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if self.failures.is_empty() {
            info!(prefabs = self.prefabs.len(), "All assets loaded");
            if let Some(callback) = self.on_complete.take() {
                callback(&self.prefabs);
            }
        }
    }

    /// Drives background loads until every task is terminal.
    pub async fn run_to_completion(&mut self) -> Result<(), AssetError> {
        if !self.started {
            return Err(AssetError::NotStarted);
        }
        while let Some(completion) = self.next_completion().await {
            match self.apply(completion) {
                LoadProgress::Pending { .. } => {}
                LoadProgress::Complete => return Ok(()),
                LoadProgress::Failed(e) => return Err(e),
            }
        }
        match self.progress() {
            LoadProgress::Complete => Ok(()),
            LoadProgress::Failed(e) => Err(e),
            LoadProgress::Pending { completed, total } => Err(AssetError::LoadFailure {
                task: "*".to_string(),
                reason: format!("loading stalled at {completed}/{total}"),
            }),
        }
    }

    pub fn progress(&self) -> LoadProgress {
        let total = self.tasks.len();
        if self.completed < total {
            return LoadProgress::Pending {
                completed: self.completed,
                total,
            };
        }
        match self.failures.as_slice() {
            [] => LoadProgress::Complete,
            [only] => LoadProgress::Failed(only.clone()),
            many => LoadProgress::Failed(AssetError::Incomplete(many.to_vec())),
        }
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|t| t.status)
    }

    fn pending(&self) -> usize {
        self.tasks.len() - self.completed
    }

    pub fn prefabs(&self) -> &PrefabLibrary {
        &self.prefabs
    }
}
