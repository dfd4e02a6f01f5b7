//! Script VM pool (`gctscript`).
//!
//! A VM is a compiled script plus its run state. It holds one capacity slot
//! from `load` until it is removed: a one-shot VM after its first run, a
//! repeating VM on `stop`, `stop_all` or a failed run.

pub mod archive;
pub mod storage;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use agora_core::sync::{lock, read, write};
use agora_core::{
    AgoraError, CompiledScript, DateTime, ScriptConfig, ScriptContext, ScriptRuntime,
    ScriptValidator, SubsystemName, Utc, VmId,
};

use crate::supervisor::{Lifecycle, Subsystem};
use storage::io_err;

/// How long a timed-out run gets to notice cancellation before it is dropped.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// VM run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    /// Compiled, never run.
    Loaded,
    /// A run is in progress.
    Running,
    /// Waiting for the next repeat.
    Idle,
}

/// Snapshot of one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    /// Stable id assigned at load.
    pub id: VmId,
    /// File base name.
    pub name: String,
    /// Source file.
    pub path: PathBuf,
    /// Run state.
    pub status: VmStatus,
    /// Repeat interval; `None` for one-shot scripts.
    pub repeat: Option<Duration>,
    /// Completed runs.
    pub runs: u64,
    /// Message of the last failed run.
    pub last_error: Option<String>,
    /// Load time.
    pub loaded_at: DateTime<Utc>,
}

struct Vm {
    info: Mutex<VmInfo>,
    script: Arc<dyn CompiledScript>,
    cancel: watch::Sender<bool>,
    repeater: Mutex<Option<JoinHandle<()>>>,
}

impl Vm {
    fn snapshot(&self) -> VmInfo {
        lock(&self.info).clone()
    }

    /// Move a never-run VM to `Running` under one lock.
    fn claim_first_run(&self) -> Result<(), AgoraError> {
        let mut info = lock(&self.info);
        if info.status != VmStatus::Loaded {
            return Err(AgoraError::InvalidArg(format!(
                "script vm {} is already {:?}",
                info.id, info.status
            )));
        }
        info.status = VmStatus::Running;
        Ok(())
    }

    fn set_status(&self, status: VmStatus) {
        lock(&self.info).status = status;
    }
}

struct Pool {
    config: ScriptConfig,
    runtime: Arc<dyn ScriptRuntime>,
    vms: RwLock<HashMap<VmId, Arc<Vm>>>,
    slots: AtomicUsize,
}

impl Pool {
    fn acquire_slot(&self) -> Result<(), AgoraError> {
        let max = self.config.max_concurrent_vms;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|n| AgoraError::CapacityExhausted(format!("{n} of {max} script VMs in use")))
    }

    fn get(&self, id: VmId) -> Result<Arc<Vm>, AgoraError> {
        read(&self.vms)
            .get(&id)
            .cloned()
            .ok_or_else(|| AgoraError::not_found(format!("script vm {id}")))
    }

    // Remove `id`, free its slot and signal cancellation.
    fn remove(&self, id: VmId) -> Option<Arc<Vm>> {
        let vm = write(&self.vms).remove(&id)?;
        self.slots.fetch_sub(1, Ordering::AcqRel);
        let _ = vm.cancel.send(true);
        Some(vm)
    }

    async fn run_once(
        &self,
        vm: &Vm,
        args: Option<serde_json::Value>,
    ) -> Result<(), AgoraError> {
        let info = vm.snapshot();
        let ctx = ScriptContext {
            vm_id: info.id,
            name: info.name.clone(),
            output_dir: self.config.script_dir.join(storage::OUTPUT_DIR),
            args,
            cancel: vm.cancel.subscribe(),
        };
        vm.set_status(VmStatus::Running);
        let run = vm.script.run(ctx);
        tokio::pin!(run);
        let res = match tokio::time::timeout(self.config.script_timeout, &mut run).await {
            Ok(res) => res,
            Err(_) => {
                let _ = vm.cancel.send(true);
                let _ = tokio::time::timeout(CANCEL_GRACE, &mut run).await;
                Err(AgoraError::timeout(format!("script {}", info.name)))
            }
        };
        let mut state = lock(&vm.info);
        state.runs += 1;
        state.status = VmStatus::Idle;
        state.last_error = res.as_ref().err().map(ToString::to_string);
        res
    }
}

/// Script VM pool subsystem.
pub struct ScriptPool {
    lifecycle: Lifecycle,
    pool: Arc<Pool>,
    validator: Arc<dyn ScriptValidator>,
    autoload: Mutex<BTreeSet<String>>,
}

impl ScriptPool {
    /// Pool compiling with `runtime` and vetting uploads with `validator`.
    #[must_use]
    pub fn new(
        config: ScriptConfig,
        runtime: Arc<dyn ScriptRuntime>,
        validator: Arc<dyn ScriptValidator>,
    ) -> Self {
        let autoload = config.autoload.iter().cloned().collect();
        Self {
            lifecycle: Lifecycle::new(SubsystemName::Gctscript),
            pool: Arc::new(Pool {
                config,
                runtime,
                vms: RwLock::new(HashMap::new()),
                slots: AtomicUsize::new(0),
            }),
            validator,
            autoload: Mutex::new(autoload),
        }
    }

    /// Script directory.
    #[must_use]
    pub fn script_dir(&self) -> &Path {
        &self.pool.config.script_dir
    }

    /// Capacity slots in use.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.pool.slots.load(Ordering::Acquire)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.script_dir().join(path)
        }
    }

    /// Compile the script at `path` into a new VM.
    ///
    /// Relative paths resolve against the script directory. Fails with
    /// `capacity-exhausted` when the pool is full.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<VmId, AgoraError> {
        self.lifecycle.ensure_running()?;
        let path = self.resolve(path.as_ref());
        let ext = self.pool.runtime.extension();
        if !storage::has_extension(&path, ext) {
            return Err(AgoraError::InvalidArg(format!(
                "{} is not a .{ext} script",
                path.display()
            )));
        }
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgoraError::not_found(format!("script {}", path.display())));
            }
            Err(e) => return Err(io_err("read", &path, &e)),
        };
        let name = storage::stem(&path);
        let script = self.pool.runtime.compile(&name, &source)?;
        self.pool.acquire_slot()?;

        let id = VmId::new();
        let repeat = script.repeat_interval().filter(|d| !d.is_zero());
        let (cancel, _) = watch::channel(false);
        let vm = Arc::new(Vm {
            info: Mutex::new(VmInfo {
                id,
                name,
                path,
                status: VmStatus::Loaded,
                repeat,
                runs: 0,
                last_error: None,
                loaded_at: Utc::now(),
            }),
            script,
            cancel,
            repeater: Mutex::new(None),
        });
        write(&self.pool.vms).insert(id, vm);
        #[cfg(feature = "tracing")]
        tracing::debug!(vm = %id, "script loaded");
        Ok(id)
    }

    /// Run `id` with no arguments.
    pub async fn compile_and_run(&self, id: VmId) -> Result<(), AgoraError> {
        self.run_with_context(id, None).await
    }

    /// Run `id` once now, handing it `args`.
    ///
    /// The first run is awaited and its error returned. A one-shot VM, or one
    /// whose run failed, is removed afterwards; a repeating VM keeps running
    /// every interval until stopped.
    pub async fn run_with_context(
        &self,
        id: VmId,
        args: Option<serde_json::Value>,
    ) -> Result<(), AgoraError> {
        self.lifecycle.ensure_running()?;
        let vm = self.pool.get(id)?;
        vm.claim_first_run()?;
        let res = self.pool.run_once(&vm, args.clone()).await;
        let repeat = vm.snapshot().repeat;
        match (&res, repeat) {
            (Ok(()), Some(every)) => {
                let handle = spawn_repeater(Arc::clone(&self.pool), Arc::clone(&vm), every, args);
                *lock(&vm.repeater) = Some(handle);
            }
            _ => {
                self.pool.remove(id);
            }
        }
        if let Err(_e) = &res {
            #[cfg(feature = "tracing")]
            tracing::warn!(vm = %id, error = %_e, "script run failed");
        }
        res
    }

    /// Snapshot of `id`.
    pub fn query(&self, id: VmId) -> Result<VmInfo, AgoraError> {
        self.pool.get(id).map(|vm| vm.snapshot())
    }

    /// Every loaded VM.
    #[must_use]
    pub fn list(&self) -> Vec<VmInfo> {
        let mut out: Vec<VmInfo> = read(&self.pool.vms).values().map(|v| v.snapshot()).collect();
        out.sort_by_key(|v| v.loaded_at);
        out
    }

    /// Cancel and remove `id`.
    pub async fn stop(&self, id: VmId) -> Result<(), AgoraError> {
        let vm = self
            .pool
            .remove(id)
            .ok_or_else(|| AgoraError::not_found(format!("script vm {id}")))?;
        let handle = lock(&vm.repeater).take();
        if let Some(h) = handle {
            let _ = h.await;
        }
        Ok(())
    }

    /// Stop every VM; returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<VmId> = read(&self.pool.vms).keys().copied().collect();
        let mut n = 0;
        for id in ids {
            if self.stop(id).await.is_ok() {
                n += 1;
            }
        }
        n
    }

    /// Store an uploaded script or bundle; returns the stored path.
    ///
    /// Plain uploads must carry the runtime's extension and pass the
    /// validator. Bundles extract into `<dir>/<stem>/`; if any entry fails
    /// validation the directory is deleted and the offenders reported.
    /// Existing targets are moved to the history directory only when
    /// `overwrite` is set.
    pub async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        archived: bool,
        overwrite: bool,
    ) -> Result<PathBuf, AgoraError> {
        storage::check_name(name)?;
        let dir = self.script_dir().to_path_buf();
        storage::ensure_layout(&dir).await?;
        if archived {
            return self.upload_bundle(&dir, name, bytes, overwrite).await;
        }

        let ext = self.pool.runtime.extension();
        let target = dir.join(name);
        if !storage::has_extension(&target, ext) {
            return Err(AgoraError::InvalidArg(format!("{name} is not a .{ext} script")));
        }
        let source = std::str::from_utf8(bytes)
            .map_err(|_| AgoraError::ScriptValidation {
                offenders: vec![name.to_string()],
            })?;
        if self.validator.validate(name, source).is_err() {
            return Err(AgoraError::ScriptValidation {
                offenders: vec![name.to_string()],
            });
        }
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            if !overwrite {
                return Err(AgoraError::InvalidArg(format!(
                    "{name} exists; pass overwrite to replace it"
                )));
            }
            storage::archive_previous(&dir, &target).await?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| io_err("write", &target, &e))?;
        Ok(target)
    }

    async fn upload_bundle(
        &self,
        dir: &Path,
        name: &str,
        bytes: &[u8],
        overwrite: bool,
    ) -> Result<PathBuf, AgoraError> {
        let stem = storage::stem(Path::new(name));
        if stem.is_empty() || stem == storage::OUTPUT_DIR || stem == storage::HISTORY_DIR {
            return Err(AgoraError::InvalidArg(format!("'{name}' is not a usable bundle name")));
        }
        let target = dir.join(&stem);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            if !overwrite {
                return Err(AgoraError::InvalidArg(format!(
                    "{stem} exists; pass overwrite to replace it"
                )));
            }
            storage::archive_previous(dir, &target).await?;
        }

        let (root, out, payload) = (dir.to_path_buf(), target.clone(), bytes.to_vec());
        let ext = self.pool.runtime.extension();
        let validator = Arc::clone(&self.validator);
        let verdict = tokio::task::spawn_blocking(move || {
            let files = archive::extract(&payload, &root, &out)?;
            let base = out.canonicalize().unwrap_or(out);
            Ok::<_, AgoraError>(archive::offenders(&files, &base, ext, validator.as_ref()))
        })
        .await
        .map_err(|e| AgoraError::Internal(format!("extract task: {e}")))?;

        let bad = match verdict {
            Ok(bad) => bad,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&target).await;
                return Err(e);
            }
        };
        if !bad.is_empty() {
            let _ = tokio::fs::remove_dir_all(&target).await;
            return Err(AgoraError::ScriptValidation { offenders: bad });
        }
        Ok(target)
    }

    /// Add or remove `name` from the autoload list; returns the new list.
    pub async fn autoload_toggle(&self, name: &str, on: bool) -> Result<Vec<String>, AgoraError> {
        storage::check_name(name)?;
        let ext = self.pool.runtime.extension();
        let file = if storage::has_extension(Path::new(name), ext) {
            name.to_string()
        } else {
            format!("{name}.{ext}")
        };
        if on {
            let path = self.script_dir().join(&file);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(AgoraError::not_found(format!("script {file}")));
            }
        }
        let mut set = lock(&self.autoload);
        let changed = if on { set.insert(file) } else { set.remove(&file) };
        if !changed && !on {
            return Err(AgoraError::not_found(format!("{name} is not in the autoload list")));
        }
        Ok(set.iter().cloned().collect())
    }

    /// Autoload list.
    #[must_use]
    pub fn autoload(&self) -> Vec<String> {
        lock(&self.autoload).iter().cloned().collect()
    }

    /// Contents of a stored script.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, AgoraError> {
        storage::read(self.script_dir(), name).await
    }

    async fn start_inner(&self) -> Result<(), AgoraError> {
        self.pool.config.validate()?;
        storage::ensure_layout(self.script_dir()).await?;
        Ok(())
    }

    // Runs after the lifecycle is `running`; failures are logged only.
    async fn run_autoload(&self) {
        for file in self.autoload() {
            let res = match self.load(&file).await {
                Ok(id) => self.compile_and_run(id).await,
                Err(e) => Err(e),
            };
            if let Err(_e) = res {
                #[cfg(feature = "tracing")]
                tracing::warn!(script = %file, error = %_e, "autoload failed");
            }
        }
    }
}

fn spawn_repeater(
    pool: Arc<Pool>,
    vm: Arc<Vm>,
    every: Duration,
    args: Option<serde_json::Value>,
) -> JoinHandle<()> {
    let mut stop = vm.cancel.subscribe();
    tokio::spawn(async move {
        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                () = tokio::time::sleep(every) => {}
            }
            if pool.run_once(&vm, args.clone()).await.is_err() {
                let id = vm.snapshot().id;
                pool.remove(id);
                break;
            }
        }
    })
}

#[async_trait]
impl Subsystem for ScriptPool {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle.start_with(self.start_inner()).await?;
        self.run_autoload().await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle
            .stop_with(async {
                self.stop_all().await;
                Ok(())
            })
            .await
    }
}
