use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::loader::CodeLoader;
use super::routes::RouteTable;
use super::sandbox::Sandbox;
use super::{DispatchPayload, VmRequest, VmResponse};
use crate::config::RuntimeOptions;
use crate::error::{Error, Result};
use crate::store::TenantStore;
use crate::types::Workspace;

// Isolate startup counts against the load deadline, so it never drops
// below this even when a workspace sets a short handler timeout.
const MIN_LOAD_DEADLINE: Duration = Duration::from_secs(5);

/// One loaded workspace program.
///
/// `gate` admits one dispatch at a time and is held by the dispatch task,
/// not the caller. `disposed` is terminal: a caller that wins the gate on a
/// disposed entry goes back to the pool.
struct VmEntry {
    workspace_id: String,
    hash: String,
    sandbox: Sandbox,
    routes: RouteTable,
    gate: Arc<tokio::sync::Mutex<()>>,
    running: AtomicBool,
    disposed: AtomicBool,
    last_used: Mutex<Instant>,
}

impl VmEntry {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Marks the entry disposed and lets its thread exit after any
    /// in-flight dispatch.
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.sandbox.close();
            debug!(workspace_id = %self.workspace_id, hash = %self.hash, "VM disposed");
        }
    }

    /// Interrupts running code and disposes.
    fn kill(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.sandbox.terminate();
    }
}

/// Clears `running` even when the dispatching future is dropped.
struct Running<'a>(&'a AtomicBool);

impl<'a> Running<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs one dispatch under the entry's gate.
///
/// This lives in its own task so the deadline still ends the call when the
/// requesting future is dropped. `None` means the deadline passed and the
/// VM was terminated.
async fn run_dispatch(
    entry: Arc<VmEntry>,
    payload: String,
    timeout: Duration,
    _gate: OwnedMutexGuard<()>,
) -> Option<Result<Value>> {
    let outcome = {
        let _running = Running::enter(&entry.running);
        tokio::time::timeout(timeout, entry.sandbox.dispatch(payload)).await
    };
    entry.touch();
    match outcome {
        Ok(reply) => Some(reply),
        Err(_) => {
            entry.kill();
            None
        }
    }
}

#[derive(Debug, Clone)]
struct CompileFailure {
    hash: String,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Absent,
    Ready,
    Running,
}

/// Snapshot of a workspace's VM for operators.
#[derive(Debug, Clone, Serialize)]
pub struct VmStatus {
    pub loaded: bool,
    pub hash: Option<String>,
    pub state: VmState,
    pub last_used_ms_ago: Option<u64>,
    pub last_compile_error: Option<String>,
}

/// Bounded cache of workspace VMs.
///
/// The map lock is only held for lookups and inserts. Loading and running
/// code happen outside it.
pub struct VmPool {
    loader: Arc<CodeLoader>,
    tenants: Arc<TenantStore>,
    capacity: usize,
    default_timeout: Duration,
    entries: Mutex<HashMap<String, Arc<VmEntry>>>,
    compile_errors: Mutex<HashMap<String, CompileFailure>>,
}

impl VmPool {
    pub fn new(loader: Arc<CodeLoader>, tenants: Arc<TenantStore>, options: &RuntimeOptions) -> Self {
        Self {
            loader,
            tenants,
            capacity: options.vm_capacity.max(1),
            default_timeout: options.vm_timeout,
            entries: Mutex::new(HashMap::new()),
            compile_errors: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn loader(&self) -> &Arc<CodeLoader> {
        &self.loader
    }

    /// Runs `request` against the workspace's route handlers.
    pub async fn invoke(&self, workspace: &Workspace, request: &VmRequest) -> Result<VmResponse> {
        let timeout = workspace.vm_timeout(self.default_timeout);

        // An entry replaced while we waited on its gate is retried once.
        for _ in 0..2 {
            let entry = self.get_or_create(&workspace.id, timeout).await?;
            let matched = entry.routes.resolve(&request.method, &request.path).ok_or_else(|| {
                Error::NotFound(format!("no route for {} {}", request.method, request.path))
            })?;

            let gate = entry.gate.clone().lock_owned().await;
            if entry.is_disposed() {
                continue;
            }

            let payload = serde_json::to_string(&DispatchPayload {
                route: &matched.key,
                params: &matched.params,
                request,
            })
            .map_err(|e| Error::Internal(format!("failed to encode request: {e}")))?;

            let started = Instant::now();
            let outcome = tokio::spawn(run_dispatch(entry.clone(), payload, timeout, gate))
                .await
                .map_err(|e| Error::Internal(format!("dispatch task failed: {e}")))?;

            return match outcome {
                Some(reply) => {
                    debug!(
                        workspace_id = %workspace.id,
                        route = %matched.key,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "handler finished"
                    );
                    VmResponse::from_reply(reply?)
                }
                None => {
                    warn!(
                        workspace_id = %workspace.id,
                        route = %matched.key,
                        timeout_ms = timeout.as_millis() as u64,
                        "handler timed out, VM terminated"
                    );
                    self.remove_entry(&entry);
                    Err(Error::Timeout(format!(
                        "handler exceeded {}ms",
                        timeout.as_millis()
                    )))
                }
            };
        }

        Err(Error::Interrupted("VM was replaced during dispatch".to_string()))
    }

    /// Returns a ready entry whose hash matches the current code, loading
    /// one if needed.
    async fn get_or_create(&self, workspace_id: &str, timeout: Duration) -> Result<Arc<VmEntry>> {
        let hash = self.loader.current_hash(workspace_id)?;

        if let Some(entry) = self.lock_entries().get(workspace_id) {
            if entry.hash == hash && !entry.is_disposed() {
                entry.touch();
                return Ok(entry.clone());
            }
        }

        let code = self.loader.get_code(workspace_id)?;
        if code.is_empty() {
            return Err(Error::NoCode);
        }
        if let Some(failure) = self.lock_compile_errors().get(workspace_id) {
            if failure.hash == code.hash {
                return Err(Error::CompileError(failure.message.clone()));
            }
        }

        let started = Instant::now();
        let deadline = timeout.max(MIN_LOAD_DEADLINE);
        let (sandbox, keys) =
            match Sandbox::spawn(workspace_id, code.source.clone(), self.tenants.clone(), deadline).await {
                Ok(loaded) => loaded,
                Err(Error::CompileError(message)) => {
                    warn!(workspace_id, hash = %code.hash, error = %message, "workspace code failed to load");
                    self.lock_compile_errors().insert(
                        workspace_id.to_string(),
                        CompileFailure {
                            hash: code.hash.clone(),
                            message: message.clone(),
                        },
                    );
                    return Err(Error::CompileError(message));
                }
                Err(e) => return Err(e),
            };

        let routes = match RouteTable::parse(&keys) {
            Ok(routes) => routes,
            Err(message) => {
                sandbox.terminate();
                warn!(workspace_id, hash = %code.hash, error = %message, "workspace routes are invalid");
                self.lock_compile_errors().insert(
                    workspace_id.to_string(),
                    CompileFailure {
                        hash: code.hash.clone(),
                        message: message.clone(),
                    },
                );
                return Err(Error::CompileError(message));
            }
        };
        self.lock_compile_errors().remove(workspace_id);

        let fresh = Arc::new(VmEntry {
            workspace_id: workspace_id.to_string(),
            hash: code.hash,
            sandbox,
            routes,
            gate: Arc::new(tokio::sync::Mutex::new(())),
            running: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        });

        let mut entries = self.lock_entries();
        if let Some(existing) = entries.get(workspace_id) {
            if existing.hash == fresh.hash && !existing.is_disposed() {
                fresh.dispose();
                existing.touch();
                return Ok(existing.clone());
            }
        }

        if let Some(stale) = entries.insert(workspace_id.to_string(), fresh.clone()) {
            stale.dispose();
        }
        while entries.len() > self.capacity {
            let Some(victim) = entries
                .iter()
                .filter(|(id, _)| id.as_str() != workspace_id)
                .max_by_key(|(_, entry)| entry.idle_for())
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            if let Some(evicted) = entries.remove(&victim) {
                info!(workspace_id = %victim, hash = %evicted.hash, "VM evicted");
                evicted.dispose();
            }
        }
        drop(entries);

        info!(
            workspace_id,
            hash = %fresh.hash,
            routes = fresh.routes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "VM created"
        );
        Ok(fresh)
    }

    /// Drops the workspace's VM and cached code. The next invoke loads
    /// fresh source.
    pub fn invalidate(&self, workspace_id: &str) {
        self.loader.invalidate(workspace_id);
        self.lock_compile_errors().remove(workspace_id);
        if let Some(entry) = self.lock_entries().remove(workspace_id) {
            entry.dispose();
            info!(workspace_id, hash = %entry.hash, "VM invalidated");
        }
    }

    #[must_use]
    pub fn status(&self, workspace_id: &str) -> VmStatus {
        let last_compile_error = self
            .lock_compile_errors()
            .get(workspace_id)
            .map(|f| f.message.clone());

        match self
            .lock_entries()
            .get(workspace_id)
            .filter(|entry| !entry.is_disposed())
        {
            Some(entry) => VmStatus {
                loaded: true,
                hash: Some(entry.hash.clone()),
                state: if entry.running.load(Ordering::SeqCst) {
                    VmState::Running
                } else {
                    VmState::Ready
                },
                last_used_ms_ago: Some(entry.idle_for().as_millis() as u64),
                last_compile_error,
            },
            None => VmStatus {
                loaded: false,
                hash: None,
                state: VmState::Absent,
                last_used_ms_ago: None,
                last_compile_error,
            },
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminates every VM.
    pub fn close(&self) {
        let drained: Vec<_> = self.lock_entries().drain().collect();
        for (workspace_id, entry) in drained {
            entry.kill();
            debug!(workspace_id, "VM closed");
        }
    }

    fn remove_entry(&self, entry: &Arc<VmEntry>) {
        let mut entries = self.lock_entries();
        if entries
            .get(&entry.workspace_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(&entry.workspace_id);
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<VmEntry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_compile_errors(&self) -> std::sync::MutexGuard<'_, HashMap<String, CompileFailure>> {
        self.compile_errors.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for VmPool {
    fn drop(&mut self) {
        self.close();
    }
}
