use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions, v8};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::bridge::{BridgeState, PendingReply, workspace_bridge};
use crate::error::{Error, Result};
use crate::store::TenantStore;

const BOOTSTRAP: &str = include_str!("bootstrap.js");

type Reply = std::result::Result<Value, String>;

enum Command {
    Dispatch {
        payload: String,
        reply: oneshot::Sender<Reply>,
    },
}

/// Handle to one isolate running on its own thread.
///
/// The isolate is not `Send`, so it never leaves the thread that created
/// it. The host talks to it through a command channel and can stop a
/// running script through the isolate's thread-safe handle.
pub(crate) struct Sandbox {
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    isolate: v8::IsolateHandle,
    terminated: AtomicBool,
}

impl Sandbox {
    /// Starts an isolate, installs the bridge, and evaluates `source`.
    ///
    /// Returns the sandbox together with the route keys it exported. A
    /// top-level error or a load that outlives `deadline` is a
    /// `CompileError`.
    pub async fn spawn(
        workspace_id: &str,
        source: Arc<str>,
        tenants: Arc<TenantStore>,
        deadline: Duration,
    ) -> Result<(Self, Vec<String>)> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (isolate_tx, isolate_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let bridge = BridgeState {
            workspace_id: workspace_id.to_string(),
            tenants,
        };

        thread::Builder::new()
            .name(format!("vm-{workspace_id}"))
            .spawn(move || run(source, bridge, command_rx, isolate_tx, ready_tx))?;

        let isolate = isolate_rx
            .await
            .map_err(|_| Error::CompileError("sandbox failed to start".to_string()))?;
        let sandbox = Sandbox {
            commands: Mutex::new(Some(command_tx)),
            isolate,
            terminated: AtomicBool::new(false),
        };

        match tokio::time::timeout(deadline, ready_rx).await {
            Ok(Ok(Ok(routes))) => Ok((sandbox, routes)),
            Ok(Ok(Err(message))) => Err(Error::CompileError(message)),
            Ok(Err(_)) => Err(Error::CompileError("sandbox exited during load".to_string())),
            Err(_) => {
                sandbox.terminate();
                Err(Error::CompileError(format!(
                    "top-level code did not finish within {}ms",
                    deadline.as_millis()
                )))
            }
        }
    }

    /// Sends one dispatch payload and waits for the handler's reply.
    pub async fn dispatch(&self, payload: String) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
            let sender = commands
                .as_ref()
                .ok_or_else(|| Error::Interrupted("sandbox disposed".to_string()))?;
            sender
                .send(Command::Dispatch {
                    payload,
                    reply: reply_tx,
                })
                .map_err(|_| Error::Interrupted("sandbox exited".to_string()))?;
        }

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) if self.is_terminated() => Err(Error::Interrupted(message)),
            Ok(Err(message)) => Err(Error::HandlerError(message)),
            Err(_) => Err(Error::Interrupted("sandbox exited".to_string())),
        }
    }

    /// Stops accepting work. A dispatch already queued still completes and
    /// the thread exits afterwards.
    pub fn close(&self) {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// Interrupts whatever script is running, then closes.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.isolate.terminate_execution();
        }
        self.close();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

// The last owner is gone, so no dispatch can be in flight. Anything still
// running is a load whose caller went away.
impl Drop for Sandbox {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run(
    source: Arc<str>,
    bridge: BridgeState,
    mut commands: mpsc::UnboundedReceiver<Command>,
    isolate_tx: oneshot::Sender<v8::IsolateHandle>,
    ready_tx: oneshot::Sender<std::result::Result<Vec<String>, String>>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to build sandbox runtime");
            return;
        }
    };

    // The isolate and its ops stay on this thread.
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async move {
        let mut js = JsRuntime::new(RuntimeOptions {
            extensions: vec![workspace_bridge::init_ops_and_esm()],
            ..Default::default()
        });
        let _ = isolate_tx.send(js.v8_isolate().thread_safe_handle());
        js.op_state().borrow_mut().put(bridge);

        let loaded = load(&mut js, &source).await;
        let ready = loaded.is_ok();
        let _ = ready_tx.send(loaded);
        if !ready {
            return;
        }

        while let Some(command) = commands.recv().await {
            match command {
                Command::Dispatch { payload, reply } => {
                    let result = dispatch(&mut js, &payload).await;
                    let _ = reply.send(result);
                }
            }
        }
    });
}

async fn load(js: &mut JsRuntime, source: &str) -> std::result::Result<Vec<String>, String> {
    js.execute_script("<bootstrap>", BOOTSTRAP.to_string())
        .map_err(|e| e.to_string())?;
    js.execute_script("workspace.js", source.to_string())
        .map_err(|e| e.to_string())?;
    js.run_event_loop(PollEventLoopOptions::default())
        .await
        .map_err(|e| e.to_string())?;
    js.execute_script("<load>", "globalThis.__runtime.finishLoad();".to_string())
        .map_err(|e| e.to_string())?;

    let reply = take_reply(js).ok_or_else(|| "route table was not published".to_string())?;
    let routes = reply
        .get("routes")
        .and_then(Value::as_array)
        .ok_or_else(|| "route table was not published".to_string())?;
    Ok(routes
        .iter()
        .filter_map(|key| key.as_str().map(str::to_string))
        .collect())
}

async fn dispatch(js: &mut JsRuntime, payload: &str) -> Reply {
    js.execute_script(
        "<dispatch>",
        format!("globalThis.__runtime.dispatch({payload});"),
    )
    .map_err(|e| e.to_string())?;
    js.run_event_loop(PollEventLoopOptions::default())
        .await
        .map_err(|e| e.to_string())?;
    take_reply(js).ok_or_else(|| "handler did not settle".to_string())
}

fn take_reply(js: &mut JsRuntime) -> Option<Value> {
    js.op_state()
        .borrow_mut()
        .try_take::<PendingReply>()
        .map(|reply| reply.0)
}
