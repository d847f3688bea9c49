//! In-memory fakes for the sandbox and oracle traits (testing only)
//!
//! Provides `ScriptedSandbox` and `ScriptedOracle`, which satisfy the trait
//! contracts without containers, processes or network access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Action, EnvsolveError, Result};
use crate::oracle::{OracleQuery, PolicyOracle};
use crate::sandbox::{ExecOutput, Sandbox, SandboxError, SandboxResult};

// ---------------------------------------------------------------------------
// ScriptedSandbox
// ---------------------------------------------------------------------------

/// Maps a rendered command to its output.
pub type Responder = Arc<dyn Fn(&str) -> ExecOutput + Send + Sync>;

/// Handle issued by [`ScriptedSandbox`].
#[derive(Debug)]
pub struct ScriptedHandle {
    pub id: u32,
}

/// Sandbox whose `exec` results come from a queue, then a responder
/// closure, then a default success.
pub struct ScriptedSandbox {
    script: Mutex<VecDeque<ExecOutput>>,
    responder: Option<Responder>,
    create_failures: AtomicU32,
    delay: Option<Duration>,
    commands: Mutex<Vec<String>>,
    created: AtomicU32,
    destroyed: AtomicU32,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for ScriptedSandbox {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: None,
            create_failures: AtomicU32::new(0),
            delay: None,
            commands: Mutex::new(Vec::new()),
            created: AtomicU32::new(0),
            destroyed: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }
}

impl ScriptedSandbox {
    /// Every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `outputs` in order, then succeed.
    pub fn with_script(outputs: impl IntoIterator<Item = ExecOutput>) -> Self {
        Self {
            script: Mutex::new(outputs.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_responder(f: impl Fn(&str) -> ExecOutput + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Arc::new(f)),
            ..Self::default()
        }
    }

    /// Fail the next `n` calls to `create`.
    pub fn failing_creates(self, n: u32) -> Self {
        self.create_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Make every `exec` take `delay`, honouring the timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u32 {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently running `exec` calls observed.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_output(&self, command: &str) -> ExecOutput {
        if let Some(output) = self.script.lock().unwrap().pop_front() {
            return output;
        }
        match &self.responder {
            Some(responder) => responder(command),
            None => ExecOutput::success("Successfully installed"),
        }
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    type Handle = ScriptedHandle;

    async fn create(&self, base_image: &str) -> SandboxResult<ScriptedHandle> {
        let failures = self.create_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.create_failures.store(failures - 1, Ordering::SeqCst);
            return Err(SandboxError::CreateFailed {
                image: base_image.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ScriptedHandle { id })
    }

    async fn exec(
        &self,
        _handle: &ScriptedHandle,
        command: &str,
        timeout: Duration,
    ) -> SandboxResult<ExecOutput> {
        self.commands.lock().unwrap().push(command.to_string());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let output = match self.delay {
            Some(delay) if delay > timeout => {
                tokio::time::sleep(timeout).await;
                ExecOutput::timed_out(timeout, timeout.as_millis() as u64)
            }
            Some(delay) => {
                tokio::time::sleep(delay).await;
                self.next_output(command)
            }
            None => self.next_output(command),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);

        Ok(output)
    }

    async fn destroy(&self, _handle: ScriptedHandle) -> SandboxResult<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedOracle
// ---------------------------------------------------------------------------

/// Oracle that replays a fixed list of actions, then gives up.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    actions: Mutex<VecDeque<Action>>,
    queries: Mutex<Vec<OracleQuery>>,
    fail: bool,
}

impl ScriptedOracle {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            actions: Mutex::new(actions.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every call returns an error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every query received so far.
    pub fn queries(&self) -> Vec<OracleQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl PolicyOracle for ScriptedOracle {
    async fn propose(&self, query: &OracleQuery) -> Result<Action> {
        self.queries.lock().unwrap().push(query.clone());
        if self.fail {
            return Err(EnvsolveError::Oracle("scripted failure".to_string()));
        }
        Ok(self
            .actions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Action::GiveUp))
    }
}
