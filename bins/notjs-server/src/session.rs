/// Session Manager - One Duplex Channel, One Execution
///
/// **State machine:**
/// `Uninitialized -> Running | Draining -> Closed`
/// - `Uninitialized`: waiting for the execution request (the first message,
///   whatever it contains)
/// - `Running`: the program is alive, inbound text is forwarded to stdin
/// - `Draining`: the compiler failed, its diagnostic is being streamed and
///   input is ignored
/// - `Closed`: terminal
///
/// **Tasks per session:**
/// The transport's receive loop drives `on_message`/`on_close` and never
/// waits on the process. An output task streams the handle's merged output
/// to the channel; an input task feeds queued lines to stdin. Both are owned
/// by the session: `on_close` cancels and joins them before tearing the
/// handle down.
///
/// **Backpressure:**
/// Every queue is bounded. Output waits for room in the outbound queue, so a
/// slow client stalls the program at its pipe instead of growing memory.
/// Input is accepted without waiting; a full input queue is reported to the
/// client and the line is dropped.
///
/// **Transport independence:**
/// The manager never touches a socket. It talks to the channel through an
/// `Outbound` queue; the WebSocket adapter in `ws.rs` drains that queue.

use crate::error::{ExecError, ExecResult};
use crate::executor::ExecutorSet;
use crate::handle::{ExecutionHandle, OutputSource};
use crate::utf8::Utf8Carry;
use dashmap::DashMap;
use futures_util::future::join_all;
use notjs_common::{ExecutionRequest, ToolchainRegistry};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Capacity of the queue between a session and its transport
pub const OUTBOUND_QUEUE: usize = 64;

/// Input lines accepted ahead of a program that is not reading
const INPUT_QUEUE_LINES: usize = 256;

/// How long shutdown waits for room to queue the going-away notice
const SHUTDOWN_NOTICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Running,
    Draining,
    Closed,
}

/// How the channel is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Output ended
    Normal,
    /// Server shutting down
    GoingAway,
    /// Rejected request
    Policy,
    /// Execution could not be started
    ServerError,
}

impl CloseKind {
    /// WebSocket close code
    pub fn code(&self) -> u16 {
        match self {
            CloseKind::Normal => 1000,
            CloseKind::GoingAway => 1001,
            CloseKind::Policy => 1008,
            CloseKind::ServerError => 1011,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseKind::Normal => "execution finished",
            CloseKind::GoingAway => "server shutting down",
            CloseKind::Policy => "invalid execution request",
            CloseKind::ServerError => "execution failed to start",
        }
    }
}

/// Message for the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(CloseKind),
}

pub struct Session {
    id: Uuid,
    state: Mutex<SessionState>,
    handle: Mutex<Option<Arc<ExecutionHandle>>>,
    input: Mutex<Option<mpsc::Sender<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    outbound: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SessionState::Uninitialized),
            handle: Mutex::new(None),
            input: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            outbound,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn handle(&self) -> Option<Arc<ExecutionHandle>> {
        lock(&self.handle).clone()
    }

    /// Resolves once the session reached `Closed`
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    fn mark_closed(&self) -> SessionState {
        let previous = std::mem::replace(&mut *lock(&self.state), SessionState::Closed);
        self.input_sender().take();
        self.closed.cancel();
        previous
    }

    fn input_sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        lock(&self.input)
    }

    /// Store the execution and move to `next`, unless the session is already
    /// closed. `Closed` is never overwritten.
    fn attach(&self, handle: Arc<ExecutionHandle>, next: SessionState) -> bool {
        let mut state = lock(&self.state);
        if *state == SessionState::Closed {
            return false;
        }
        *lock(&self.handle) = Some(handle);
        *state = next;
        true
    }

    /// Queue a message, waiting for room. False once the transport is gone
    /// or the session closed while waiting.
    async fn deliver(&self, message: Outbound) -> bool {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            sent = self.outbound.send(message) => sent.is_ok(),
        }
    }

    /// Queue a message only if there is room right now
    fn notify(&self, message: Outbound) -> bool {
        self.outbound.try_send(message).is_ok()
    }
}

/// Owns every live session of the process
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<ToolchainRegistry>,
    executors: Arc<ExecutorSet>,
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
    max_source_bytes: usize,
}

impl SessionManager {
    pub fn new(registry: Arc<ToolchainRegistry>, executors: Arc<ExecutorSet>, max_source_bytes: usize) -> Self {
        Self {
            registry,
            executors,
            sessions: Arc::new(DashMap::new()),
            max_source_bytes,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Channel connected
    pub fn open(&self, outbound: mpsc::Sender<Outbound>) -> Arc<Session> {
        let session = Arc::new(Session::new(outbound));
        self.sessions.insert(session.id, session.clone());
        info!(session_id = %session.id, active = self.sessions.len(), "Session opened");
        session
    }

    /// Inbound text from the channel
    pub async fn on_message(&self, session: &Arc<Session>, text: &str) {
        match session.state() {
            SessionState::Uninitialized => self.initialize(session, text).await,
            SessionState::Running => forward_input(session, text),
            SessionState::Draining | SessionState::Closed => {
                debug!(session_id = %session.id, state = ?session.state(), "Input ignored");
            }
        }
    }

    /// Channel closed by the client
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn on_close(&self, session: &Arc<Session>) {
        let previous = session.mark_closed();

        let tasks = std::mem::take(&mut *lock(&session.tasks));
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Session task failed");
            }
        }

        if let Some(handle) = session.handle() {
            handle.force_teardown().await;
        }

        self.sessions.remove(&session.id);
        info!(previous = ?previous, active = self.sessions.len(), "Session closed");
    }

    /// Transport failure; handled like a disconnect
    pub async fn on_transport_error(&self, session: &Arc<Session>, error: &str) {
        warn!(session_id = %session.id, error = %error, "Channel transport error");
        self.on_close(session).await;
    }

    /// Close every live session and tear its execution down
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
        if sessions.is_empty() {
            return;
        }

        info!(count = sessions.len(), "Closing all sessions");
        join_all(sessions.iter().map(|session| async move {
            let notice = session.outbound.send(Outbound::Close(CloseKind::GoingAway));
            if tokio::time::timeout(SHUTDOWN_NOTICE, notice).await.is_err() {
                debug!(session_id = %session.id, "Outbound queue full, closing without notice");
            }
            self.on_close(session).await
        }))
        .await;
    }

    #[instrument(skip(self, session, payload), fields(session_id = %session.id))]
    async fn initialize(&self, session: &Arc<Session>, payload: &str) {
        if let Err(e) = self.start_execution(session, payload).await {
            let close = if e.is_client_error() {
                warn!(error = %e, "Execution request rejected");
                CloseKind::Policy
            } else {
                error!(error = %e, "Execution failed to start");
                CloseKind::ServerError
            };

            session.deliver(Outbound::Text(format!("Error: {}\r\n", e))).await;
            session.deliver(Outbound::Close(close)).await;
            session.mark_closed();
            self.sessions.remove(&session.id);
        }
    }

    async fn start_execution(&self, session: &Arc<Session>, payload: &str) -> ExecResult<()> {
        let request = ExecutionRequest::parse(payload)?;

        if request.code.len() > self.max_source_bytes {
            return Err(ExecError::SourceTooLarge {
                limit: self.max_source_bytes,
            });
        }

        // Validation happens before anything touches the filesystem
        self.registry
            .describe(&request.language)?
            .resolve_version(request.requested_version())?;
        let executor = self.executors.get(&request.language)?;

        let launch = executor
            .execute(&request.code, request.requested_version(), &request.arguments)
            .await?;

        let next = if launch.is_compile_failure() {
            SessionState::Draining
        } else {
            SessionState::Running
        };
        let handle = Arc::new(launch.into_handle());

        info!(
            language = %handle.language(),
            version = %handle.version(),
            pid = ?handle.pid(),
            state = ?next,
            "Execution attached"
        );

        if !self.attach_or_discard(session, &handle, next).await {
            return Ok(());
        }

        let mut tasks = Vec::with_capacity(2);
        if next == SessionState::Running {
            let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_LINES);
            *session.input_sender() = Some(input_tx);
            tasks.push(tokio::spawn(feed_input(session.clone(), handle.clone(), input_rx)));
        }
        tasks.push(tokio::spawn(stream_output(session.clone(), handle, self.sessions.clone())));
        lock(&session.tasks).extend(tasks);
        Ok(())
    }

    /// Attach a fresh execution; if the session closed during the launch
    /// the execution is torn down instead and false is returned
    async fn attach_or_discard(
        &self,
        session: &Session,
        handle: &Arc<ExecutionHandle>,
        next: SessionState,
    ) -> bool {
        if session.attach(handle.clone(), next) {
            return true;
        }

        info!(session_id = %session.id, pid = ?handle.pid(), "Session closed during launch, discarding execution");
        handle.force_teardown().await;
        false
    }
}

/// Queue a line for stdin; never waits on the process
fn forward_input(session: &Session, line: &str) {
    let Some(input) = session.input_sender().clone() else {
        return;
    };

    match input.try_send(line.to_string()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(session_id = %session.id, "Input queue full, line dropped");
            session.notify(Outbound::Text("Error writing to process: input buffer full\r\n".to_string()));
        }
        Err(TrySendError::Closed(_)) => {
            debug!(session_id = %session.id, "Input task gone, line dropped");
        }
    }
}

/// Write queued lines to stdin until the session closes
async fn feed_input(session: Arc<Session>, handle: Arc<ExecutionHandle>, mut lines: mpsc::Receiver<String>) {
    loop {
        let line = tokio::select! {
            biased;
            _ = session.closed.cancelled() => return,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            return;
        };

        let written = tokio::select! {
            biased;
            _ = session.closed.cancelled() => return,
            written = handle.write_line(&line) => written,
        };

        if let Err(e) = written {
            warn!(session_id = %session.id, error = %e, "Failed to forward input");
            let message = match &e {
                ExecError::StdinWrite(_) => e.to_string(),
                _ => format!("Error writing to process: {}", e),
            };
            session.deliver(Outbound::Text(format!("{}\r\n", message))).await;
        }
    }
}

/// Stream output to the channel; at end of stream close it and tear down
async fn stream_output(
    session: Arc<Session>,
    handle: Arc<ExecutionHandle>,
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
) {
    let Some(mut output) = handle.take_output() else {
        warn!(session_id = %session.id, "Output stream already taken");
        return;
    };

    if !pump_to_channel(&session, &mut output).await {
        // Session closed underneath us; on_close owns the teardown
        return;
    }

    session.deliver(Outbound::Close(CloseKind::Normal)).await;
    handle.force_teardown().await;
    session.mark_closed();
    sessions.remove(&session.id);

    info!(
        session_id = %session.id,
        exit_code = ?handle.exit_code(),
        "Execution finished"
    );
}

/// Returns false when the session was closed before the output ended
async fn pump_to_channel(session: &Session, output: &mut OutputSource) -> bool {
    let mut decoder = Utf8Carry::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = session.closed.cancelled() => return false,
            chunk = output.next_chunk() => chunk,
        };

        let Some(bytes) = chunk else {
            break;
        };
        let text = decoder.decode(&bytes);
        if !text.is_empty() && !session.deliver(Outbound::Text(text)).await {
            debug!(session_id = %session.id, "Channel gone while streaming");
            return !session.closed.is_cancelled();
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        session.deliver(Outbound::Text(tail)).await;
    }
    true
}
