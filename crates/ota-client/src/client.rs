//! The client driver.
//!
//! [`UpdateClient`] is the handle the presentation layer calls. All session
//! mutation happens in [`Engine`], a single task that consumes outbound
//! notices and inbound replies from one ordered queue.

use crate::builder::RequestBuilder;
use crate::config::ClientConfig;
use crate::dispatcher::{Dispatch, Dispatcher, Effect};
use crate::error::ClientError;
use crate::session::{Operation, SessionState, Status, StatusKind};
use crate::transport::{Connection, Transport};
use ota_core::{Channel, Message, Progress, Request, Stage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Status(Status),
    Progress { stage: Stage, progress: Progress },
    Bound,
    Unbound,
}

enum Input {
    Sent { id: u64, request: Request },
    SendFailed { id: u64 },
    Inbound(Message),
    Bound,
    Disconnected,
    Reset,
    Notice(Status),
    Flush(oneshot::Sender<()>),
}

struct Binding {
    generation: u64,
    transport: Arc<dyn Transport>,
    reader: JoinHandle<()>,
}

type SharedBinding = Arc<Mutex<Option<Binding>>>;

/// Handle for driving an update session.
pub struct UpdateClient {
    builder: RequestBuilder,
    binding: SharedBinding,
    inputs: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<Event>,
    next_id: AtomicU64,
    generations: AtomicU64,
}

/// The single consumer that owns session state. Run it with `tokio::spawn`.
pub struct Engine {
    dispatcher: Dispatcher,
    inputs: mpsc::UnboundedReceiver<Input>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<Event>,
}

impl UpdateClient {
    pub fn new(config: &ClientConfig) -> (Self, Engine) {
        let initial = SessionState::new(config.preferences);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial.clone());
        let (events, _) = broadcast::channel(64);

        tracing::info!("Session for {} created", config.endpoint);

        let client = Self {
            builder: RequestBuilder::new(config.reply_to()),
            binding: Arc::new(Mutex::new(None)),
            inputs: input_tx,
            state: state_rx,
            events: events.clone(),
            next_id: AtomicU64::new(1),
            generations: AtomicU64::new(0),
        };
        let engine = Engine {
            dispatcher: Dispatcher::new(initial),
            inputs: input_rx,
            state: state_tx,
            events,
        };
        (client, engine)
    }

    /// Attach to the service. Replaces any current binding.
    pub fn bind(&self, connection: Connection) {
        let Connection {
            outbound,
            mut inbound,
        } = connection;
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let inputs = self.inputs.clone();
        let binding = self.binding.clone();

        // Hold the slot while spawning so the reader cannot observe it before
        // this binding is installed.
        let mut slot = self.lock_binding();
        let reader = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                if inputs.send(Input::Inbound(message)).is_err() {
                    return;
                }
            }
            tracing::info!("Service disconnected");
            let ours = {
                let mut guard = binding.lock().unwrap_or_else(|e| e.into_inner());
                if guard.as_ref().is_some_and(|b| b.generation == generation) {
                    *guard = None;
                    true
                } else {
                    false
                }
            };
            if ours {
                let _ = inputs.send(Input::Disconnected);
            }
        });
        let previous = slot.replace(Binding {
            generation,
            transport: outbound,
            reader,
        });
        drop(slot);
        if let Some(previous) = previous {
            previous.reader.abort();
            let _ = self.inputs.send(Input::Disconnected);
        }
        let _ = self.inputs.send(Input::Bound);
        tracing::info!("Service is connected");
    }

    /// Detach from the service. Unanswered requests are orphaned.
    pub fn unbind(&self) {
        if let Some(binding) = self.lock_binding().take() {
            binding.reader.abort();
            let _ = self.inputs.send(Input::Disconnected);
            tracing::info!("Service unbound");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.lock_binding().is_some()
    }

    /// Current session state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every committed state.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn query_os_version(&self) -> Result<u64, ClientError> {
        self.submit(Operation::QueryOsVersion)
    }

    pub fn search(&self, include_all_channels: bool) -> Result<u64, ClientError> {
        self.submit(Operation::Search {
            include_all_channels,
        })
    }

    /// Download the current candidate.
    pub fn download(&self) -> Result<u64, ClientError> {
        self.submit(Operation::Download)
    }

    /// Install the validated download.
    pub fn install(&self) -> Result<u64, ClientError> {
        self.submit(Operation::Install)
    }

    pub fn set_channel_preference(&self, channel: Channel) -> Result<u64, ClientError> {
        self.submit(Operation::SetChannel(channel))
    }

    pub fn set_wifi_only(&self, wifi_only: bool) -> Result<u64, ClientError> {
        self.submit(Operation::SetWifiOnly(wifi_only))
    }

    /// Start a fresh session, keeping preferences.
    pub fn reset(&self) -> Result<(), ClientError> {
        self.inputs
            .send(Input::Reset)
            .map_err(|_| ClientError::EngineStopped)
    }

    /// Wait until the engine has processed everything queued so far.
    pub async fn flush(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.inputs
            .send(Input::Flush(tx))
            .map_err(|_| ClientError::EngineStopped)?;
        rx.await.map_err(|_| ClientError::EngineStopped)
    }

    /// Send one operation. Returns the request id.
    ///
    /// Phase gating is advisory: an operation the current phase does not enable
    /// is logged and sent anyway.
    pub fn submit(&self, op: Operation) -> Result<u64, ClientError> {
        let Some(transport) = self.lock_binding().as_ref().map(|b| b.transport.clone()) else {
            tracing::error!("Service not bound");
            self.notice(Status::new(
                StatusKind::Transport,
                "Service not bound, try again",
            ));
            return Err(ClientError::NotBound);
        };

        let snapshot = self.snapshot();
        if !snapshot.enabled_operations().allows(&op) {
            tracing::warn!("{:?} is not enabled in phase {}", op, snapshot.phase);
        }
        let request = self.builder.resolve(op, &snapshot)?;
        let kind = request.kind();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.inputs
            .send(Input::Sent {
                id,
                request: request.clone(),
            })
            .map_err(|_| ClientError::EngineStopped)?;

        let message = self.builder.build(request, id);
        match transport.send(message) {
            Ok(()) => {
                tracing::info!("Sent {} (request {})", kind, id);
                Ok(id)
            }
            Err(e) => {
                tracing::error!("Sending {} failed: {}", kind, e);
                let _ = self.inputs.send(Input::SendFailed { id });
                self.notice(Status::new(
                    StatusKind::Transport,
                    format!("Could not reach service: {e}"),
                ));
                Err(ClientError::TransportFailure(e))
            }
        }
    }

    fn notice(&self, status: Status) {
        let _ = self.inputs.send(Input::Notice(status));
    }

    fn lock_binding(&self) -> std::sync::MutexGuard<'_, Option<Binding>> {
        self.binding.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for UpdateClient {
    fn drop(&mut self) {
        if let Some(binding) = self.lock_binding().take() {
            binding.reader.abort();
        }
    }
}

impl Engine {
    /// Process inputs until every client handle is gone.
    pub async fn run(mut self) {
        while let Some(input) = self.inputs.recv().await {
            self.handle(input);
        }
        tracing::debug!("Session engine stopped");
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Sent { id, request } => {
                let effect = self.dispatcher.request_sent(id, &request);
                self.publish(effect);
            }
            Input::SendFailed { id } => {
                self.dispatcher.request_failed(id);
            }
            Input::Inbound(message) => self.inbound(&message),
            Input::Bound => {
                let _ = self.events.send(Event::Bound);
            }
            Input::Disconnected => {
                let orphaned = self.dispatcher.disconnected();
                if orphaned > 0 {
                    tracing::warn!("{} request(s) left unanswered", orphaned);
                }
                let _ = self.events.send(Event::Unbound);
            }
            Input::Reset => self.dispatcher.reset(),
            Input::Notice(status) => {
                let _ = self.events.send(Event::Status(status));
            }
            Input::Flush(done) => {
                let _ = done.send(());
            }
        }
        self.commit();
    }

    fn inbound(&mut self, message: &Message) {
        match self.dispatcher.dispatch(message) {
            Ok(Dispatch::Applied(effect)) => self.publish(effect),
            Ok(Dispatch::Dropped(reason)) => {
                tracing::warn!("Dropped message {}: {:?}", message.discriminant, reason);
            }
            Err(e) => {
                tracing::error!("Invalid message payload: {}", e);
                let status = Status::new(StatusKind::InvalidPayload, format!("Error {e}"));
                let _ = self.events.send(Event::Status(status));
            }
        }
    }

    fn publish(&self, effect: Effect) {
        if let Some((stage, progress)) = effect.progress {
            tracing::debug!("{} progress: {}", stage, progress);
            let _ = self.events.send(Event::Progress { stage, progress });
        }
        if let Some(status) = effect.status {
            tracing::info!("{}", status);
            let _ = self.events.send(Event::Status(status));
        }
    }

    fn commit(&self) {
        let current = self.dispatcher.state();
        self.state.send_if_modified(|published| {
            if published == current {
                false
            } else {
                *published = current.clone();
                true
            }
        });
    }
}
