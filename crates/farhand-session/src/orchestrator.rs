//! The task that drives one session through its lifecycle.
//!
//! Setup runs strictly in order: control connection, handshake, control
//! channel, then the data and clipboard channels in parallel behind a
//! startup barrier. Once running, the orchestrator is the only writer of
//! session state. It serves local requests and peer signals one at a time,
//! so a suspend never interleaves with a close.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use farhand_clipboard::ClipboardProvider;
use farhand_input::{InputSink, InputSource};
use farhand_protocol::transport;
use farhand_protocol::{
    ChannelKind, ChannelRendezvous, Handshake, ProtocolError, SecureChannel, SessionKeys,
    SignalSigner, SignalVerifier,
};
use farhand_types::{LifecycleSignal, Role, SessionId};
use tokio::io::WriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::Config;
use crate::error::SessionError;
use crate::queue::InputEventQueue;
use crate::residual::ResidualStateTracker;
use crate::state::{SessionState, StateCell};
use crate::worker::clipboard::{ClipboardJob, ClipboardWorker, Exchange};
use crate::worker::control::{self, ControlEvent, ControlLink};
use crate::worker::{data, ChannelOrigin};

const CONTROL_EVENTS: usize = 16;
const WORKER_FAILURES: usize = 4;

/// A local lifecycle request with its acknowledgement.
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) signal: LifecycleSignal,
    pub(crate) ack: oneshot::Sender<Result<(), SessionError>>,
}

/// Role-specific setup input.
pub(crate) enum Plan {
    Client {
        address: String,
        port: u16,
        source: Box<dyn InputSource>,
    },
    Server {
        listener: TcpListener,
        sink: Arc<dyn InputSink>,
    },
}

/// Who asked for a lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Peer,
}

/// What the loop does after handling one change.
enum Flow {
    Continue,
    Finished,
}

/// Role-specific resources while the session is up.
enum Endpoint {
    Client {
        source: Box<dyn InputSource>,
        started: bool,
    },
    Server {
        sink: Arc<dyn InputSink>,
        residual: Arc<Mutex<ResidualStateTracker>>,
    },
}

impl Endpoint {
    async fn stop_source(&mut self) {
        if let Self::Client { source, started } = self {
            if std::mem::take(started) {
                if let Err(e) = source.stop().await {
                    warn!(error = %e, "failed to stop input source");
                }
            }
        }
    }

    async fn release_held(&mut self) {
        if let Self::Server { sink, residual } = self {
            data::release_held(residual, sink.as_ref()).await;
        }
    }
}

/// Everything the running phase owns.
struct Live {
    control: ControlLink<WriteHalf<TcpStream>>,
    control_events: mpsc::Receiver<ControlEvent>,
    failures: mpsc::Receiver<SessionError>,
    jobs: Option<mpsc::Sender<ClipboardJob>>,
    queue: Arc<InputEventQueue>,
    endpoint: Endpoint,
    /// Data and clipboard workers, joined with a grace period on shutdown.
    workers: JoinSet<()>,
    /// Control reader and input pump, aborted on shutdown.
    helpers: JoinSet<()>,
}

pub(crate) struct Orchestrator {
    id: SessionId,
    role: Role,
    password: String,
    config: Config,
    cell: Arc<StateCell>,
    requests: mpsc::Receiver<Request>,
    /// Fired by the handle: stop listening, or close once running.
    stop: CancellationToken,
    /// Fired by the orchestrator to stop its workers.
    cancel: CancellationToken,
}

impl Orchestrator {
    pub(crate) fn new(
        id: SessionId,
        role: Role,
        password: String,
        config: Config,
        cell: Arc<StateCell>,
        requests: mpsc::Receiver<Request>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            id,
            role,
            password,
            config,
            cell,
            requests,
            stop,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the session to a terminal state.
    pub(crate) async fn run(
        mut self,
        plan: Plan,
        clipboard: Box<dyn ClipboardProvider>,
    ) -> SessionState {
        let span = tracing::info_span!("session", session = %self.id, role = %self.role);
        async move {
            match self.establish(plan, clipboard).await {
                Ok(mut live) => match self.begin(&mut live).await {
                    Ok(()) => self.serve(&mut live).await,
                    Err(e) => self.crash(&mut live, &e).await,
                },
                Err(e) => {
                    // Workers spawned so far are aborted with their JoinSet.
                    self.cell.crash(&e);
                    self.cancel.cancel();
                }
            }
            self.cell.state()
        }
        .instrument(span)
        .await
    }

    async fn establish(
        &mut self,
        plan: Plan,
        clipboard: Box<dyn ClipboardProvider>,
    ) -> Result<Live, SessionError> {
        self.cell.transition(SessionState::Connecting)?;
        let session = self.config.session.clone();

        let (mut stream, endpoint, rendezvous) = match plan {
            Plan::Client {
                address,
                port,
                source,
            } => {
                info!(%address, port, "connecting");
                let stream = self
                    .cancellable(transport::connect(&address, port, session.connect_timeout()))
                    .await?;
                (stream, Endpoint::Client { source, started: false }, None)
            }
            Plan::Server { listener, sink } => {
                info!(local = ?listener.local_addr().ok(), "waiting for client");
                let (stream, remote) = self
                    .cancellable(async { listener.accept().await.map_err(ProtocolError::from) })
                    .await?;
                stream.set_nodelay(true).map_err(ProtocolError::from)?;
                info!(%remote, "client connected");
                let endpoint = Endpoint::Server {
                    sink,
                    residual: Arc::new(Mutex::new(ResidualStateTracker::new())),
                };
                (stream, endpoint, Some(listener))
            }
        };
        self.cell.transition(SessionState::Connected)?;

        self.cell.transition(SessionState::Authenticating)?;
        let salt_endpoint = transport::server_endpoint(&stream, self.role)?;
        let handshake = Handshake::new(self.role, &self.password, &salt_endpoint);
        let keys = self
            .staged("handshake", session.handshake_timeout(), handshake.run(&mut stream))
            .await?;
        self.cell.transition(SessionState::Authenticated)?;

        let server_addr = stream.peer_addr().map_err(ProtocolError::from)?;
        let control = self
            .staged(
                "opening control channel",
                session.handshake_timeout(),
                SecureChannel::open(stream, keys.channel_key(ChannelKind::Control)),
            )
            .await?;
        debug!("control channel up");

        let queue = Arc::new(InputEventQueue::new(session.queue_capacity));
        let (failures_tx, failures) = mpsc::channel(WORKER_FAILURES);
        let (jobs_tx, jobs) = mpsc::channel(1);
        let (data_ready, data_up) = oneshot::channel();
        let (clipboard_ready, clipboard_up) = oneshot::channel();

        let mut rendezvous = rendezvous.map(|listener| {
            ChannelRendezvous::spawn(listener, keys.clone(), session.startup_timeout())
        });
        let data_origin = self.origin(ChannelKind::Data, server_addr, &keys, rendezvous.as_mut())?;
        let clipboard_origin =
            self.origin(ChannelKind::Clipboard, server_addr, &keys, rendezvous.as_mut())?;

        let mut workers = JoinSet::new();
        match &endpoint {
            Endpoint::Client { .. } => {
                workers.spawn(
                    data::run_sender(
                        data_origin,
                        Arc::clone(&queue),
                        data_ready,
                        failures_tx,
                        self.cancel.clone(),
                    )
                    .in_current_span(),
                );
            }
            Endpoint::Server { sink, residual } => {
                workers.spawn(
                    data::run_receiver(
                        data_origin,
                        Arc::clone(&queue),
                        Arc::clone(residual),
                        Arc::clone(sink),
                        data_ready,
                        failures_tx,
                        self.cancel.clone(),
                    )
                    .in_current_span(),
                );
            }
        }
        let worker = ClipboardWorker::new(self.role, clipboard, self.config.clipboard.clone());
        workers.spawn(
            worker
                .run(clipboard_origin, jobs, clipboard_ready, self.cancel.clone())
                .in_current_span(),
        );

        self.startup_barrier(data_up, clipboard_up).await?;
        drop(rendezvous);
        info!("all channels up");

        let (reader, writer) = control.into_split();
        let (events_tx, control_events) = mpsc::channel(CONTROL_EVENTS);
        let mut helpers = JoinSet::new();
        helpers.spawn(
            control::read_signals(
                reader,
                SignalVerifier::new(keys.clone()),
                events_tx,
                self.cancel.clone(),
            )
            .in_current_span(),
        );

        Ok(Live {
            control: ControlLink::new(writer, SignalSigner::new(keys)),
            control_events,
            failures,
            jobs: Some(jobs_tx),
            queue,
            endpoint,
            workers,
            helpers,
        })
    }

    /// Enter `Running`: initial clipboard exchange, then start the source.
    async fn begin(&mut self, live: &mut Live) -> Result<(), SessionError> {
        self.cell.transition(SessionState::Running)?;
        self.exchange(live.jobs.clone(), Exchange::Open).await?;
        self.start_source(live).await
    }

    fn origin(
        &self,
        kind: ChannelKind,
        server: SocketAddr,
        keys: &SessionKeys,
        rendezvous: Option<&mut ChannelRendezvous>,
    ) -> Result<ChannelOrigin, SessionError> {
        let timeout = self.config.session.startup_timeout();
        match rendezvous {
            None => Ok(ChannelOrigin::Join {
                server,
                keys: keys.clone(),
                timeout,
            }),
            Some(rendezvous) => {
                let joined = rendezvous.take(kind).ok_or_else(|| {
                    SessionError::StartupFailure(format!("{kind} channel already claimed"))
                })?;
                Ok(ChannelOrigin::Rendezvous { joined, timeout })
            }
        }
    }

    async fn startup_barrier(
        &self,
        data: oneshot::Receiver<Result<(), SessionError>>,
        clipboard: oneshot::Receiver<Result<(), SessionError>>,
    ) -> Result<(), SessionError> {
        async fn up(
            ready: oneshot::Receiver<Result<(), SessionError>>,
            kind: ChannelKind,
        ) -> Result<(), SessionError> {
            ready.await.unwrap_or_else(|_| {
                Err(SessionError::StartupFailure(format!("{kind} worker exited")))
            })
        }

        let barrier = tokio::time::timeout(self.config.session.startup_timeout(), async {
            tokio::try_join!(up(data, ChannelKind::Data), up(clipboard, ChannelKind::Clipboard))
        });
        let outcome = tokio::select! {
            () = self.stop.cancelled() => return Err(SessionError::Cancelled),
            outcome = barrier => outcome,
        };
        match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(SessionError::Cancelled)) => Err(SessionError::Cancelled),
            Ok(Err(e)) => Err(SessionError::StartupFailure(e.to_string())),
            Err(_) => Err(SessionError::StartupFailure(
                "channels not up in time".to_string(),
            )),
        }
    }

    async fn start_source(&self, live: &mut Live) -> Result<(), SessionError> {
        let Endpoint::Client { source, started } = &mut live.endpoint else {
            return Ok(());
        };
        let (tx, rx) = mpsc::channel(self.config.session.queue_capacity);
        source.start(tx).await?;
        *started = true;
        live.helpers
            .spawn(data::pump(rx, Arc::clone(&live.queue)).in_current_span());
        debug!("input source started");
        Ok(())
    }

    /// Serve requests and peer signals until the session ends.
    async fn serve(&mut self, live: &mut Live) {
        loop {
            let result = tokio::select! {
                biased;
                () = self.stop.cancelled() => {
                    info!("stop requested");
                    self.apply(live, LifecycleSignal::Close, Origin::Local).await
                }
                Some(event) = live.control_events.recv() => self.on_control(live, event).await,
                Some(e) = live.failures.recv() => Err(e),
                request = self.requests.recv() => match request {
                    Some(Request { signal, ack }) => {
                        let result = self.apply(live, signal, Origin::Local).await;
                        match result {
                            Ok(flow) => {
                                let _ = ack.send(Ok(()));
                                Ok(flow)
                            }
                            Err(e) if !is_fatal(&e) => {
                                let _ = ack.send(Err(e));
                                Ok(Flow::Continue)
                            }
                            Err(e) => {
                                self.crash(live, &e).await;
                                let _ = ack.send(Err(e));
                                return;
                            }
                        }
                    }
                    None => {
                        info!("session handle dropped");
                        self.apply(live, LifecycleSignal::Close, Origin::Local).await
                    }
                },
            };
            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished) => return,
                Err(e) => {
                    self.crash(live, &e).await;
                    return;
                }
            }
        }
    }

    async fn on_control(&mut self, live: &mut Live, event: ControlEvent) -> Result<Flow, SessionError> {
        match event {
            ControlEvent::Signal(signal) => {
                info!(%signal, "peer signal");
                self.apply(live, signal, Origin::Peer).await
            }
            ControlEvent::Rejected(e) => {
                warn!(error = %e, "dropped control message");
                self.cell.set_recoverable_error();
                Ok(Flow::Continue)
            }
            ControlEvent::Closed => Err(SessionError::Network(ProtocolError::StreamClosed)),
            ControlEvent::Failed(e) => Err(SessionError::from(e)),
        }
    }

    async fn apply(
        &mut self,
        live: &mut Live,
        signal: LifecycleSignal,
        origin: Origin,
    ) -> Result<Flow, SessionError> {
        let state = self.cell.state();
        match (state, signal) {
            (SessionState::Running, LifecycleSignal::Suspend) => {
                self.suspend(live, origin).await?;
                Ok(Flow::Continue)
            }
            (SessionState::Suspended, LifecycleSignal::Resume) => {
                self.resume(live, origin).await?;
                Ok(Flow::Continue)
            }
            (SessionState::Running | SessionState::Suspended, LifecycleSignal::Close) => {
                self.close(live, origin).await;
                Ok(Flow::Finished)
            }
            (SessionState::Running, LifecycleSignal::Resume)
            | (SessionState::Suspended, LifecycleSignal::Suspend) => {
                debug!(%state, %signal, ?origin, "already there, ignoring");
                Ok(Flow::Continue)
            }
            (from, signal) => Err(SessionError::InvalidTransition {
                from,
                to: target_of(signal),
            }),
        }
    }

    async fn suspend(&mut self, live: &mut Live, origin: Origin) -> Result<(), SessionError> {
        live.queue.clear_and_suspend();
        self.cell.transition(SessionState::Suspended)?;
        if origin == Origin::Local {
            live.control.send(LifecycleSignal::Suspend).await?;
        }
        self.exchange(live.jobs.clone(), Exchange::Suspend).await
    }

    async fn resume(&mut self, live: &mut Live, origin: Origin) -> Result<(), SessionError> {
        if origin == Origin::Local {
            live.control.send(LifecycleSignal::Resume).await?;
        }
        self.cell.transition(SessionState::Running)?;
        // Records may arrive before our side of the exchange finishes.
        if matches!(live.endpoint, Endpoint::Server { .. }) {
            live.queue.enable();
        }
        self.exchange(live.jobs.clone(), Exchange::Resume).await?;
        live.queue.enable();
        Ok(())
    }

    /// Shut down cleanly. Failures past this point are logged, not fatal.
    async fn close(&mut self, live: &mut Live, origin: Origin) {
        if self.cell.state() == SessionState::Suspended {
            let resumed = match origin {
                Origin::Local => self.resume(live, origin).await,
                Origin::Peer => self.cell.transition(SessionState::Running),
            };
            if let Err(e) = resumed {
                self.crash(live, &e).await;
                return;
            }
        }
        if let Err(e) = self.cell.transition(SessionState::Closing) {
            self.crash(live, &e).await;
            return;
        }

        live.endpoint.stop_source().await;
        live.queue.clear_and_close();
        if origin == Origin::Local {
            if let Err(e) = live.control.send(LifecycleSignal::Close).await {
                warn!(error = %e, "failed to send close signal");
            }
        }
        if let Err(e) = self.exchange(live.jobs.clone(), Exchange::Close).await {
            warn!(error = %e, "final clipboard exchange failed");
        }
        live.control.shutdown().await;
        self.wind_down(live).await;

        if let Err(e) = self.cell.transition(SessionState::Closed) {
            warn!(error = %e, "could not mark session closed");
        }
        info!("session closed");
    }

    async fn crash(&mut self, live: &mut Live, reason: &SessionError) {
        if !self.cell.crash(reason) {
            return;
        }
        self.cancel.cancel();
        live.endpoint.stop_source().await;
        live.queue.clear_and_close();
        self.wind_down(live).await;
    }

    async fn wind_down(&mut self, live: &mut Live) {
        live.jobs = None;
        let grace = self.config.session.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while live.workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(grace_ms = grace.as_millis(), "workers still busy, aborting them");
        }
        self.cancel.cancel();
        live.workers.shutdown().await;
        live.helpers.shutdown().await;
        live.endpoint.release_held().await;
    }

    /// Run one clipboard exchange through the worker.
    ///
    /// Takes its own job sender so no borrow of `Live` is held across the wait.
    async fn exchange(
        &self,
        jobs: Option<mpsc::Sender<ClipboardJob>>,
        exchange: Exchange,
    ) -> Result<(), SessionError> {
        let jobs = jobs.ok_or(SessionError::SessionGone)?;
        let (done, outcome) = oneshot::channel();
        let worker_gone = || SessionError::Network(ProtocolError::StreamClosed);
        jobs.send(ClipboardJob { exchange, done })
            .await
            .map_err(|_| worker_gone())?;
        let outcome = tokio::time::timeout(self.config.session.clipboard_timeout(), outcome)
            .await
            .map_err(|_| SessionError::Network(ProtocolError::Timeout("clipboard exchange")))?
            .map_err(|_| worker_gone())??;
        if outcome.is_degraded() {
            self.cell.set_recoverable_error();
        }
        Ok(())
    }

    /// Race a setup step against a stop request.
    async fn cancellable<T>(
        &self,
        step: impl Future<Output = Result<T, ProtocolError>>,
    ) -> Result<T, SessionError> {
        tokio::select! {
            () = self.stop.cancelled() => Err(SessionError::Cancelled),
            result = step => Ok(result?),
        }
    }

    /// Race a setup step against a stop request and a deadline.
    async fn staged<T>(
        &self,
        what: &'static str,
        limit: Duration,
        step: impl Future<Output = Result<T, ProtocolError>>,
    ) -> Result<T, SessionError> {
        self.cancellable(async {
            match tokio::time::timeout(limit, step).await {
                Ok(result) => result,
                Err(_) => Err(ProtocolError::Timeout(what)),
            }
        })
        .await
    }
}

/// The state a lifecycle signal moves the session to.
pub(crate) fn target_of(signal: LifecycleSignal) -> SessionState {
    match signal {
        LifecycleSignal::Suspend => SessionState::Suspended,
        LifecycleSignal::Resume => SessionState::Running,
        LifecycleSignal::Close => SessionState::Closing,
    }
}

/// Errors that end the session when they hit a request.
fn is_fatal(error: &SessionError) -> bool {
    !matches!(error, SessionError::InvalidTransition { .. })
}
