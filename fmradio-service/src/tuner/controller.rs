//! Tuner controller task and its handle.
//!
//! All state lives in [`ControllerTask`], which drains backend events and
//! caller requests on one task. Handles enqueue requests and wait for the
//! task to accept or reject them; accepted requests complete later through a
//! [`Completion`].

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use fmradio_protocol::{
    BackendCommand, BackendEvent, MuteState, RequestKind, SeekDirection, TunerError, TunerState,
};

use super::configuration::{Configuration, ConfigurationStore};
use super::pending::{Claim, Completion, Outcome, PendingRequest, PendingTable, Reply};
use super::TunerConfig;
use crate::backend::TunerBackend;
use crate::database::{
    KeyValueStore, StationList, KEY_AUTOPLAY, KEY_LAST_FREQUENCY, KEY_RDS_ENABLE,
};
use crate::sink::{EventSink, TunerEvent};

/// External collaborators of the controller.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn KeyValueStore>,
    pub stations: Arc<dyn StationList>,
    pub sink: Arc<dyn EventSink>,
}

/// Consistent view of the controller, taken on the controller task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub state: TunerState,
    pub configuration: Configuration,
    /// Number of requests waiting for the backend.
    pub pending: usize,
    pub rds_enabled: bool,
}

/// Result of a hardware seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekResult {
    pub frequency: u32,
    pub found: bool,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Init,
    Enable,
    Disable,
    Tune(u32),
    Jump(SeekDirection),
    Seek(SeekDirection),
    Search,
    SetMute(MuteState),
    SetStereo(bool),
    GetRssi,
    Kill,
    Status,
}

struct Request {
    op: Operation,
    /// Synchronous acceptance or rejection. None for follow-ups.
    ack: Option<oneshot::Sender<Result<(), TunerError>>>,
    done: Option<Reply>,
}

impl Request {
    fn follow_up(op: Operation) -> Self {
        Self {
            op,
            ack: None,
            done: None,
        }
    }

    fn reject(self, error: TunerError) {
        match self.ack {
            Some(ack) => {
                let _ = ack.send(Err(error));
            }
            None => warn!("[Controller] Follow-up {:?} rejected: {}", self.op, error),
        }
    }

    fn accept(self) -> Option<Reply> {
        if let Some(ack) = self.ack {
            let _ = ack.send(Ok(()));
        }
        self.done
    }

    fn complete(self, result: Result<Outcome, TunerError>) {
        if let Some(reply) = self.accept() {
            let _ = reply.send(result);
        }
    }
}

fn done(outcome: Outcome) -> Option<()> {
    matches!(outcome, Outcome::Done).then_some(())
}

fn frequency(outcome: Outcome) -> Option<u32> {
    match outcome {
        Outcome::Frequency(khz) => Some(khz),
        _ => None,
    }
}

/// Handle to a running tuner controller.
#[derive(Clone)]
pub struct TunerController {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<TunerState>,
    configuration: watch::Receiver<Configuration>,
}

impl TunerController {
    /// Start the controller task.
    ///
    /// `events` is the event receiver of `backend`. The task ends after
    /// `kill` or once every handle is dropped.
    pub fn spawn(
        backend: Box<dyn TunerBackend>,
        events: mpsc::Receiver<BackendEvent>,
        collaborators: Collaborators,
        config: TunerConfig,
    ) -> (Self, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::channel(config.request_queue.max(1));
        let (state_tx, state_rx) = watch::channel(TunerState::Uninitialized);
        let configuration = ConfigurationStore::new(Configuration::new(config.default_frequency));
        let configuration_rx = configuration.subscribe();

        info!(
            "[Controller] Using {} backend, band {}",
            backend.name(),
            config.band
        );

        let task = ControllerTask {
            config,
            backend: Some(backend),
            events: Some(events),
            settings: collaborators.settings,
            stations: collaborators.stations,
            sink: collaborators.sink,
            state: TunerState::Uninitialized,
            state_tx,
            configuration,
            pending: PendingTable::new(),
            follow_ups: VecDeque::new(),
            rds_enabled: true,
            killed: false,
        };
        let handle = tokio::spawn(task.run(request_rx));

        (
            Self {
                requests: request_tx,
                state: state_rx,
                configuration: configuration_rx,
            },
            handle,
        )
    }

    pub fn state(&self) -> TunerState {
        *self.state.borrow()
    }

    /// Snapshot of the current configuration.
    pub fn configuration(&self) -> Configuration {
        self.configuration.borrow().clone()
    }

    pub fn subscribe_configuration(&self) -> watch::Receiver<Configuration> {
        self.configuration.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TunerState> {
        self.state.clone()
    }

    async fn submit<T>(
        &self,
        op: Operation,
        extract: fn(Outcome) -> Option<T>,
    ) -> Result<Completion<T>, TunerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let request = Request {
            op,
            ack: Some(ack_tx),
            done: Some(done_tx),
        };

        self.requests
            .send(request)
            .await
            .map_err(|_| TunerError::Dead)?;
        ack_rx.await.map_err(|_| TunerError::Dead)??;

        Ok(Completion::new(done_rx, extract))
    }

    /// Load persisted settings and publish the ready event.
    pub async fn init(&self) -> Result<Completion<()>, TunerError> {
        self.submit(Operation::Init, done).await
    }

    /// Power the tuner on, then tune to the persisted frequency.
    pub async fn enable(&self) -> Result<Completion<()>, TunerError> {
        self.submit(Operation::Enable, done).await
    }

    pub async fn disable(&self) -> Result<Completion<()>, TunerError> {
        self.submit(Operation::Disable, done).await
    }

    /// Tune to `khz`. A still pending tune is superseded.
    pub async fn set_frequency(&self, khz: u32) -> Result<Completion<u32>, TunerError> {
        self.submit(Operation::Tune(khz), frequency).await
    }

    /// Tune one channel step up or down, wrapping at the band edges.
    pub async fn jump(&self, direction: SeekDirection) -> Result<Completion<u32>, TunerError> {
        self.submit(Operation::Jump(direction), frequency).await
    }

    pub async fn hardware_seek(
        &self,
        direction: SeekDirection,
    ) -> Result<Completion<SeekResult>, TunerError> {
        self.submit(Operation::Seek(direction), |outcome| match outcome {
            Outcome::Seek { frequency, found } => Some(SeekResult { frequency, found }),
            _ => None,
        })
        .await
    }

    /// Scan the whole band. Resolves with the found frequencies, ascending.
    pub async fn search(&self) -> Result<Completion<Vec<u32>>, TunerError> {
        self.submit(Operation::Search, |outcome| match outcome {
            Outcome::Stations(stations) => Some(stations),
            _ => None,
        })
        .await
    }

    pub async fn set_mute(&self, state: MuteState) -> Result<Completion<MuteState>, TunerError> {
        self.submit(Operation::SetMute(state), |outcome| match outcome {
            Outcome::Mute(state) => Some(state),
            _ => None,
        })
        .await
    }

    pub async fn set_stereo(&self, enabled: bool) -> Result<Completion<bool>, TunerError> {
        self.submit(Operation::SetStereo(enabled), |outcome| match outcome {
            Outcome::Stereo(enabled) => Some(enabled),
            _ => None,
        })
        .await
    }

    /// Request a fresh signal strength reading.
    pub async fn get_rssi(&self) -> Result<Completion<i32>, TunerError> {
        self.submit(Operation::GetRssi, |outcome| match outcome {
            Outcome::Rssi(level) => Some(level),
            _ => None,
        })
        .await
    }

    /// Cancel all pending work and release the backend. Valid in any state.
    pub async fn kill(&self) -> Result<Completion<()>, TunerError> {
        match self.submit(Operation::Kill, done).await {
            Err(TunerError::Dead) => Ok(Completion::resolved(Ok(Outcome::Done), done)),
            other => other,
        }
    }

    /// Query the controller task for a consistent status snapshot.
    pub async fn status(&self) -> Result<ControllerStatus, TunerError> {
        self.submit(Operation::Status, |outcome| match outcome {
            Outcome::Status(status) => Some(*status),
            _ => None,
        })
        .await?
        .await
    }
}

/// The controller event loop. Sole owner of all tuner state.
struct ControllerTask {
    config: TunerConfig,
    backend: Option<Box<dyn TunerBackend>>,
    events: Option<mpsc::Receiver<BackendEvent>>,
    settings: Arc<dyn KeyValueStore>,
    stations: Arc<dyn StationList>,
    sink: Arc<dyn EventSink>,
    state: TunerState,
    state_tx: watch::Sender<TunerState>,
    configuration: ConfigurationStore,
    pending: PendingTable,
    /// Operations queued by event handlers, run on the next loop turn.
    follow_ups: VecDeque<Operation>,
    rds_enabled: bool,
    killed: bool,
}

async fn next_event(events: &mut Option<mpsc::Receiver<BackendEvent>>) -> Option<BackendEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl ControllerTask {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        debug!("[Controller] Event loop started");

        while !self.killed {
            if let Some(op) = self.follow_ups.pop_front() {
                self.handle_request(Request::follow_up(op)).await;
                continue;
            }

            let deadline = self.pending.next_deadline();
            tokio::select! {
                biased;

                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event),
                    None => self.backend_lost("backend output closed"),
                },

                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        info!("[Controller] All handles dropped, stopping");
                        break;
                    }
                },

                _ = wait_until(deadline) => self.expire_pending(),
            }
        }

        self.shutdown().await;
        debug!("[Controller] Event loop stopped");
    }

    async fn shutdown(&mut self) {
        for request in self.pending.drain() {
            request.resolve(Err(TunerError::Killed));
        }
        if let Some(mut backend) = self.backend.take() {
            backend.close().await;
        }
    }

    async fn handle_request(&mut self, request: Request) {
        let op = request.op;
        debug!("[Controller] Request {:?} in state {}", op, self.state);

        if self.state.is_dead() && !matches!(op, Operation::Kill | Operation::Status) {
            request.reject(TunerError::Dead);
            return;
        }

        match op {
            Operation::Init => self.init(request),
            Operation::Enable => self.enable(request).await,
            Operation::Disable => self.disable(request).await,
            Operation::Tune(khz) => self.tune(request, khz).await,
            Operation::Jump(direction) => {
                let khz = self
                    .config
                    .band
                    .jump(self.configuration.frequency(), direction);
                self.tune(request, khz).await
            }
            Operation::Seek(direction) => {
                self.start_exclusive(request, BackendCommand::Seek(direction))
                    .await
            }
            Operation::Search => self.start_exclusive(request, BackendCommand::Search).await,
            Operation::SetMute(state) => {
                let target = u32::from(state.wire_flag());
                self.replace(request, BackendCommand::SetMute(state), Some(target))
                    .await
            }
            Operation::SetStereo(enabled) => {
                let target = u32::from(enabled);
                self.replace(request, BackendCommand::SetStereo(enabled), Some(target))
                    .await
            }
            Operation::GetRssi => self.get_rssi(request).await,
            Operation::Kill => self.kill(request).await,
            Operation::Status => {
                let status = self.status();
                request.complete(Ok(Outcome::Status(Box::new(status))));
            }
        }
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            configuration: self.configuration.get(),
            pending: self.pending.len(),
            rds_enabled: self.rds_enabled,
        }
    }

    fn check_ready(&self) -> Result<(), TunerError> {
        if self.state.accepts_tuning() {
            Ok(())
        } else {
            Err(TunerError::NotReady(self.state))
        }
    }

    /// Persisted last frequency, forced into the band.
    fn persisted_frequency(&self) -> u32 {
        let band = self.config.band;
        let khz = self
            .settings
            .get_u32(KEY_LAST_FREQUENCY, self.configuration.frequency());
        if band.contains(khz) {
            khz
        } else {
            let clamped = band.clamp(khz);
            warn!(
                "[Controller] Persisted frequency {} kHz outside band {}, using {} kHz",
                khz, band, clamped
            );
            clamped
        }
    }

    fn init(&mut self, request: Request) {
        if self.state != TunerState::Uninitialized {
            debug!("[Controller] Already initialized");
            request.complete(Ok(Outcome::Done));
            return;
        }

        let last_frequency = self.persisted_frequency();
        let autoplay = self.settings.get_bool(KEY_AUTOPLAY, false);
        self.rds_enabled = self.settings.get_bool(KEY_RDS_ENABLE, true);

        let stations = self.stations.stations().unwrap_or_else(|e| {
            warn!("[Controller] Failed to load stations: {}", e);
            Vec::new()
        });
        let favorite_stations = self.stations.favorite_stations().unwrap_or_else(|e| {
            warn!("[Controller] Failed to load favorite stations: {}", e);
            Vec::new()
        });

        self.configuration.update(|c| c.frequency = last_frequency);
        self.set_state(TunerState::PoweredOff);

        info!(
            "[Controller] Initialized: last_frequency={} kHz, autoplay={}, rds={}, stations={}, favorites={}",
            last_frequency,
            autoplay,
            self.rds_enabled,
            stations.len(),
            favorite_stations.len()
        );
        self.sink.publish(TunerEvent::Ready {
            last_frequency,
            autoplay,
            rds_enabled: self.rds_enabled,
            stations,
            favorite_stations,
        });

        request.complete(Ok(Outcome::Done));
    }

    async fn enable(&mut self, request: Request) {
        match self.state {
            TunerState::PoweredOff => {}
            TunerState::Ready | TunerState::PoweringOn => {
                debug!("[Controller] Enable ignored, state {}", self.state);
                request.reject(TunerError::AlreadyEnabled);
                return;
            }
            state => {
                request.reject(TunerError::NotReady(state));
                return;
            }
        }

        let khz = self.persisted_frequency();
        self.rds_enabled = self.settings.get_bool(KEY_RDS_ENABLE, true);
        self.configuration.update(|c| c.frequency = khz);

        self.set_state(TunerState::PoweringOn);
        if let Err(e) = self.send(&BackendCommand::PowerOn).await {
            request.reject(e);
            return;
        }
        self.track(request, RequestKind::Enable, None);
    }

    async fn disable(&mut self, request: Request) {
        if self.state != TunerState::Ready {
            request.reject(TunerError::NotReady(self.state));
            return;
        }

        self.set_state(TunerState::PoweringOff);
        if let Err(e) = self.send(&BackendCommand::PowerOff).await {
            request.reject(e);
            return;
        }
        self.track(request, RequestKind::Disable, None);
    }

    async fn tune(&mut self, request: Request, khz: u32) {
        if let Err(e) = self.check_ready() {
            request.reject(e);
            return;
        }

        let band = self.config.band;
        if !band.contains(khz) {
            request.reject(TunerError::OutOfRange {
                frequency: khz,
                min: band.min_khz(),
                max: band.max_khz(),
            });
            return;
        }

        self.replace(request, BackendCommand::Tune(khz), Some(khz))
            .await;
    }

    /// Dispatch a command that replaces any pending one of the same kind.
    async fn replace(&mut self, request: Request, command: BackendCommand, target: Option<u32>) {
        if let Err(e) = self.check_ready() {
            request.reject(e);
            return;
        }

        if let Err(e) = self.send(&command).await {
            request.reject(e);
            return;
        }

        let kind = command.kind();
        let superseded = self.pending.supersede(kind);
        if superseded > 0 {
            debug!("[Controller] {} superseded {} pending request(s)", kind, superseded);
        }
        self.track(request, kind, target);
    }

    /// Dispatch a seek or search. Only one may be in flight.
    async fn start_exclusive(&mut self, request: Request, command: BackendCommand) {
        if let Err(e) = self.check_ready() {
            request.reject(e);
            return;
        }

        let busy = [RequestKind::Seek, RequestKind::Search]
            .into_iter()
            .find(|kind| self.pending.contains(*kind));
        if let Some(kind) = busy {
            request.reject(TunerError::Busy(kind));
            return;
        }

        if let Err(e) = self.send(&command).await {
            request.reject(e);
            return;
        }
        self.track(request, command.kind(), None);
    }

    async fn get_rssi(&mut self, request: Request) {
        if let Err(e) = self.check_ready() {
            request.reject(e);
            return;
        }
        if self.pending.contains(RequestKind::GetRssi) {
            request.reject(TunerError::Busy(RequestKind::GetRssi));
            return;
        }

        if let Err(e) = self.send(&BackendCommand::GetRssi).await {
            request.reject(e);
            return;
        }
        self.track(request, RequestKind::GetRssi, None);
    }

    async fn kill(&mut self, request: Request) {
        info!("[Controller] Kill requested in state {}", self.state);

        let pending = self.pending.drain();
        if !pending.is_empty() {
            info!("[Controller] Cancelling {} pending request(s)", pending.len());
        }
        for pending_request in pending {
            pending_request.resolve(Err(TunerError::Killed));
        }
        self.follow_ups.clear();

        if self.state != TunerState::Uninitialized {
            let khz = self.configuration.frequency();
            if let Err(e) = self.settings.put_u32(KEY_LAST_FREQUENCY, khz) {
                warn!("[Controller] Failed to persist last frequency: {}", e);
            }
        }

        self.events = None;
        if let Some(mut backend) = self.backend.take() {
            backend.close().await;
        }

        self.set_state(TunerState::Dead);
        self.killed = true;
        request.complete(Ok(Outcome::Done));
    }

    /// Send a command. A channel failure kills the controller.
    async fn send(&mut self, command: &BackendCommand) -> Result<(), TunerError> {
        let backend = self.backend.as_mut().ok_or(TunerError::Dead)?;
        debug!("[Controller] -> {:?}", command);

        match backend.execute(command).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    "[Controller] Failed to send {:?} to {} backend: {}",
                    command,
                    backend.name(),
                    e
                );
                let reason = e.to_string();
                self.backend_lost(&reason);
                Err(TunerError::BackendUnavailable(reason))
            }
        }
    }

    fn track(&mut self, request: Request, kind: RequestKind, target: Option<u32>) {
        let timeout = self.config.timeouts.for_kind(kind);
        let reply = request.accept();
        self.pending
            .push(PendingRequest::new(kind, target, reply, timeout));
    }

    fn backend_lost(&mut self, reason: &str) {
        error!("[Controller] Backend lost: {}", reason);
        self.events = None;
        self.follow_ups.clear();
        for request in self.pending.drain() {
            request.resolve(Err(TunerError::BackendLost));
        }
        self.set_state(TunerState::Dead);
    }

    /// Fail everything still waiting on the backend.
    fn cancel_pending(&mut self, error: TunerError) {
        self.follow_ups.clear();
        let pending = self.pending.drain();
        if !pending.is_empty() {
            info!("[Controller] Cancelling {} pending request(s): {}", pending.len(), error);
        }
        for request in pending {
            request.resolve(Err(error.clone()));
        }
    }

    fn expire_pending(&mut self) {
        for request in self.pending.expire(Instant::now()) {
            let kind = request.kind;
            warn!(
                "[Controller] {} timed out after {:?}",
                kind,
                request.issued_at.elapsed()
            );
            self.fail(request, TunerError::Timeout(kind));
        }
    }

    /// Fail a request. Failed power transitions still end in `PoweredOff`.
    fn fail(&mut self, request: PendingRequest, error: TunerError) {
        match request.kind {
            RequestKind::Enable if self.state == TunerState::PoweringOn => {
                self.set_state(TunerState::PoweredOff)
            }
            RequestKind::Disable if self.state == TunerState::PoweringOff => {
                self.set_state(TunerState::PoweredOff)
            }
            _ => {}
        }
        request.resolve(Err(error));
    }

    fn set_state(&mut self, state: TunerState) {
        if self.state == state {
            return;
        }
        info!("[Controller] State {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.sink.publish(TunerEvent::StateChanged(state));
    }

    fn handle_event(&mut self, event: BackendEvent) {
        debug!("[Controller] <- {:?}", event);

        match event {
            BackendEvent::FrequencySet(khz) => match self.pending.claim(RequestKind::Tune, Some(khz)) {
                Claim::Matched(request) => {
                    self.apply_frequency(khz, true);
                    request.resolve(Ok(Outcome::Frequency(khz)));
                }
                Claim::Stale => debug!("[Controller] Dropping stale tune ack ({} kHz)", khz),
                Claim::Unsolicited => self.apply_frequency(khz, false),
            },

            BackendEvent::RssiValue(level) => {
                let claim = self.pending.claim(RequestKind::GetRssi, None);
                self.apply_rssi(level);
                if let Claim::Matched(request) = claim {
                    request.resolve(Ok(Outcome::Rssi(level)));
                }
            }

            BackendEvent::ProgramServiceText(text) => self.apply_program_service(text),

            BackendEvent::SeekResult { frequency, found } => {
                let claim = self.pending.claim(RequestKind::Seek, None);
                let matched = matches!(claim, Claim::Matched(_));
                if found {
                    self.apply_frequency(frequency, matched);
                } else {
                    info!("[Controller] Seek found no station");
                }
                if let Claim::Matched(request) = claim {
                    request.resolve(Ok(Outcome::Seek { frequency, found }));
                }
            }

            BackendEvent::SearchResult(stations) => {
                let claim = self.pending.claim(RequestKind::Search, None);
                info!("[Controller] Search found {} station(s)", stations.len());
                self.sink.publish(TunerEvent::SearchCompleted(stations.clone()));
                if let Claim::Matched(request) = claim {
                    request.resolve(Ok(Outcome::Stations(stations)));
                }
            }

            BackendEvent::MuteAck(state) => {
                let target = u32::from(state.wire_flag());
                match self.pending.claim(RequestKind::SetMute, Some(target)) {
                    Claim::Matched(request) => {
                        self.apply_mute(state);
                        request.resolve(Ok(Outcome::Mute(state)));
                    }
                    Claim::Stale => debug!("[Controller] Dropping stale mute ack ({})", state),
                    Claim::Unsolicited => self.apply_mute(state),
                }
            }

            BackendEvent::StereoAck(enabled) => {
                match self.pending.claim(RequestKind::SetStereo, Some(u32::from(enabled))) {
                    Claim::Matched(request) => {
                        self.apply_stereo(enabled);
                        request.resolve(Ok(Outcome::Stereo(enabled)));
                    }
                    Claim::Stale => debug!("[Controller] Dropping stale stereo ack ({})", enabled),
                    Claim::Unsolicited => self.apply_stereo(enabled),
                }
            }

            BackendEvent::PowerAck(true) => match self.pending.claim(RequestKind::Enable, None) {
                Claim::Matched(request) => {
                    self.set_state(TunerState::Ready);
                    request.resolve(Ok(Outcome::Done));
                    let khz = self.configuration.frequency();
                    self.follow_ups.push_back(Operation::Tune(khz));
                }
                _ => warn!(
                    "[Controller] Unexpected power-on ack in state {}",
                    self.state
                ),
            },

            BackendEvent::PowerAck(false) => match self.pending.claim(RequestKind::Disable, None) {
                Claim::Matched(request) => {
                    self.set_state(TunerState::PoweredOff);
                    self.cancel_pending(TunerError::NotReady(TunerState::PoweredOff));
                    request.resolve(Ok(Outcome::Done));
                }
                _ if self.state == TunerState::Ready => {
                    warn!("[Controller] Tuner powered off by the backend");
                    self.set_state(TunerState::PoweredOff);
                    self.cancel_pending(TunerError::NotReady(TunerState::PoweredOff));
                }
                _ => debug!("[Controller] Ignoring power-off ack in state {}", self.state),
            },

            BackendEvent::Error {
                kind: Some(kind),
                reason,
            } => match self.pending.claim(kind, None) {
                Claim::Matched(request) => {
                    warn!("[Controller] {} failed: {}", kind, reason);
                    self.fail(request, TunerError::Backend(reason));
                }
                Claim::Stale => debug!("[Controller] Dropping stale {} error", kind),
                Claim::Unsolicited => {
                    warn!("[Controller] Backend error for {} with nothing pending: {}", kind, reason)
                }
            },

            BackendEvent::Error { kind: None, reason } => match self.pending.take_oldest() {
                Some(request) => {
                    warn!("[Controller] {} failed: {}", request.kind, reason);
                    self.fail(request, TunerError::Backend(reason));
                }
                None => warn!("[Controller] Backend error with nothing pending: {}", reason),
            },
        }
    }

    /// Record a frequency change. Unconfirmed events only publish real changes.
    ///
    /// Program service text belongs to the old station and is cleared.
    fn apply_frequency(&mut self, khz: u32, confirmed: bool) {
        let mut cleared_ps = false;
        let changed = self.configuration.update(|c| {
            if c.frequency != khz {
                c.frequency = khz;
                cleared_ps = c.program_service.take().is_some();
            }
        });
        if !changed && !confirmed {
            return;
        }

        info!("[Controller] Frequency {} kHz", khz);
        self.sink.publish(TunerEvent::FrequencyChanged(khz));
        if cleared_ps {
            self.sink.publish(TunerEvent::ProgramServiceUpdated(None));
        }
        if let Err(e) = self.settings.put_u32(KEY_LAST_FREQUENCY, khz) {
            warn!("[Controller] Failed to persist last frequency: {}", e);
        }
    }

    fn apply_rssi(&mut self, level: i32) {
        self.configuration.update(|c| c.rssi = Some(level));
        self.sink.publish(TunerEvent::RssiUpdated(level));
    }

    fn apply_program_service(&mut self, text: String) {
        if !self.rds_enabled {
            debug!("[Controller] RDS disabled, ignoring PS {:?}", text);
            return;
        }

        let text = text.trim();
        let value = (!text.is_empty()).then(|| text.to_string());
        if self
            .configuration
            .update(|c| c.program_service = value.clone())
        {
            self.sink.publish(TunerEvent::ProgramServiceUpdated(value));
        }
    }

    fn apply_mute(&mut self, state: MuteState) {
        if self.configuration.update(|c| c.mute_state = state) {
            self.sink.publish(TunerEvent::MuteChanged(state));
        }
    }

    fn apply_stereo(&mut self, enabled: bool) {
        if self.configuration.update(|c| c.stereo = enabled) {
            self.sink.publish(TunerEvent::StereoChanged(enabled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use crate::database::{Database, SharedDatabase};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Records commands; events are injected by the test.
    struct ScriptedBackend {
        commands: Arc<Mutex<Vec<BackendCommand>>>,
        broken: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedBackend {
        fn record(&self, command: BackendCommand) -> Result<(), ChannelError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(ChannelError::BackendUnavailable("broken pipe".to_string()));
            }
            self.commands.lock().push(command);
            Ok(())
        }
    }

    #[async_trait]
    impl TunerBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn power_on(&mut self) -> Result<(), ChannelError> {
            self.record(BackendCommand::PowerOn)
        }

        async fn power_off(&mut self) -> Result<(), ChannelError> {
            self.record(BackendCommand::PowerOff)
        }

        async fn tune(&mut self, khz: u32) -> Result<(), ChannelError> {
            self.record(BackendCommand::Tune(khz))
        }

        async fn seek(&mut self, direction: SeekDirection) -> Result<(), ChannelError> {
            self.record(BackendCommand::Seek(direction))
        }

        async fn search(&mut self) -> Result<(), ChannelError> {
            self.record(BackendCommand::Search)
        }

        async fn set_mute(&mut self, state: MuteState) -> Result<(), ChannelError> {
            self.record(BackendCommand::SetMute(state))
        }

        async fn set_stereo(&mut self, enabled: bool) -> Result<(), ChannelError> {
            self.record(BackendCommand::SetStereo(enabled))
        }

        async fn get_rssi(&mut self) -> Result<(), ChannelError> {
            self.record(BackendCommand::GetRssi)
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<TunerEvent>>);

    impl EventSink for RecordingSink {
        fn publish(&self, event: TunerEvent) {
            self.0.lock().push(event);
        }
    }

    impl RecordingSink {
        fn frequency_changes(&self) -> Vec<u32> {
            self.0
                .lock()
                .iter()
                .filter_map(|e| match e {
                    TunerEvent::FrequencyChanged(khz) => Some(*khz),
                    _ => None,
                })
                .collect()
        }

        fn clear(&self) {
            self.0.lock().clear();
        }
    }

    struct Harness {
        ctl: TunerController,
        events: mpsc::Sender<BackendEvent>,
        commands: Arc<Mutex<Vec<BackendCommand>>>,
        broken: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
        sink: Arc<RecordingSink>,
        db: SharedDatabase,
    }

    fn memory_db() -> SharedDatabase {
        SharedDatabase::new(Database::open_in_memory().unwrap())
    }

    fn harness_with(db: SharedDatabase, config: TunerConfig) -> Harness {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let broken = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let backend = ScriptedBackend {
            commands: commands.clone(),
            broken: broken.clone(),
            closed: closed.clone(),
        };
        let (event_tx, event_rx) = mpsc::channel(16);
        let sink = Arc::new(RecordingSink::default());
        let collaborators = Collaborators {
            settings: Arc::new(db.clone()),
            stations: Arc::new(db.clone()),
            sink: sink.clone(),
        };
        let (ctl, _task) = TunerController::spawn(Box::new(backend), event_rx, collaborators, config);

        Harness {
            ctl,
            events: event_tx,
            commands,
            broken,
            closed,
            sink,
            db,
        }
    }

    fn harness() -> Harness {
        harness_with(memory_db(), TunerConfig::default())
    }

    impl Harness {
        async fn inject(&self, event: BackendEvent) {
            self.events.send(event).await.unwrap();
        }

        /// Wait until the controller has handled everything sent so far.
        async fn settle(&self) {
            let _ = self.ctl.status().await;
        }

        fn commands(&self) -> Vec<BackendCommand> {
            self.commands.lock().clone()
        }

        fn last_command(&self) -> Option<BackendCommand> {
            self.commands.lock().last().cloned()
        }

        /// Drive the tuner to `Ready` and confirm the automatic tune.
        async fn ready(&self) {
            self.ctl.init().await.unwrap().await.unwrap();
            let enabled = self.ctl.enable().await.unwrap();
            self.inject(BackendEvent::PowerAck(true)).await;
            enabled.await.unwrap();
            self.settle().await;

            let khz = match self.last_command() {
                Some(BackendCommand::Tune(khz)) => khz,
                other => panic!("expected automatic tune, got {:?}", other),
            };
            self.inject(BackendEvent::FrequencySet(khz)).await;
            self.settle().await;
            assert_eq!(self.ctl.state(), TunerState::Ready);
        }
    }

    #[tokio::test]
    async fn test_init_loads_settings_and_publishes_ready() {
        let db = memory_db();
        db.put_u32(KEY_LAST_FREQUENCY, 94_500).unwrap();
        db.put_bool(KEY_AUTOPLAY, true).unwrap();
        db.replace_stations(&[99_800, 88_100]).unwrap();
        db.add_favorite_station(94_500, Some("RADIO 1")).unwrap();
        let h = harness_with(db, TunerConfig::default());

        h.ctl.init().await.unwrap().await.unwrap();

        assert_eq!(h.ctl.state(), TunerState::PoweredOff);
        assert_eq!(h.ctl.configuration().frequency, 94_500);
        assert!(h.commands().is_empty());

        let events = h.sink.0.lock().clone();
        let ready = events
            .iter()
            .find(|e| matches!(e, TunerEvent::Ready { .. }))
            .expect("ready event");
        match ready {
            TunerEvent::Ready {
                last_frequency,
                autoplay,
                rds_enabled,
                stations,
                favorite_stations,
            } => {
                assert_eq!(*last_frequency, 94_500);
                assert!(*autoplay);
                assert!(*rds_enabled);
                let frequencies: Vec<u32> = stations.iter().map(|s| s.frequency).collect();
                assert_eq!(frequencies, vec![88_100, 99_800]);
                assert_eq!(favorite_stations.len(), 1);
            }
            _ => unreachable!(),
        }
        assert!(h.sink.frequency_changes().is_empty());

        // A second init is a no-op.
        h.ctl.init().await.unwrap().await.unwrap();
        assert_eq!(h.ctl.state(), TunerState::PoweredOff);
    }

    #[tokio::test]
    async fn test_commands_rejected_before_ready() {
        let h = harness();

        assert!(matches!(
            h.ctl.set_frequency(94_500).await,
            Err(TunerError::NotReady(TunerState::Uninitialized))
        ));
        assert!(matches!(
            h.ctl.enable().await,
            Err(TunerError::NotReady(TunerState::Uninitialized))
        ));

        h.ctl.init().await.unwrap().await.unwrap();
        assert!(matches!(
            h.ctl.set_frequency(94_500).await,
            Err(TunerError::NotReady(TunerState::PoweredOff))
        ));
        assert!(matches!(
            h.ctl.search().await,
            Err(TunerError::NotReady(TunerState::PoweredOff))
        ));
        assert!(matches!(
            h.ctl.disable().await,
            Err(TunerError::NotReady(TunerState::PoweredOff))
        ));
        assert!(h.commands().is_empty());
    }

    #[tokio::test]
    async fn test_enable_auto_tunes_persisted_frequency() {
        let db = memory_db();
        db.put_u32(KEY_LAST_FREQUENCY, 94_500).unwrap();
        let h = harness_with(db, TunerConfig::default());
        h.ctl.init().await.unwrap().await.unwrap();
        assert_eq!(h.ctl.state(), TunerState::PoweredOff);

        let enabled = h.ctl.enable().await.unwrap();
        assert_eq!(h.ctl.state(), TunerState::PoweringOn);
        assert_eq!(h.commands(), vec![BackendCommand::PowerOn]);

        h.inject(BackendEvent::PowerAck(true)).await;
        enabled.await.unwrap();
        h.settle().await;
        assert_eq!(h.ctl.state(), TunerState::Ready);
        assert_eq!(
            h.commands(),
            vec![BackendCommand::PowerOn, BackendCommand::Tune(94_500)]
        );

        h.inject(BackendEvent::FrequencySet(94_500)).await;
        h.settle().await;

        assert_eq!(h.ctl.configuration().frequency, 94_500);
        assert_eq!(h.sink.frequency_changes(), vec![94_500]);
    }

    #[tokio::test]
    async fn test_enable_rejected_when_already_enabled() {
        let h = harness();
        h.ctl.init().await.unwrap().await.unwrap();

        let enabled = h.ctl.enable().await.unwrap();
        assert!(matches!(
            h.ctl.enable().await,
            Err(TunerError::AlreadyEnabled)
        ));

        h.inject(BackendEvent::PowerAck(true)).await;
        enabled.await.unwrap();
        assert!(matches!(
            h.ctl.enable().await,
            Err(TunerError::AlreadyEnabled)
        ));

        let power_ons = h
            .commands()
            .iter()
            .filter(|c| **c == BackendCommand::PowerOn)
            .count();
        assert_eq!(power_ons, 1);
    }

    #[tokio::test]
    async fn test_set_frequency_confirms_and_persists() {
        let h = harness();
        h.ready().await;
        h.inject(BackendEvent::ProgramServiceText("CLASSIC".to_string()))
            .await;
        h.settle().await;
        assert_eq!(
            h.ctl.configuration().program_service.as_deref(),
            Some("CLASSIC")
        );

        let mut config_rx = h.ctl.subscribe_configuration();
        config_rx.borrow_and_update();

        let tuned = h.ctl.set_frequency(99_800).await.unwrap();
        assert_eq!(h.last_command(), Some(BackendCommand::Tune(99_800)));
        h.inject(BackendEvent::FrequencySet(99_800)).await;

        assert_eq!(tuned.await, Ok(99_800));
        let config = h.ctl.configuration();
        assert_eq!(config.frequency, 99_800);
        assert_eq!(config.program_service, None);
        assert_eq!(h.db.get_u32(KEY_LAST_FREQUENCY, 0), 99_800);

        // Frequency and cleared PS arrive in one update.
        config_rx.changed().await.unwrap();
        let seen = config_rx.borrow_and_update().clone();
        assert_eq!(seen.frequency, 99_800);
        assert_eq!(seen.program_service, None);
    }

    #[tokio::test]
    async fn test_out_of_range_is_rejected_without_dispatch() {
        let h = harness();
        h.ready().await;
        let before = h.commands().len();

        match h.ctl.set_frequency(120_000).await {
            Err(TunerError::OutOfRange {
                frequency,
                min,
                max,
            }) => {
                assert_eq!(frequency, 120_000);
                assert_eq!(min, 87_500);
                assert_eq!(max, 108_000);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(h.commands().len(), before);
    }

    #[tokio::test]
    async fn test_newer_tune_supersedes_older() {
        let h = harness();
        h.ready().await;
        h.sink.clear();

        let first = h.ctl.set_frequency(99_800).await.unwrap();
        let second = h.ctl.set_frequency(101_100).await.unwrap();
        assert_eq!(first.await, Err(TunerError::Superseded));

        // The hardware still acknowledges both commands, in order.
        h.inject(BackendEvent::FrequencySet(99_800)).await;
        h.inject(BackendEvent::FrequencySet(101_100)).await;

        assert_eq!(second.await, Ok(101_100));
        assert_eq!(h.ctl.configuration().frequency, 101_100);
        assert_eq!(h.sink.frequency_changes(), vec![101_100]);
    }

    #[tokio::test]
    async fn test_seek_while_search_pending_is_busy() {
        let h = harness();
        h.ready().await;
        let before = h.ctl.configuration();

        let search = h.ctl.search().await.unwrap();
        assert!(matches!(
            h.ctl.hardware_seek(SeekDirection::Up).await,
            Err(TunerError::Busy(RequestKind::Search))
        ));
        assert!(matches!(
            h.ctl.search().await,
            Err(TunerError::Busy(RequestKind::Search))
        ));
        assert_eq!(h.ctl.configuration(), before);
        assert!(!h
            .commands()
            .iter()
            .any(|c| matches!(c, BackendCommand::Seek(_))));

        // Mute is independent of seek/search.
        let muted = h.ctl.set_mute(MuteState::Muted).await.unwrap();
        h.inject(BackendEvent::MuteAck(MuteState::Muted)).await;
        assert_eq!(muted.await, Ok(MuteState::Muted));

        h.inject(BackendEvent::SearchResult(vec![88_100, 94_500])).await;
        assert_eq!(search.await, Ok(vec![88_100, 94_500]));
        assert!(h
            .sink
            .0
            .lock()
            .contains(&TunerEvent::SearchCompleted(vec![88_100, 94_500])));
    }

    #[tokio::test]
    async fn test_seek_result_moves_frequency() {
        let h = harness();
        h.ready().await;

        let seek = h.ctl.hardware_seek(SeekDirection::Down).await.unwrap();
        assert_eq!(
            h.last_command(),
            Some(BackendCommand::Seek(SeekDirection::Down))
        );
        h.inject(BackendEvent::SeekResult {
            frequency: 104_200,
            found: true,
        })
        .await;

        assert_eq!(
            seek.await,
            Ok(SeekResult {
                frequency: 104_200,
                found: true
            })
        );
        assert_eq!(h.ctl.configuration().frequency, 104_200);

        let seek = h.ctl.hardware_seek(SeekDirection::Up).await.unwrap();
        h.inject(BackendEvent::SeekResult {
            frequency: 104_200,
            found: false,
        })
        .await;
        assert!(!seek.await.unwrap().found);
    }

    #[tokio::test]
    async fn test_duplicate_rssi_request_is_busy() {
        let h = harness();
        h.ready().await;

        // Unsolicited reading before the request.
        h.inject(BackendEvent::RssiValue(-90)).await;
        h.settle().await;
        assert_eq!(h.ctl.configuration().rssi, Some(-90));

        let rssi = h.ctl.get_rssi().await.unwrap();
        assert!(matches!(
            h.ctl.get_rssi().await,
            Err(TunerError::Busy(RequestKind::GetRssi))
        ));

        h.inject(BackendEvent::RssiValue(-55)).await;
        assert_eq!(rssi.await, Ok(-55));
        let rssi_commands = h
            .commands()
            .iter()
            .filter(|c| **c == BackendCommand::GetRssi)
            .count();
        assert_eq!(rssi_commands, 1);
    }

    #[tokio::test]
    async fn test_rssi_resolves_with_event_value() {
        let h = harness();
        h.ready().await;

        let rssi = h.ctl.get_rssi().await.unwrap();
        let tuned = h.ctl.set_frequency(94_500).await.unwrap();
        h.inject(BackendEvent::RssiValue(-55)).await;
        h.inject(BackendEvent::FrequencySet(94_500)).await;

        assert_eq!(rssi.await, Ok(-55));
        assert_eq!(tuned.await, Ok(94_500));
        assert_eq!(h.ctl.configuration().rssi, Some(-55));
    }

    #[tokio::test]
    async fn test_mute_and_stereo_acknowledged() {
        let h = harness();
        h.ready().await;

        let muted = h.ctl.set_mute(MuteState::Muted).await.unwrap();
        let mono = h.ctl.set_stereo(false).await.unwrap();
        h.inject(BackendEvent::StereoAck(false)).await;
        h.inject(BackendEvent::MuteAck(MuteState::Muted)).await;

        assert_eq!(muted.await, Ok(MuteState::Muted));
        assert_eq!(mono.await, Ok(false));
        let config = h.ctl.configuration();
        assert_eq!(config.mute_state, MuteState::Muted);
        assert!(!config.stereo);
    }

    #[tokio::test]
    async fn test_newer_mute_supersedes_older() {
        let h = harness();
        h.ready().await;

        let mute = h.ctl.set_mute(MuteState::Muted).await.unwrap();
        let unmute = h.ctl.set_mute(MuteState::Unmuted).await.unwrap();
        assert_eq!(mute.await, Err(TunerError::Superseded));

        h.inject(BackendEvent::MuteAck(MuteState::Muted)).await;
        h.inject(BackendEvent::MuteAck(MuteState::Unmuted)).await;
        assert_eq!(unmute.await, Ok(MuteState::Unmuted));
        assert_eq!(h.ctl.configuration().mute_state, MuteState::Unmuted);
        assert!(!h
            .sink
            .0
            .lock()
            .contains(&TunerEvent::MuteChanged(MuteState::Muted)));
    }

    #[tokio::test]
    async fn test_jump_steps_one_channel() {
        let db = memory_db();
        db.put_u32(KEY_LAST_FREQUENCY, 108_000).unwrap();
        let h = harness_with(db, TunerConfig::default());
        h.ready().await;

        let jumped = h.ctl.jump(SeekDirection::Up).await.unwrap();
        assert_eq!(h.last_command(), Some(BackendCommand::Tune(87_500)));
        h.inject(BackendEvent::FrequencySet(87_500)).await;
        assert_eq!(jumped.await, Ok(87_500));

        let jumped = h.ctl.jump(SeekDirection::Up).await.unwrap();
        assert_eq!(h.last_command(), Some(BackendCommand::Tune(87_600)));
        h.inject(BackendEvent::FrequencySet(87_600)).await;
        assert_eq!(jumped.await, Ok(87_600));
    }

    #[tokio::test]
    async fn test_kill_fails_every_pending_request() {
        let h = harness();
        h.ready().await;

        let tune = h.ctl.set_frequency(99_800).await.unwrap();
        let search = h.ctl.search().await.unwrap();
        let rssi = h.ctl.get_rssi().await.unwrap();
        let mute = h.ctl.set_mute(MuteState::Muted).await.unwrap();

        h.ctl.kill().await.unwrap().await.unwrap();

        assert_eq!(tune.await, Err(TunerError::Killed));
        assert_eq!(search.await, Err(TunerError::Killed));
        assert_eq!(rssi.await, Err(TunerError::Killed));
        assert_eq!(mute.await, Err(TunerError::Killed));

        assert_eq!(h.ctl.state(), TunerState::Dead);
        assert!(h.closed.load(Ordering::SeqCst));
        assert!(matches!(
            h.ctl.set_frequency(94_500).await,
            Err(TunerError::Dead)
        ));
        assert!(matches!(h.ctl.init().await, Err(TunerError::Dead)));

        // Killing again is harmless.
        h.ctl.kill().await.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_persists_current_frequency() {
        let h = harness();
        h.ready().await;
        let tuned = h.ctl.set_frequency(101_100).await.unwrap();
        h.inject(BackendEvent::FrequencySet(101_100)).await;
        tuned.await.unwrap();
        h.db.put_u32(KEY_LAST_FREQUENCY, 0).unwrap();

        h.ctl.kill().await.unwrap().await.unwrap();
        assert_eq!(h.db.get_u32(KEY_LAST_FREQUENCY, 0), 101_100);
    }

    #[tokio::test]
    async fn test_disable_with_ack() {
        let h = harness();
        h.ready().await;

        let disabled = h.ctl.disable().await.unwrap();
        assert_eq!(h.ctl.state(), TunerState::PoweringOff);
        assert_eq!(h.last_command(), Some(BackendCommand::PowerOff));

        h.inject(BackendEvent::PowerAck(false)).await;
        disabled.await.unwrap();
        assert_eq!(h.ctl.state(), TunerState::PoweredOff);

        // Enable again from PoweredOff.
        let enabled = h.ctl.enable().await.unwrap();
        h.inject(BackendEvent::PowerAck(true)).await;
        enabled.await.unwrap();
        assert_eq!(h.ctl.state(), TunerState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_timeout_forces_powered_off() {
        let h = harness();
        h.ready().await;

        let disabled = h.ctl.disable().await.unwrap();
        assert_eq!(disabled.await, Err(TunerError::Timeout(RequestKind::Disable)));
        assert_eq!(h.ctl.state(), TunerState::PoweredOff);

        // A late acknowledgment does not change anything.
        h.inject(BackendEvent::PowerAck(false)).await;
        h.settle().await;
        assert_eq!(h.ctl.state(), TunerState::PoweredOff);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_timeout_reverts_to_powered_off() {
        let h = harness();
        h.ctl.init().await.unwrap().await.unwrap();

        let enabled = h.ctl.enable().await.unwrap();
        assert_eq!(enabled.await, Err(TunerError::Timeout(RequestKind::Enable)));
        assert_eq!(h.ctl.state(), TunerState::PoweredOff);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tune_timeout() {
        let h = harness();
        h.ready().await;

        let started = Instant::now();
        let tuned = h.ctl.set_frequency(99_800).await.unwrap();
        assert_eq!(tuned.await, Err(TunerError::Timeout(RequestKind::Tune)));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(h.ctl.state(), TunerState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tune_ack_does_not_resolve_newer_tune() {
        let h = harness();
        h.ready().await;

        let first = h.ctl.set_frequency(99_800).await.unwrap();
        assert_eq!(first.await, Err(TunerError::Timeout(RequestKind::Tune)));

        let second = h.ctl.set_frequency(101_100).await.unwrap();
        h.inject(BackendEvent::FrequencySet(99_800)).await;
        h.inject(BackendEvent::FrequencySet(101_100)).await;

        assert_eq!(second.await, Ok(101_100));
        h.settle().await;
        assert_eq!(h.ctl.configuration().frequency, 101_100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_seek_result_does_not_resolve_newer_seek() {
        let h = harness();
        h.ready().await;

        let first = h.ctl.hardware_seek(SeekDirection::Up).await.unwrap();
        assert_eq!(first.await, Err(TunerError::Timeout(RequestKind::Seek)));

        let second = h.ctl.hardware_seek(SeekDirection::Up).await.unwrap();
        h.inject(BackendEvent::SeekResult {
            frequency: 104_200,
            found: true,
        })
        .await;
        h.inject(BackendEvent::SeekResult {
            frequency: 106_700,
            found: true,
        })
        .await;

        assert_eq!(
            second.await,
            Ok(SeekResult {
                frequency: 106_700,
                found: true
            })
        );
        h.settle().await;
        assert_eq!(h.ctl.configuration().frequency, 106_700);
    }

    #[tokio::test]
    async fn test_backend_power_off_fails_pending_requests() {
        let h = harness();
        h.ready().await;

        let rssi = h.ctl.get_rssi().await.unwrap();
        let tuned = h.ctl.set_frequency(101_100).await.unwrap();
        h.inject(BackendEvent::PowerAck(false)).await;

        let not_ready = TunerError::NotReady(TunerState::PoweredOff);
        assert_eq!(rssi.await, Err(not_ready.clone()));
        assert_eq!(tuned.await, Err(not_ready));
        let status = h.ctl.status().await.unwrap();
        assert_eq!(status.state, TunerState::PoweredOff);
        assert_eq!(status.pending, 0);
    }

    #[tokio::test]
    async fn test_frequency_change_clears_program_service() {
        let h = harness();
        h.ready().await;
        h.inject(BackendEvent::ProgramServiceText("CLASSIC".to_string()))
            .await;
        h.settle().await;
        h.sink.clear();

        let tuned = h.ctl.set_frequency(99_800).await.unwrap();
        h.inject(BackendEvent::FrequencySet(99_800)).await;
        tuned.await.unwrap();

        assert_eq!(h.ctl.configuration().program_service, None);
        let events = h.sink.0.lock().clone();
        assert_eq!(
            events,
            vec![
                TunerEvent::FrequencyChanged(99_800),
                TunerEvent::ProgramServiceUpdated(None),
            ]
        );
    }

    #[tokio::test]
    async fn test_backend_error_fails_matching_request() {
        let h = harness();
        h.ready().await;
        let before = h.ctl.configuration().frequency;

        let tuned = h.ctl.set_frequency(99_800).await.unwrap();
        h.inject(BackendEvent::Error {
            kind: Some(RequestKind::Tune),
            reason: "no lock".to_string(),
        })
        .await;

        assert_eq!(tuned.await, Err(TunerError::Backend("no lock".to_string())));
        assert_eq!(h.ctl.configuration().frequency, before);
        assert_eq!(h.ctl.state(), TunerState::Ready);
    }

    #[tokio::test]
    async fn test_unparseable_output_fails_oldest_request() {
        let h = harness();
        h.ready().await;

        let rssi = h.ctl.get_rssi().await.unwrap();
        let search = h.ctl.search().await.unwrap();
        h.inject(BackendEvent::Error {
            kind: None,
            reason: "Unknown response: garbage".to_string(),
        })
        .await;

        assert!(matches!(rssi.await, Err(TunerError::Backend(_))));
        h.inject(BackendEvent::SearchResult(vec![])).await;
        assert_eq!(search.await, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_backend_loss_fails_pending_requests() {
        let h = harness();
        h.ready().await;

        let rssi = h.ctl.get_rssi().await.unwrap();
        let Harness { ctl, events, .. } = h;
        drop(events);

        assert_eq!(rssi.await, Err(TunerError::BackendLost));
        assert_eq!(ctl.state(), TunerState::Dead);
        assert!(matches!(ctl.get_rssi().await, Err(TunerError::Dead)));
        ctl.kill().await.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal() {
        let h = harness();
        h.ready().await;

        let pending = h.ctl.get_rssi().await.unwrap();
        h.broken.store(true, Ordering::SeqCst);

        assert!(matches!(
            h.ctl.set_frequency(99_800).await,
            Err(TunerError::BackendUnavailable(_))
        ));
        assert_eq!(pending.await, Err(TunerError::BackendLost));
        assert_eq!(h.ctl.state(), TunerState::Dead);
    }

    #[tokio::test]
    async fn test_persisted_frequency_restored_after_restart() {
        let db = memory_db();

        let first = harness_with(db.clone(), TunerConfig::default());
        first.ready().await;
        let tuned = first.ctl.set_frequency(101_100).await.unwrap();
        first.inject(BackendEvent::FrequencySet(101_100)).await;
        tuned.await.unwrap();
        first.ctl.kill().await.unwrap().await.unwrap();

        let second = harness_with(db, TunerConfig::default());
        second.ready().await;
        assert_eq!(
            second.commands(),
            vec![BackendCommand::PowerOn, BackendCommand::Tune(101_100)]
        );
        assert_eq!(second.ctl.configuration().frequency, 101_100);
    }

    #[tokio::test]
    async fn test_program_service_respects_rds_flag() {
        let h = harness();
        h.ready().await;
        h.inject(BackendEvent::ProgramServiceText("  JAZZ ".to_string()))
            .await;
        h.settle().await;
        assert_eq!(h.ctl.configuration().program_service.as_deref(), Some("JAZZ"));

        let db = memory_db();
        db.put_bool(KEY_RDS_ENABLE, false).unwrap();
        let h = harness_with(db, TunerConfig::default());
        h.ready().await;
        h.inject(BackendEvent::ProgramServiceText("JAZZ".to_string()))
            .await;
        let status = h.ctl.status().await.unwrap();
        assert!(!status.rds_enabled);
        assert_eq!(status.configuration.program_service, None);
    }

    #[tokio::test]
    async fn test_unsolicited_frequency_change_is_published_once() {
        let h = harness();
        h.ready().await;
        h.sink.clear();

        h.inject(BackendEvent::FrequencySet(91_300)).await;
        h.inject(BackendEvent::FrequencySet(91_300)).await;
        h.settle().await;

        assert_eq!(h.ctl.configuration().frequency, 91_300);
        assert_eq!(h.sink.frequency_changes(), vec![91_300]);
    }

    #[tokio::test]
    async fn test_band_limits_follow_config() {
        let config = TunerConfig {
            band: fmradio_protocol::BandRegion::Japan,
            default_frequency: 80_000,
            ..TunerConfig::default()
        };
        let h = harness_with(memory_db(), config);
        h.ready().await;
        assert_eq!(h.ctl.configuration().frequency, 80_000);

        assert!(matches!(
            h.ctl.set_frequency(99_800).await,
            Err(TunerError::OutOfRange { max: 95_000, .. })
        ));
    }
}
