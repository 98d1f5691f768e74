use crate::backlog::Backlog;
use crate::config::{TrackerConfig, UploadConfig};
use crate::error::{Result, TrackerError};
use crate::observer::{BacklogObserver, BacklogUpdate};
use crate::sample::Sample;
use crate::source::{PositionSource, SourceEvent};
use crate::statistics::Statistics;
use crate::storage::{self, BlobStore, RecorderState, STATE_BLOB};
use crate::throttle::{Clock, ThrottleGate};
use crate::upload::{self, TransportBuilder, UploadTransport};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SOURCE_EVENT_BUFFER: usize = 64;

/// Recording state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    /// Not subscribed to continuous updates
    Idle,
    /// Subscribed to the position source
    Recording,
}

/// Commands accepted by [`TrackingCoordinator::run`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    /// Record a single fix without starting continuous recording
    AddOne,
    Clear,
    /// Re-send the current backlog to observers
    Broadcast,
    RereadConfig(TrackerConfig),
    /// Flush and leave the command loop
    Shutdown,
}

/// External services the coordinator drives
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn BlobStore>,
    pub transport: Arc<dyn UploadTransport>,
    pub source: Arc<dyn PositionSource>,
    pub clock: Arc<dyn Clock>,
}

struct Inner {
    state: RecordingState,
    single_shot_pending: bool,
    config: TrackerConfig,
    backlog: Backlog,
    save_gate: ThrottleGate,
    upload_gate: ThrottleGate,
    next_seq: u64,
}

impl Inner {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Work decided under the lock, carried out after it is released
#[derive(Default)]
struct Effects {
    update: Option<(u64, BacklogUpdate)>,
    persist: Option<(u64, Vec<Sample>)>,
    upload: Option<(u64, PendingUpload)>,
    state: Option<(u64, RecorderState)>,
}

struct PendingUpload {
    transport: Arc<dyn UploadTransport>,
    remote_name: String,
    samples: Vec<Sample>,
}

/// Owns the backlog and both throttle gates and sequences everything else:
/// fix in, backlog mutation, throttled persistence and upload, observer
/// notification.
///
/// All backlog and gate mutations go through one mutex. Storage and upload
/// run on spawned tokio tasks with a snapshot taken under that mutex, so the
/// methods here must be called from within a tokio runtime. Their failures are
/// logged and never reach the caller.
///
/// Observers always see updates in the order the backlog changed; an update
/// that loses a race against a newer one is dropped rather than delivered late.
pub struct TrackingCoordinator {
    inner: Mutex<Inner>,
    storage: Arc<dyn BlobStore>,
    // Lock order: `inner` before `transport`
    transport: RwLock<Arc<dyn UploadTransport>>,
    transport_builder: Option<TransportBuilder>,
    source: Arc<dyn PositionSource>,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn BacklogObserver>>,
    events_tx: mpsc::Sender<SourceEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<SourceEvent>>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    // Sequence number of the last update handed to observers
    notified: Mutex<u64>,
    // Highest sequence number written so far, per write target
    persist_order: Arc<tokio::sync::Mutex<u64>>,
    upload_order: Arc<tokio::sync::Mutex<u64>>,
    state_order: Arc<tokio::sync::Mutex<u64>>,
}

impl TrackingCoordinator {
    /// Create an idle coordinator with an empty backlog. Call
    /// [`restore`](Self::restore) to pick up persisted state.
    pub fn new(config: TrackerConfig, collaborators: Collaborators) -> Self {
        let (events_tx, events_rx) = mpsc::channel(SOURCE_EVENT_BUFFER);

        let inner = Inner {
            state: RecordingState::Idle,
            single_shot_pending: false,
            backlog: Backlog::new(config.max_locations),
            save_gate: ThrottleGate::new(config.save_interval_millis()),
            upload_gate: ThrottleGate::new(config.upload_interval_millis()),
            config,
            next_seq: 0,
        };

        Self {
            inner: Mutex::new(inner),
            storage: collaborators.storage,
            transport: RwLock::new(collaborators.transport),
            transport_builder: None,
            source: collaborators.source,
            clock: collaborators.clock,
            observers: Vec::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            pending: Mutex::new(Vec::new()),
            notified: Mutex::new(0),
            persist_order: Arc::new(tokio::sync::Mutex::new(0)),
            upload_order: Arc::new(tokio::sync::Mutex::new(0)),
            state_order: Arc::new(tokio::sync::Mutex::new(0)),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn BacklogObserver>) {
        self.observers.push(observer);
    }

    /// Rebuild the upload transport whenever a settings reload changes the
    /// upload section. Without a builder the initial transport and upload
    /// settings are kept.
    pub fn set_transport_builder(&mut self, builder: TransportBuilder) {
        self.transport_builder = Some(builder);
    }

    /// Load the persisted backlog and recording flag.
    ///
    /// A missing or unreadable backlog blob yields an empty backlog. Observers
    /// get the restored backlog, and recording resumes if it was active when
    /// the flag was last written.
    pub async fn restore(&self) -> Result<()> {
        let samples = match storage::load_backlog(self.storage.as_ref()).await {
            Ok(Some(samples)) => {
                log::info!("Read {} previous locations from storage", samples.len());
                samples
            }
            Err(TrackerError::Codec(e)) => {
                log::warn!("Discarding unreadable backlog blob: {}", e);
                Vec::new()
            }
            Ok(None) => {
                log::debug!("No previous backlog on storage");
                Vec::new()
            }
            Err(e) => {
                log::warn!("Could not read backlog from storage: {}", e);
                Vec::new()
            }
        };

        let resume = match self.storage.load(STATE_BLOB).await {
            Ok(Some(bytes)) => match RecorderState::from_json_bytes(&bytes) {
                Ok(state) => state.recording,
                Err(e) => {
                    log::warn!("Discarding unreadable recorder state: {}", e);
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                log::warn!("Could not read recorder state: {}", e);
                false
            }
        };

        {
            let mut inner = self.lock()?;
            let capacity = inner.config.max_locations;
            inner.backlog = Backlog::from_samples(capacity, samples);
        }
        self.broadcast()?;

        if resume {
            log::info!("Recording was active before restart, resuming");
            self.start()?;
        }
        Ok(())
    }

    /// Idle → Recording. Starting while already recording is a no-op: the
    /// existing subscription and both gate clocks are left alone.
    pub fn start(&self) -> Result<()> {
        let (params, effects) = {
            let mut inner = self.lock()?;
            if inner.state == RecordingState::Recording {
                log::debug!("start(): already recording");
                return Ok(());
            }
            inner.state = RecordingState::Recording;
            inner.single_shot_pending = false;

            let mut effects = Effects::default();
            effects.state = Some((inner.seq(), RecorderState { recording: true }));
            effects.update = Some((inner.seq(), Self::update_of(&inner)));
            (inner.config.update_params(), effects)
        };

        log::info!(
            "Recording started (min time {}ms, min distance {}m)",
            params.min_time_ms,
            params.min_distance_m
        );
        if let Err(e) = self.source.subscribe(params, self.events_tx.clone()) {
            log::error!("Could not subscribe to position source: {}", e);
            if let Ok(mut inner) = self.inner.lock() {
                inner.state = RecordingState::Idle;
            }
            return Err(e);
        }

        self.apply(effects);
        Ok(())
    }

    /// Recording → Idle. Unsubscribes immediately, then forces a final save
    /// and upload. Stopping while idle does nothing.
    pub fn stop(&self) -> Result<()> {
        let effects = {
            let mut inner = self.lock()?;
            if inner.state == RecordingState::Idle {
                log::debug!("stop(): not recording");
                return Ok(());
            }
            inner.state = RecordingState::Idle;
            inner.single_shot_pending = false;
            self.source.unsubscribe();

            let mut effects = self.decide(&mut inner, true);
            effects.state = Some((inner.seq(), RecorderState { recording: false }));
            effects
        };

        log::info!("Recording stopped");
        self.apply(effects);
        Ok(())
    }

    /// Ask the source for one fix. While recording there is nothing to do.
    pub fn add_one(&self) -> Result<()> {
        let params = {
            let mut inner = self.lock()?;
            if inner.state == RecordingState::Recording {
                log::debug!("add_one(): already recording, next fix will be recorded anyway");
                return Ok(());
            }
            inner.single_shot_pending = true;
            inner.config.update_params()
        };

        self.source.subscribe(params, self.events_tx.clone())
    }

    /// Append a fix and run throttled persistence, notification and upload.
    ///
    /// Fixes arriving while idle are dropped unless a single fix was
    /// requested or `accept_idle_fixes` is configured.
    pub fn on_sample(&self, sample: Sample) -> Result<()> {
        let effects = {
            let mut inner = self.lock()?;
            if inner.state == RecordingState::Idle {
                if inner.single_shot_pending {
                    inner.single_shot_pending = false;
                    self.source.unsubscribe();
                } else if !inner.config.accept_idle_fixes {
                    log::debug!("Dropping fix received while idle");
                    return Ok(());
                }
            }

            inner.backlog.append(sample);
            self.decide(&mut inner, false)
        };

        self.apply(effects);
        Ok(())
    }

    /// Empty the backlog and force a save and upload so storage and the
    /// remote copy reflect the clear.
    pub fn on_clear(&self) -> Result<()> {
        let effects = {
            let mut inner = self.lock()?;
            inner.backlog.clear();
            self.decide(&mut inner, true)
        };

        log::info!("Backlog cleared");
        self.apply(effects);
        Ok(())
    }

    pub fn on_provider_availability_changed(&self, available: bool) {
        log::debug!("Provider availability: {}", available);
        for observer in &self.observers {
            observer.on_provider_availability(available);
        }
    }

    /// Send the current backlog to observers without touching it
    pub fn broadcast(&self) -> Result<()> {
        let (seq, update) = {
            let mut inner = self.lock()?;
            (inner.seq(), Self::update_of(&inner))
        };
        self.notify(seq, &update);
        Ok(())
    }

    /// Apply new settings. Capacity shrinks evict oldest samples, gate clocks
    /// are kept, and an active recording is re-subscribed with the new cadence.
    /// A changed upload section rebuilds the transport; if that fails the
    /// previous upload settings and transport stay in effect.
    pub fn reread_config(&self, mut config: TrackerConfig) -> Result<()> {
        log::info!(
            "Settings reloaded: max locations {}, save every {}min, upload every {}s",
            config.max_locations,
            config.save_interval_mins,
            config.upload_interval_secs
        );

        let upload_changed = self.lock()?.config.upload != config.upload;
        let transport = if upload_changed {
            self.rebuild_transport(&config.upload)
        } else {
            None
        };

        let (resubscribe, seq, update) = {
            let mut inner = self.lock()?;
            match transport {
                Some(transport) => {
                    *self.transport.write().map_err(|_| {
                        TrackerError::Internal("Failed to acquire transport lock".to_string())
                    })? = transport;
                }
                None if upload_changed => config.upload = inner.config.upload.clone(),
                None => {}
            }
            inner.backlog.set_capacity(config.max_locations);
            inner.save_gate.set_interval_millis(config.save_interval_millis());
            inner.upload_gate.set_interval_millis(config.upload_interval_millis());
            inner.config = config;

            let resubscribe = (inner.state == RecordingState::Recording)
                .then(|| inner.config.update_params());
            (resubscribe, inner.seq(), Self::update_of(&inner))
        };

        if let Some(params) = resubscribe {
            self.source.subscribe(params, self.events_tx.clone())?;
        }
        self.notify(seq, &update);
        Ok(())
    }

    fn rebuild_transport(&self, upload: &UploadConfig) -> Option<Arc<dyn UploadTransport>> {
        let Some(build) = self.transport_builder.as_ref() else {
            log::warn!("Upload target is fixed, ignoring changed upload settings");
            return None;
        };
        match build(upload) {
            Ok(transport) => Some(transport),
            Err(e) => {
                log::error!("Keeping previous upload settings: {}", e);
                None
            }
        }
    }

    /// Process-exit flush: unsubscribe, force save and upload, keep the
    /// persisted recording flag so the next start can resume.
    pub fn shutdown(&self) -> Result<()> {
        self.source.unsubscribe();
        let effects = {
            let mut inner = self.lock()?;
            let mut effects = self.decide(&mut inner, true);
            effects.update = None;
            effects
        };
        self.apply(effects);
        Ok(())
    }

    pub fn handle_command(&self, command: Command) -> Result<()> {
        log::debug!("Handling command {:?}", command);
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::AddOne => self.add_one(),
            Command::Clear => self.on_clear(),
            Command::Broadcast => self.broadcast(),
            Command::RereadConfig(config) => self.reread_config(config),
            Command::Shutdown => self.shutdown(),
        }
    }

    pub fn handle_event(&self, event: SourceEvent) -> Result<()> {
        match event {
            SourceEvent::Fix(sample) => self.on_sample(sample),
            SourceEvent::ProviderAvailability(available) => {
                self.on_provider_availability_changed(available);
                Ok(())
            }
        }
    }

    /// Command loop: serves commands and source events until `Shutdown`
    /// arrives or every command sender is dropped, then flushes and waits for
    /// outstanding writes.
    pub async fn run(&self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        let mut events = self
            .events_rx
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire event lock".to_string()))?
            .take()
            .ok_or_else(|| TrackerError::Internal("Command loop already running".to_string()))?;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        if let Err(e) = self.handle_command(command) {
                            log::error!("Command failed: {}", e);
                        }
                    }
                },
                Some(event) = events.recv() => {
                    if let Err(e) = self.handle_event(event) {
                        log::error!("Could not process position event: {}", e);
                    }
                }
            }
        }

        log::info!("Shutting down, flushing backlog");
        self.shutdown()?;
        self.wait_idle().await;
        Ok(())
    }

    /// Wait for every spawned save and upload to finish
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = match self.pending.lock() {
                Ok(mut pending) => pending.drain(..).collect(),
                Err(_) => return,
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        log::error!("Background write panicked: {}", e);
                    }
                }
            }
        }
    }

    pub fn state(&self) -> Result<RecordingState> {
        Ok(self.lock()?.state)
    }

    pub fn is_recording(&self) -> Result<bool> {
        Ok(self.state()? == RecordingState::Recording)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.backlog.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn snapshot(&self) -> Result<Vec<Sample>> {
        Ok(self.lock()?.backlog.snapshot())
    }

    pub fn statistics(&self) -> Result<Statistics> {
        Ok(*self.lock()?.backlog.statistics())
    }

    pub fn config(&self) -> Result<TrackerConfig> {
        Ok(self.lock()?.config.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire coordinator lock".to_string()))
    }

    fn update_of(inner: &Inner) -> BacklogUpdate {
        BacklogUpdate {
            samples: inner.backlog.snapshot(),
            statistics: *inner.backlog.statistics(),
            recording: inner.state == RecordingState::Recording,
        }
    }

    /// Check both gates and snapshot what the caller must do after unlocking
    fn decide(&self, inner: &mut Inner, force: bool) -> Effects {
        let now = self.clock.now_millis();
        let update = Self::update_of(inner);
        let mut effects = Effects::default();

        if inner.save_gate.try_fire(now, force) {
            effects.persist = Some((inner.seq(), update.samples.clone()));
        }
        if inner.upload_gate.try_fire(now, force) {
            match self.transport.read() {
                Ok(transport) => {
                    let pending = PendingUpload {
                        transport: Arc::clone(&transport),
                        remote_name: inner.config.upload.remote_name.clone(),
                        samples: update.samples.clone(),
                    };
                    effects.upload = Some((inner.seq(), pending));
                }
                Err(_) => log::error!("Transport lock poisoned, skipping upload"),
            }
        }
        effects.update = Some((inner.seq(), update));
        effects
    }

    fn apply(&self, effects: Effects) {
        if let Some((seq, samples)) = effects.persist {
            self.spawn_persist(seq, samples);
        }
        if let Some((seq, state)) = effects.state {
            self.spawn_state_write(seq, state);
        }
        if let Some((seq, update)) = &effects.update {
            self.notify(*seq, update);
        }
        if let Some((seq, pending)) = effects.upload {
            self.spawn_upload(seq, pending);
        }
    }

    /// Deliver `update` unless a newer one already went out. The guard is held
    /// while observers run so deliveries never interleave.
    fn notify(&self, seq: u64, update: &BacklogUpdate) {
        let Ok(mut delivered) = self.notified.lock() else {
            log::error!("Observer lock poisoned, dropping update #{}", seq);
            return;
        };
        if seq <= *delivered {
            log::debug!("Dropping stale update #{} (#{} delivered)", seq, *delivered);
            return;
        }
        *delivered = seq;

        for observer in &self.observers {
            observer.on_backlog(update);
        }
    }

    fn spawn_persist(&self, seq: u64, samples: Vec<Sample>) {
        let store = Arc::clone(&self.storage);
        self.spawn_ordered(&self.persist_order, seq, async move {
            match storage::save_backlog(store.as_ref(), &samples).await {
                Ok(()) => log::info!("Saved {} locations to storage", samples.len()),
                Err(e) => log::warn!("Could not save backlog: {}", e),
            }
        });
    }

    fn spawn_state_write(&self, seq: u64, state: RecorderState) {
        let storage = Arc::clone(&self.storage);
        self.spawn_ordered(&self.state_order, seq, async move {
            let result = match state.to_json_bytes() {
                Ok(bytes) => storage.save(STATE_BLOB, &bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                log::warn!("Could not save recorder state: {}", e);
            }
        });
    }

    fn spawn_upload(&self, seq: u64, pending: PendingUpload) {
        self.spawn_ordered(&self.upload_order, seq, async move {
            let PendingUpload {
                transport,
                remote_name,
                samples,
            } = pending;
            let payload = upload::format_payload(&samples);
            match transport.store(&remote_name, &payload).await {
                Ok(()) => log::info!("Uploaded {} locations to {}", samples.len(), remote_name),
                Err(e) => log::error!("Upload of {} failed: {}", remote_name, e),
            }
        });
    }

    /// Run `job` unless a newer write to the same target already ran.
    /// Writes to one target are serialized by its order lock.
    fn spawn_ordered<F>(&self, order: &Arc<tokio::sync::Mutex<u64>>, seq: u64, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let order = Arc::clone(order);
        let handle = tokio::spawn(async move {
            let mut last = order.lock().await;
            if seq <= *last {
                log::debug!("Skipping stale write #{} (#{} already written)", seq, *last);
                return;
            }
            *last = seq;
            job.await;
        });

        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }
}
