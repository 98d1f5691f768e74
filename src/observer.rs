use crate::format;
use crate::sample::Sample;
use crate::statistics::Statistics;
use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use tokio::sync::watch;

/// What observers receive after every backlog change
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacklogUpdate {
    pub samples: Vec<Sample>,
    pub statistics: Statistics,
    pub recording: bool,
}

impl BacklogUpdate {
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

/// Receiver of backlog snapshots and provider availability changes.
///
/// Called outside the backlog lock. Only the latest update matters, so
/// implementations may coalesce.
pub trait BacklogObserver: Send + Sync {
    fn on_backlog(&self, update: &BacklogUpdate);
    fn on_provider_availability(&self, available: bool);
}

/// Publishes into `tokio::sync::watch` channels; readers always see the latest value
pub struct WatchObserver {
    backlog_tx: watch::Sender<BacklogUpdate>,
    provider_tx: watch::Sender<Option<bool>>,
}

impl WatchObserver {
    pub fn new() -> (
        Self,
        watch::Receiver<BacklogUpdate>,
        watch::Receiver<Option<bool>>,
    ) {
        let (backlog_tx, backlog_rx) = watch::channel(BacklogUpdate::default());
        let (provider_tx, provider_rx) = watch::channel(None);
        (
            Self {
                backlog_tx,
                provider_tx,
            },
            backlog_rx,
            provider_rx,
        )
    }
}

impl BacklogObserver for WatchObserver {
    fn on_backlog(&self, update: &BacklogUpdate) {
        self.backlog_tx.send_replace(update.clone());
    }

    fn on_provider_availability(&self, available: bool) {
        self.provider_tx.send_replace(Some(available));
    }
}

/// Events forwarded by [`ChannelObserver`]
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Backlog(BacklogUpdate),
    ProviderAvailability(bool),
}

/// Forwards every event over a crossbeam channel, for consumers on plain threads
pub struct ChannelObserver {
    tx: Sender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<ObserverEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl BacklogObserver for ChannelObserver {
    fn on_backlog(&self, update: &BacklogUpdate) {
        let _ = self.tx.send(ObserverEvent::Backlog(update.clone()));
    }

    fn on_provider_availability(&self, available: bool) {
        let _ = self.tx.send(ObserverEvent::ProviderAvailability(available));
    }
}

/// Logs a status line per update, standing in for a status notification
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl BacklogObserver for LogObserver {
    fn on_backlog(&self, update: &BacklogUpdate) {
        log::info!(
            "{}{}",
            if update.recording { "[REC] " } else { "" },
            format::status_line(update.samples.len(), &update.statistics)
        );
        log::debug!("{}", format::position_line(update.last()));
    }

    fn on_provider_availability(&self, available: bool) {
        if available {
            log::info!("GPS provider enabled");
        } else {
            log::warn!("GPS provider disabled, no new positions until it is re-enabled");
        }
    }
}
