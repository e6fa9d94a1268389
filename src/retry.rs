//! One-shot retry of requests rejected for an invalid CSRF token.
//!
//! Per element: `Idle -> Retrying (marker set) -> Idle`. The marker is
//! cleared after a grace delay when the replay was dispatched, or at once
//! when the refresh failed. A failure that arrives while the marker is set
//! clears it and is left to the page's default handling.

use crate::refresh::RefreshBus;
use crate::settings::Settings;
use crate::types::{ElementId, FailureEvent, PageEvent, RefreshError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where replays and navigations go.
pub trait PageEvents: Send + Sync {
    fn redispatch(&self, element: &ElementId, trigger: &str);
    fn navigate(&self, location: &str);
}

/// `PageEvents` backed by a channel, for a page bridge to drain.
#[derive(Clone)]
pub struct ChannelPage {
    tx: mpsc::UnboundedSender<PageEvent>,
}

impl ChannelPage {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PageEvents for ChannelPage {
    fn redispatch(&self, element: &ElementId, trigger: &str) {
        let _ = self.tx.send(PageEvent::Redispatch {
            element: element.clone(),
            trigger: trigger.to_string(),
        });
    }

    fn navigate(&self, location: &str) {
        let _ = self.tx.send(PageEvent::Navigate {
            location: location.to_string(),
        });
    }
}

#[derive(Default)]
struct MarkerTable {
    next_episode: u64,
    active: HashMap<ElementId, u64>,
}

#[derive(Clone, Default)]
pub struct RetryMarkers {
    inner: Arc<Mutex<MarkerTable>>,
}

impl RetryMarkers {
    /// Sets the marker and returns the new episode, or clears an existing
    /// marker and returns `None`.
    async fn begin(&self, element: &ElementId) -> Option<u64> {
        let mut table = self.inner.lock().await;
        if table.active.remove(element).is_some() {
            return None;
        }
        table.next_episode += 1;
        let episode = table.next_episode;
        table.active.insert(element.clone(), episode);
        Some(episode)
    }

    async fn clear_episode(&self, element: &ElementId, episode: u64) {
        let mut table = self.inner.lock().await;
        if table.active.get(element) == Some(&episode) {
            table.active.remove(element);
        }
    }

    pub async fn is_marked(&self, element: &ElementId) -> bool {
        self.inner.lock().await.active.contains_key(element)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The original interaction was dispatched again with a fresh token.
    Replayed,
    /// Refresh failed; the page was sent to the login location.
    Redirected(RefreshError),
}

#[derive(Debug)]
pub enum Disposition {
    /// Not an invalid-token failure.
    Propagate,
    /// The element already had its retry; default handling applies.
    Exhausted,
    /// Default handling is suppressed while the retry runs.
    Retrying(JoinHandle<RetryOutcome>),
}

impl Disposition {
    pub fn suppresses_default(&self) -> bool {
        matches!(self, Self::Retrying(_))
    }
}

pub struct AuthFailureHandler<P: ?Sized> {
    bus: RefreshBus,
    markers: RetryMarkers,
    page: Arc<P>,
    invalid_token_marker: String,
    login_path: String,
    grace: Duration,
}

impl<P: PageEvents + ?Sized + 'static> AuthFailureHandler<P> {
    pub fn new(bus: RefreshBus, page: Arc<P>, settings: &Settings) -> Self {
        Self {
            bus,
            markers: RetryMarkers::default(),
            page,
            invalid_token_marker: settings.invalid_token_marker.clone(),
            login_path: settings.login_path.clone(),
            grace: settings.retry_grace(),
        }
    }

    pub fn markers(&self) -> &RetryMarkers {
        &self.markers
    }

    pub async fn handle_auth_failure(&self, event: FailureEvent) -> Disposition {
        if !event.is_invalid_token(&self.invalid_token_marker) {
            return Disposition::Propagate;
        }

        let Some(episode) = self.markers.begin(&event.element).await else {
            debug!(element = %event.element, "csrf retry already used; propagating failure");
            return Disposition::Exhausted;
        };

        info!(
            element = %event.element,
            trigger = %event.trigger,
            "csrf token rejected; refreshing before retry"
        );

        let refreshed = self.bus.request_token();
        let markers = self.markers.clone();
        let page = Arc::clone(&self.page);
        let login_path = self.login_path.clone();
        let grace = self.grace;

        Disposition::Retrying(tokio::spawn(async move {
            match refreshed.await {
                Ok(_) => {
                    page.redispatch(&event.element, &event.trigger);
                    tokio::time::sleep(grace).await;
                    markers.clear_episode(&event.element, episode).await;
                    RetryOutcome::Replayed
                }
                Err(e) => {
                    markers.clear_episode(&event.element, episode).await;
                    warn!(error = %e, element = %event.element, "csrf refresh failed; redirecting to login");
                    page.navigate(&login_path);
                    RetryOutcome::Redirected(e)
                }
            }
        }))
    }
}
