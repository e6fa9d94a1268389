use super::bus::{RefreshBus, RefreshStatus, TokenReply, TokenRequest};
use crate::client::TokenSource;
use crate::headers::HeaderStore;
use crate::settings::Settings;
use crate::types::{RefreshError, Token};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

type RefreshFuture = Pin<Box<dyn Future<Output = Result<Token, RefreshError>> + Send>>;

fn now_iso() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn start_refresh<S: TokenSource + ?Sized + 'static>(source: &Arc<S>) -> RefreshFuture {
    let source = Arc::clone(source);
    Box::pin(async move { source.fetch_token().await })
}

async fn settle(in_flight: &mut Option<RefreshFuture>) -> Result<Token, RefreshError> {
    match in_flight {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

struct RefreshLoop<S: ?Sized> {
    source: Arc<S>,
    headers: HeaderStore,
    header_key: String,
    status: Arc<RefreshStatus>,
    waiters: Vec<TokenReply>,
    in_flight: Option<RefreshFuture>,
}

impl<S: TokenSource + ?Sized + 'static> RefreshLoop<S> {
    fn ensure_in_flight(&mut self) {
        if self.in_flight.is_none() {
            self.in_flight = Some(start_refresh(&self.source));
            self.status.refreshing.store(true, Ordering::SeqCst);
        }
    }

    async fn finish(&mut self, result: Result<Token, RefreshError>) {
        self.in_flight = None;

        let result = match result {
            Ok(token) => self
                .headers
                .inject_token(&self.header_key, &token)
                .await
                .map(|()| token),
            Err(e) => Err(e),
        };
        self.status.refreshing.store(false, Ordering::SeqCst);

        match &result {
            Ok(_) => {
                *self.status.last_refreshed_at.lock().await = Some(now_iso());
                info!(waiters = self.waiters.len(), "csrf token refreshed");
            }
            Err(e) if self.waiters.is_empty() => {
                warn!(error = %e, "proactive csrf token refresh failed");
            }
            Err(e) => {
                warn!(error = %e, waiters = self.waiters.len(), "csrf token refresh failed");
            }
        }

        for tx in self.waiters.drain(..) {
            let _ = tx.send(result.clone());
        }
    }
}

/// Spawns the task that owns all refresh state and returns its handle.
///
/// Requests are answered from a single fetch per refresh; a timer also
/// refreshes every `refreshIntervalSeconds`, joining any refresh already
/// running.
pub fn spawn_refresh_loop<S>(
    source: Arc<S>,
    headers: HeaderStore,
    settings: &Settings,
) -> (RefreshBus, JoinHandle<()>)
where
    S: TokenSource + ?Sized + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let status = Arc::new(RefreshStatus::default());
    let bus = RefreshBus::new(tx, Arc::clone(&status));

    let state = RefreshLoop {
        source,
        headers,
        header_key: settings.header_key.clone(),
        status,
        waiters: Vec::new(),
        in_flight: None,
    };
    let handle = tokio::spawn(run(state, rx, settings.refresh_interval()));
    (bus, handle)
}

async fn run<S>(
    mut state: RefreshLoop<S>,
    mut rx: mpsc::UnboundedReceiver<TokenRequest>,
    period: std::time::Duration,
) where
    S: TokenSource + ?Sized + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Drain queued requests before looking at the fetch so that every
        // request already sent shares its result.
        tokio::select! {
            biased;
            req = rx.recv() => {
                let Some(req) = req else { break };
                state.waiters.push(req.respond_to);
                state.ensure_in_flight();
            }
            _ = ticker.tick() => {
                if state.in_flight.is_some() {
                    debug!("proactive tick joined in-flight refresh");
                } else {
                    debug!("proactive csrf token refresh");
                    state.ensure_in_flight();
                }
            }
            result = settle(&mut state.in_flight) => {
                state.finish(result).await;
            }
        }
    }

    // Requests already accepted still get the in-flight result.
    if state.in_flight.is_some() {
        let result = settle(&mut state.in_flight).await;
        state.finish(result).await;
    }

    debug!("refresh loop stopped");
}
