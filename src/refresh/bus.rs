use crate::types::{RefreshError, Token};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

pub(crate) type TokenReply = oneshot::Sender<Result<Token, RefreshError>>;

pub(crate) struct TokenRequest {
    pub(crate) respond_to: TokenReply,
}

#[derive(Default)]
pub(crate) struct RefreshStatus {
    pub(crate) refreshing: AtomicBool,
    pub(crate) last_refreshed_at: Mutex<Option<String>>,
}

/// Handle to the refresh loop. Cheap to clone; the loop stops once every
/// handle is dropped.
#[derive(Clone)]
pub struct RefreshBus {
    tx: mpsc::UnboundedSender<TokenRequest>,
    status: Arc<RefreshStatus>,
}

impl RefreshBus {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TokenRequest>, status: Arc<RefreshStatus>) -> Self {
        Self { tx, status }
    }

    /// Joins the in-flight refresh, or starts one.
    ///
    /// The request is queued when this is called, not when the returned
    /// future is first polled, so callers are answered in call order.
    pub fn request_token(
        &self,
    ) -> impl Future<Output = Result<Token, RefreshError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let sent = self.tx.send(TokenRequest { respond_to: tx }).is_ok();
        async move {
            if !sent {
                return Err(RefreshError::Unavailable);
            }
            rx.await.unwrap_or(Err(RefreshError::Unavailable))
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.status.refreshing.load(Ordering::SeqCst)
    }

    /// RFC 3339 time of the last successful refresh.
    pub async fn last_refreshed_at(&self) -> Option<String> {
        self.status.last_refreshed_at.lock().await.clone()
    }
}
