pub mod bridge;
pub mod client;
pub mod headers;
mod redact;
pub mod refresh;
pub mod retry;
pub mod settings;
pub mod types;

pub use bridge::run_bridge;
pub use client::{ClientError, CsrfTokenClient, TokenSource};
pub use headers::HeaderStore;
pub use refresh::{spawn_refresh_loop, RefreshBus};
pub use retry::{AuthFailureHandler, ChannelPage, Disposition, PageEvents, RetryMarkers, RetryOutcome};
pub use settings::{Settings, SettingsError};
pub use types::{ElementId, FailureEvent, PageEvent, RefreshError, Token};
