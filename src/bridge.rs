//! JSON-lines page bridge.
//!
//! Each input line is a `FailureEvent`. For every event one
//! `{"kind":"disposition",...}` line is written, telling the page whether to
//! skip its default failure handling. Replays and navigations follow as
//! `PageEvent` lines. At end of input, running retries are awaited and their
//! output flushed before returning.

use crate::retry::{AuthFailureHandler, Disposition, PageEvents};
use crate::types::{ElementId, FailureEvent, PageEvent};
use serde::Serialize;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum BridgeLine<'a> {
    Disposition {
        element: &'a ElementId,
        outcome: &'static str,
        #[serde(rename = "suppressDefault")]
        suppress_default: bool,
    },
}

fn outcome_name(disposition: &Disposition) -> &'static str {
    match disposition {
        Disposition::Propagate => "propagate",
        Disposition::Exhausted => "exhausted",
        Disposition::Retrying(_) => "retrying",
    }
}

async fn write_line<W, T>(output: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await
}

pub async fn run_bridge<P, R, W>(
    handler: &AuthFailureHandler<P>,
    mut page_events: mpsc::UnboundedReceiver<PageEvent>,
    input: R,
    mut output: W,
) -> io::Result<()>
where
    P: PageEvents + ?Sized + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut input_open = true;
    let mut retries = JoinSet::new();

    while input_open || !retries.is_empty() {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                let Some(line) = line? else {
                    input_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event = match serde_json::from_str::<FailureEvent>(&line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "ignoring malformed failure event");
                        continue;
                    }
                };
                let element = event.element.clone();
                let disposition = handler.handle_auth_failure(event).await;
                write_line(&mut output, &BridgeLine::Disposition {
                    element: &element,
                    outcome: outcome_name(&disposition),
                    suppress_default: disposition.suppresses_default(),
                })
                .await?;
                if let Disposition::Retrying(task) = disposition {
                    retries.spawn(task);
                }
            }
            Some(event) = page_events.recv() => {
                write_line(&mut output, &event).await?;
            }
            Some(joined) = retries.join_next() => {
                match joined {
                    Ok(Ok(outcome)) => debug!(?outcome, "csrf retry finished"),
                    Ok(Err(e)) | Err(e) => warn!(error = %e, "csrf retry task failed"),
                }
            }
            else => break,
        }
    }

    while let Ok(event) = page_events.try_recv() {
        write_line(&mut output, &event).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TokenSource;
    use crate::headers::HeaderStore;
    use crate::refresh::spawn_refresh_loop;
    use crate::retry::ChannelPage;
    use crate::settings::Settings;
    use crate::types::{RefreshError, Token};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct FixedSource(Result<Token, RefreshError>);

    #[async_trait]
    impl TokenSource for FixedSource {
        async fn fetch_token(&self) -> Result<Token, RefreshError> {
            self.0.clone()
        }
    }

    async fn run_with(outcome: Result<Token, RefreshError>, input: &str) -> Vec<Value> {
        let settings = Settings::default();
        let (bus, _handle) = spawn_refresh_loop(
            Arc::new(FixedSource(outcome)),
            HeaderStore::default(),
            &settings,
        );
        let (page, page_events) = ChannelPage::new();
        let handler = AuthFailureHandler::new(bus, Arc::new(page), &settings);

        let mut output = Vec::new();
        run_bridge(&handler, page_events, input.as_bytes(), &mut output)
            .await
            .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn pending_retry_output_is_written_before_end_of_input_returns() {
        let input = r#"{"status":403,"body":"CSRF token invalid","element":"a","trigger":"click"}"#;
        let lines = run_with(Ok(Token::new("abc123").unwrap()), input).await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "disposition");
        assert_eq!(lines[0]["element"], "a");
        assert_eq!(lines[0]["outcome"], "retrying");
        assert_eq!(lines[0]["suppressDefault"], true);
        assert_eq!(lines[1]["kind"], "redispatch");
        assert_eq!(lines[1]["element"], "a");
        assert_eq!(lines[1]["trigger"], "click");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_writes_navigation() {
        let input = r#"{"status":403,"body":"CSRF token invalid","element":"a","trigger":"click"}"#;
        let lines = run_with(Err(RefreshError::Status(500)), input).await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["suppressDefault"], true);
        assert_eq!(lines[1]["kind"], "navigate");
        assert_eq!(lines[1]["location"], "/login");
    }

    #[tokio::test]
    async fn non_retried_failures_report_default_handling() {
        let input = concat!(
            r#"{"status":403,"body":"Forbidden - not your team","element":"b","trigger":"submit"}"#,
            "\n",
            "not json\n",
            "\n",
        );
        let lines = run_with(Ok(Token::new("abc123").unwrap()), input).await;

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["kind"], "disposition");
        assert_eq!(lines[0]["outcome"], "propagate");
        assert_eq!(lines[0]["suppressDefault"], false);
    }
}
