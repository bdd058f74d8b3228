use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::Url;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use titus_core::Result;

use crate::{endpoint, ensure_success, http_client, request_err};

const SERVICE: &str = "liveness";

/// Reports to Titorelli that this bot client is alive.
///
/// A successful report is followed by `interval` of quiet; a failed one by
/// `backoff`.
#[derive(Clone)]
pub struct LivenessReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    url: Url,
    client_id: String,
    interval: Duration,
    backoff: Duration,
    http: reqwest::Client,
    state: Mutex<ReporterState>,
}

#[derive(Default)]
struct ReporterState {
    task: Option<(CancellationToken, JoinHandle<()>)>,
    last_success: Option<DateTime<Utc>>,
}

impl LivenessReporter {
    pub fn new(
        titorelli_host: &Url,
        client_id: impl Into<String>,
        interval: Duration,
        backoff: Duration,
    ) -> Result<Self> {
        let client_id = client_id.into();
        let mut url = endpoint(titorelli_host, "bots/liveness")?;
        url.query_pairs_mut().append_pair("clientId", &client_id);

        Ok(Self {
            inner: Arc::new(ReporterInner {
                url,
                client_id,
                interval,
                backoff,
                http: http_client()?,
                state: Mutex::new(ReporterState::default()),
            }),
        })
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.task.is_some()
    }

    pub async fn last_success(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().await.last_success
    }

    /// Start reporting. A no-op if already started.
    pub async fn start(&self) {
        let mut st = self.inner.state.lock().await;
        if st.task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let reporter = self.clone();
        let tok = cancel.clone();
        let handle = tokio::spawn(async move {
            reporter.report_loop(tok).await;
        });
        st.task = Some((cancel, handle));
        info!(client_id = %self.inner.client_id, "liveness reporting started");
    }

    pub async fn stop(&self) {
        let task = self.inner.state.lock().await.task.take();
        if let Some((cancel, handle)) = task {
            cancel.cancel();
            let _ = handle.await;
            info!(client_id = %self.inner.client_id, "liveness reporting stopped");
        }
    }

    async fn report_loop(&self, cancel: CancellationToken) {
        loop {
            let wait = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.report() => match res {
                    Ok(()) => {
                        self.inner.state.lock().await.last_success = Some(Utc::now());
                        self.inner.interval
                    }
                    Err(e) => {
                        error!(client_id = %self.inner.client_id, "error when reporting liveness: {e}");
                        self.inner.backoff
                    }
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }
    }

    async fn report(&self) -> Result<()> {
        let resp = self
            .inner
            .http
            .post(self.inner.url.clone())
            .send()
            .await
            .map_err(|e| request_err(SERVICE, e))?;
        ensure_success(SERVICE, resp).await?;
        debug!(client_id = %self.inner.client_id, "liveness reported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> LivenessReporter {
        LivenessReporter::new(
            &Url::parse("http://127.0.0.1:1").unwrap(),
            "client-1",
            Duration::from_secs(20),
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[test]
    fn report_url_carries_client_id() {
        assert_eq!(
            reporter().url().as_str(),
            "http://127.0.0.1:1/bots/liveness?clientId=client-1"
        );
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_ends_the_task() {
        let r = reporter();
        r.start().await;
        r.start().await;
        assert!(r.is_running().await);

        r.stop().await;
        assert!(!r.is_running().await);
        assert!(r.last_success().await.is_none());

        r.stop().await;
    }
}
