use crate::{
    models::Envelope,
    retry_store::RetryStore,
    uploader::{self, Delivery},
    Error,
};
use http::Uri;
use opentelemetry_http::HttpClient;
use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};
use tokio::{runtime::Handle, task::JoinHandle, time::MissedTickBehavior};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Disk retry settings. Can change while the client is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DiskRetrySettings {
    pub(crate) enabled: bool,
    pub(crate) resend_interval: Duration,
    pub(crate) max_bytes_on_disk: u64,
}

enum Outcome {
    Delivered,
    /// Some items were rejected with a retryable status. Contains those items.
    Partial(Vec<Envelope>),
    Retryable(Error),
    Rejected(Error),
}

/// Uploads batches and keeps the ones that failed with a retryable error on disk until a later
/// sweep delivers them.
#[derive(Debug)]
pub(crate) struct Sender {
    client: Arc<dyn HttpClient>,
    endpoint: Uri,
    timeout: Duration,
    store: RetryStore,
    settings: Mutex<DiskRetrySettings>,
    sweep_lock: tokio::sync::Mutex<()>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl Sender {
    pub(crate) fn new(
        client: Arc<dyn HttpClient>,
        endpoint: Uri,
        timeout: Duration,
        store: RetryStore,
        settings: DiskRetrySettings,
        runtime: Handle,
    ) -> Arc<Self> {
        let sender = Arc::new(Sender {
            client,
            endpoint,
            timeout,
            store,
            settings: Mutex::new(settings),
            sweep_lock: tokio::sync::Mutex::new(()),
            sweep_task: Mutex::new(None),
            runtime,
        });
        if settings.enabled {
            sender.start_sweep(settings.resend_interval);
        }
        sender
    }

    pub(crate) fn settings(&self) -> DiskRetrySettings {
        *lock(&self.settings)
    }

    /// Changes disk retry settings. Only affects future failures. Stored batches stay on disk
    /// when retry is disabled.
    pub(crate) fn set_disk_retry(
        self: &Arc<Self>,
        enabled: bool,
        resend_interval: Option<Duration>,
        max_bytes_on_disk: Option<u64>,
    ) {
        let settings = {
            let mut settings = lock(&self.settings);
            settings.enabled = enabled;
            if let Some(resend_interval) = resend_interval {
                settings.resend_interval = resend_interval;
            }
            if let Some(max_bytes_on_disk) = max_bytes_on_disk {
                settings.max_bytes_on_disk = max_bytes_on_disk;
            }
            *settings
        };
        if settings.enabled {
            self.start_sweep(settings.resend_interval);
        } else {
            self.stop_sweep();
        }
    }

    /// Uploads a fresh batch. Retryable failures are stored on disk when disk retry is enabled.
    pub(crate) async fn transmit(&self, items: Vec<Envelope>) {
        match self.upload(&items).await {
            Outcome::Delivered => {
                tracing::debug!(count = items.len(), "Telemetry batch delivered");
            }
            Outcome::Partial(retry) => self.defer(&retry).await,
            Outcome::Retryable(err) => {
                tracing::debug!(error = %err, count = items.len(), "Telemetry upload failed");
                self.defer(&items).await;
            }
            Outcome::Rejected(err) => {
                tracing::warn!(
                    error = %err,
                    count = items.len(),
                    "Dropping telemetry batch that cannot be retried"
                );
            }
        }
    }

    /// Stores a batch without trying to upload it. Never waits for anything but the file system.
    pub(crate) fn save_on_crash(&self, items: &[Envelope]) {
        let settings = self.settings();
        if !settings.enabled {
            tracing::warn!(
                count = items.len(),
                "Disk retry is disabled; dropping telemetry buffered at crash"
            );
            return;
        }
        if let Err(err) = self.store.save_on_crash(items, settings.max_bytes_on_disk) {
            tracing::warn!(error = %err, count = items.len(), "Failed to store telemetry at crash");
        }
    }

    /// Sends every stored batch, oldest first. Delivered and non-retryable batches are deleted.
    /// Does nothing while another sweep is running.
    pub(crate) async fn sweep(&self) {
        let _guard = match self.sweep_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Retry sweep already running");
                return;
            }
        };

        let files = match self.store.list().await {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to list stored telemetry");
                return;
            }
        };

        for file in files {
            let items = match self.store.read(&file.path).await {
                Ok(items) => items,
                Err(err @ Error::StorageFormat(_)) => {
                    tracing::warn!(
                        error = %err,
                        path = %file.path.display(),
                        "Deleting malformed stored telemetry batch"
                    );
                    self.delete(&file.path).await;
                    continue;
                }
                Err(err) => {
                    tracing::debug!(
                        error = %err,
                        path = %file.path.display(),
                        "Failed to read stored telemetry batch"
                    );
                    continue;
                }
            };

            match self.upload(&items).await {
                Outcome::Delivered => self.delete(&file.path).await,
                Outcome::Partial(retry) => {
                    self.defer(&retry).await;
                    self.delete(&file.path).await;
                }
                Outcome::Retryable(err) => {
                    tracing::debug!(
                        error = %err,
                        path = %file.path.display(),
                        "Stored telemetry batch still cannot be sent"
                    );
                }
                Outcome::Rejected(err) => {
                    tracing::warn!(
                        error = %err,
                        count = items.len(),
                        "Dropping stored telemetry batch that cannot be retried"
                    );
                    self.delete(&file.path).await;
                }
            }
        }
    }

    pub(crate) fn shutdown(&self) {
        self.stop_sweep();
    }

    async fn upload(&self, items: &[Envelope]) -> Outcome {
        match uploader::send(self.client.as_ref(), &self.endpoint, items, self.timeout).await {
            Ok(Delivery { retry, dropped }) => {
                if dropped > 0 {
                    tracing::warn!(
                        dropped,
                        count = items.len(),
                        "Telemetry items rejected by the ingestion service"
                    );
                }
                if retry.is_empty() {
                    Outcome::Delivered
                } else {
                    Outcome::Partial(
                        retry
                            .into_iter()
                            .filter_map(|index| items.get(index).cloned())
                            .collect(),
                    )
                }
            }
            Err(err) if err.can_retry() => Outcome::Retryable(err),
            Err(err) => Outcome::Rejected(err),
        }
    }

    async fn defer(&self, items: &[Envelope]) {
        let settings = self.settings();
        if !settings.enabled {
            tracing::warn!(
                count = items.len(),
                "Disk retry is disabled; dropping telemetry that failed to send"
            );
            return;
        }
        if let Err(err) = self.store.persist(items, settings.max_bytes_on_disk).await {
            tracing::warn!(
                error = %err,
                count = items.len(),
                "Failed to store telemetry for retry"
            );
        }
    }

    async fn delete(&self, path: &std::path::Path) {
        if let Err(err) = self.store.delete(path).await {
            tracing::warn!(
                error = %err,
                path = %path.display(),
                "Failed to delete stored telemetry batch"
            );
        }
    }

    fn start_sweep(self: &Arc<Self>, resend_interval: Duration) {
        let sender = Arc::downgrade(self);
        let task = self.runtime.spawn(sweep_loop(sender, resend_interval));
        if let Some(previous) = lock(&self.sweep_task).replace(task) {
            previous.abort();
        }
    }

    fn stop_sweep(&self) {
        if let Some(task) = lock(&self.sweep_task).take() {
            task.abort();
        }
    }
}

async fn sweep_loop(sender: Weak<Sender>, resend_interval: Duration) {
    let mut interval = tokio::time::interval(resend_interval.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        match sender.upgrade() {
            Some(sender) => sender.sweep().await,
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Data, EventData};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{Request, Response};
    use opentelemetry_http::HttpError;
    use std::collections::{BTreeMap, VecDeque};

    #[derive(Debug, Default)]
    struct ScriptedClient {
        responses: Mutex<VecDeque<(u16, &'static str)>>,
        delay: Duration,
        requests: Mutex<usize>,
    }

    impl ScriptedClient {
        fn new(responses: impl IntoIterator<Item = (u16, &'static str)>) -> Arc<Self> {
            Arc::new(ScriptedClient {
                responses: Mutex::new(responses.into_iter().collect()),
                ..Default::default()
            })
        }

        fn requests(&self) -> usize {
            *lock(&self.requests)
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send_bytes(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            *lock(&self.requests) += 1;
            tokio::time::sleep(self.delay).await;
            let (status, body) = lock(&self.responses).pop_front().unwrap_or((200, ""));
            Ok(Response::builder()
                .status(status)
                .body(Bytes::from_static(body.as_bytes()))?)
        }
    }

    fn event(name: &str) -> Envelope {
        Envelope {
            name: "Microsoft.ApplicationInsights.Event".into(),
            time: "2020-06-21T10:40:00.000Z".into(),
            sample_rate: None,
            i_key: None,
            tags: BTreeMap::new(),
            data: Data::Event(EventData {
                ver: 2,
                name: name.into(),
                properties: None,
                measurements: None,
            }),
        }
    }

    fn sender(client: Arc<ScriptedClient>, dir: &std::path::Path) -> Arc<Sender> {
        Sender::new(
            client,
            "http://localhost/v2/track".parse().unwrap(),
            Duration::from_secs(5),
            RetryStore::new(dir.to_path_buf()),
            DiskRetrySettings {
                enabled: true,
                resend_interval: Duration::from_secs(3600),
                max_bytes_on_disk: 1024 * 1024,
            },
            Handle::current(),
        )
    }

    async fn stored(dir: &std::path::Path) -> Vec<Vec<Envelope>> {
        let store = RetryStore::new(dir.to_path_buf());
        let mut batches = Vec::new();
        for file in store.list().await.unwrap() {
            batches.push(store.read(&file.path).await.unwrap());
        }
        batches
    }

    #[tokio::test]
    async fn partial_success_stores_retryable_items() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new([(
            206,
            r#"{"itemsReceived":3,"itemsAccepted":1,"errors":[{"index":1,"statusCode":429},{"index":2,"statusCode":400}]}"#,
        )]);
        let sender = sender(client, dir.path());

        sender.transmit(vec![event("a"), event("b"), event("c")]).await;
        assert_eq!(vec![vec![event("b")]], stored(dir.path()).await);
        sender.shutdown();
    }

    #[tokio::test]
    async fn rejected_batch_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let sender = sender(ScriptedClient::new([(400, "bad")]), dir.path());

        sender.transmit(vec![event("a")]).await;
        assert!(stored(dir.path()).await.is_empty());
        sender.shutdown();
    }

    #[tokio::test]
    async fn sweep_delivers_and_removes_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new([(503, "")]);
        let sender = sender(client.clone(), dir.path());

        sender.transmit(vec![event("a")]).await;
        std::fs::write(
            dir.path()
                .join(format!("{:020}-1-{:010}.ai.json", 0, 0)),
            b"garbage",
        )
        .unwrap();

        sender.sweep().await;
        assert_eq!(2, client.requests());
        assert!(RetryStore::new(dir.path().to_path_buf())
            .list()
            .await
            .unwrap()
            .is_empty());
        sender.shutdown();
    }

    #[tokio::test]
    async fn sweep_keeps_batches_that_still_fail() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new([(503, ""), (503, "")]);
        let sender = sender(client.clone(), dir.path());

        sender.transmit(vec![event("a")]).await;
        sender.sweep().await;
        assert_eq!(vec![vec![event("a")]], stored(dir.path()).await);
        sender.shutdown();
    }

    #[tokio::test]
    async fn overlapping_sweeps_send_once() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let sender = sender(client.clone(), dir.path());
        RetryStore::new(dir.path().to_path_buf())
            .persist(&[event("a")], 1024 * 1024)
            .await
            .unwrap();

        tokio::join!(sender.sweep(), sender.sweep());
        assert_eq!(1, client.requests());
        sender.shutdown();
    }

    #[tokio::test]
    async fn disabled_retry_drops_failures() {
        let dir = tempfile::tempdir().unwrap();
        let sender = sender(ScriptedClient::new([(503, "")]), dir.path());
        sender.set_disk_retry(false, None, Some(10));
        assert_eq!(
            DiskRetrySettings {
                enabled: false,
                resend_interval: Duration::from_secs(3600),
                max_bytes_on_disk: 10,
            },
            sender.settings()
        );

        sender.transmit(vec![event("a")]).await;
        assert!(stored(dir.path()).await.is_empty());
    }
}
