use crate::{
    models::Envelope,
    sender::{lock, Sender},
};
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{runtime::Handle, task::JoinHandle};

/// Called once a flush has been handled, i.e. the batch was delivered, stored for retry or
/// dropped.
pub(crate) type FlushCallback = Box<dyn FnOnce() + Send + 'static>;

/// The pending batch timer. `generation` tells a firing timer whether it is still the armed one.
#[derive(Default)]
struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Buffers envelopes and hands them to the [`Sender`] in batches.
pub(crate) struct Channel {
    buffer: Mutex<Vec<Envelope>>,
    max_batch_size: usize,
    max_batch_interval: Duration,
    timer: Mutex<TimerSlot>,
    sender: Arc<Sender>,
    runtime: Handle,
}

impl Channel {
    pub(crate) fn new(
        sender: Arc<Sender>,
        max_batch_size: usize,
        max_batch_interval: Duration,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Channel {
            buffer: Mutex::new(Vec::with_capacity(max_batch_size)),
            max_batch_size,
            max_batch_interval,
            timer: Mutex::new(TimerSlot::default()),
            sender,
            runtime,
        })
    }

    pub(crate) fn sender(&self) -> &Arc<Sender> {
        &self.sender
    }

    /// Buffers an envelope. A full buffer is sent right away, otherwise the batch timer makes sure
    /// it is sent within the batch interval.
    pub(crate) fn send(self: &Arc<Self>, envelope: Envelope) {
        let len = {
            let mut buffer = lock(&self.buffer);
            buffer.push(envelope);
            buffer.len()
        };
        if len >= self.max_batch_size {
            self.trigger_send(false, None);
        } else {
            self.ensure_timer();
        }
    }

    /// Swaps out the buffer and sends it. With `is_app_crashing` the batch is written to disk
    /// synchronously instead of being uploaded.
    pub(crate) fn trigger_send(&self, is_app_crashing: bool, callback: Option<FlushCallback>) {
        let batch = std::mem::take(&mut *lock(&self.buffer));
        lock(&self.timer).disarm();

        if batch.is_empty() {
            if let Some(callback) = callback {
                callback();
            }
        } else if is_app_crashing {
            self.sender.save_on_crash(&batch);
            if let Some(callback) = callback {
                callback();
            }
        } else {
            let sender = self.sender.clone();
            self.runtime.spawn(async move {
                sender.transmit(batch).await;
                if let Some(callback) = callback {
                    callback();
                }
            });
        }
    }

    pub(crate) fn shutdown(&self) {
        lock(&self.timer).disarm();
        self.sender.shutdown();
    }

    fn ensure_timer(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        if timer.handle.is_some() {
            return;
        }
        timer.generation += 1;
        let generation = timer.generation;
        let channel = Arc::downgrade(self);
        let interval = self.max_batch_interval;
        timer.handle = Some(self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(channel) = channel.upgrade() {
                channel.on_timer(generation);
            }
        }));
    }

    /// Sends the buffer if the timer of `generation` is still armed. A timer that was disarmed or
    /// replaced after it woke up does nothing.
    fn on_timer(&self, generation: u64) {
        {
            let mut timer = lock(&self.timer);
            if timer.generation != generation || timer.handle.is_none() {
                return;
            }
            // Forget our own handle so trigger_send does not abort this task.
            timer.handle = None;
        }
        self.trigger_send(false, None);
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        lock(&self.buffer).len()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("buffered", &lock(&self.buffer).len())
            .field("max_batch_size", &self.max_batch_size)
            .field("max_batch_interval", &self.max_batch_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{Data, EventData},
        retry_store::RetryStore,
        sender::DiskRetrySettings,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{Request, Response};
    use opentelemetry_http::{HttpClient, HttpError};
    use std::collections::BTreeMap;

    #[derive(Debug, Default)]
    struct CountingClient {
        requests: Mutex<usize>,
    }

    #[async_trait]
    impl HttpClient for CountingClient {
        async fn send_bytes(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            *lock(&self.requests) += 1;
            Ok(Response::builder().status(200).body(Bytes::new())?)
        }
    }

    fn event() -> Envelope {
        Envelope {
            name: "Microsoft.ApplicationInsights.Event".into(),
            time: "2020-06-21T10:40:00.000Z".into(),
            sample_rate: None,
            i_key: None,
            tags: BTreeMap::new(),
            data: Data::Event(EventData {
                ver: 2,
                name: "e".into(),
                properties: None,
                measurements: None,
            }),
        }
    }

    fn channel(
        client: Arc<CountingClient>,
        dir: &std::path::Path,
        max_batch_size: usize,
    ) -> Arc<Channel> {
        let sender = Sender::new(
            client,
            "http://localhost/v2/track".parse().unwrap(),
            Duration::from_secs(5),
            RetryStore::new(dir.to_path_buf()),
            DiskRetrySettings {
                enabled: true,
                resend_interval: Duration::from_secs(60),
                max_bytes_on_disk: 1024 * 1024,
            },
            Handle::current(),
        );
        Channel::new(sender, max_batch_size, Duration::from_secs(60), Handle::current())
    }

    #[tokio::test]
    async fn full_buffer_is_sent_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(CountingClient::default());
        let channel = channel(client.clone(), dir.path(), 2);
        channel.send(event());
        assert_eq!(1, channel.buffered());
        channel.send(event());
        assert_eq!(0, channel.buffered());

        let (tx, rx) = tokio::sync::oneshot::channel();
        channel.trigger_send(false, Some(Box::new(move || drop(tx.send(())))));
        rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(1, *lock(&client.requests));
        channel.shutdown();
    }

    #[tokio::test]
    async fn crash_flush_writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(CountingClient::default());
        let channel = channel(client.clone(), dir.path(), 10);
        channel.send(event());
        channel.trigger_send(true, None);
        assert_eq!(0, channel.buffered());
        assert_eq!(0, *lock(&client.requests));
        assert_eq!(1, std::fs::read_dir(dir.path()).unwrap().count());
        channel.shutdown();
    }

    #[tokio::test]
    async fn stale_timer_leaves_newer_timer_armed() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(Arc::new(CountingClient::default()), dir.path(), 10);
        channel.send(event());
        let first = lock(&channel.timer).generation;
        channel.trigger_send(false, None);
        channel.send(event());
        let second = lock(&channel.timer).generation;
        assert_ne!(first, second);

        channel.on_timer(first);
        assert_eq!(1, channel.buffered());
        assert!(lock(&channel.timer).handle.is_some());

        channel.on_timer(second);
        assert_eq!(0, channel.buffered());
        assert!(lock(&channel.timer).handle.is_none());
        channel.shutdown();
    }

    #[tokio::test]
    async fn empty_flush_calls_back() {
        let dir = tempfile::tempdir().unwrap();
        let channel = channel(Arc::new(CountingClient::default()), dir.path(), 10);
        let (tx, rx) = tokio::sync::oneshot::channel();
        channel.trigger_send(false, Some(Box::new(move || drop(tx.send(())))));
        rx.await.unwrap();
        channel.shutdown();
    }
}
