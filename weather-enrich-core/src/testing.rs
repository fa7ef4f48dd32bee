//! In-memory provider used by unit tests in place of the network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::matcher::MatchPolicy;
use crate::model::{FieldValue, Observation, QueryWindow, WindowStrategy};
use crate::provider::{ProviderClient, ProviderId};

pub(crate) fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 8, 7, h, m, 0).unwrap()
}

/// Hourly observations for 2023-08-07 with `temp = hour` and the given source key.
pub(crate) fn hourly_day(temp_key: &str) -> Vec<Observation> {
    (0..24)
        .map(|h| {
            Observation::at_utc(at(h, 0))
                .with_field(temp_key, Some(FieldValue::Number(f64::from(h))))
        })
        .collect()
}

/// Answer a single HTTP request on a loopback port with `status` and `body`.
///
/// Returns the base URL to point an adapter at and a handle resolving to the
/// request head the server saw.
pub(crate) async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&head).into_owned()
    });

    (url, server)
}

#[derive(Debug)]
pub(crate) struct ScriptedClient {
    id: ProviderId,
    strategy: WindowStrategy,
    default_policy: Option<MatchPolicy>,
    only_within_window: bool,
    observations: Vec<Observation>,
    queued_failures: Mutex<VecDeque<ProviderError>>,
    failing_latitudes: Vec<(f64, ProviderError)>,
    hang_latitude: Option<(f64, CancellationToken)>,
    delay_by_latitude: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClient {
    pub(crate) fn new(id: ProviderId) -> Self {
        Self {
            id,
            strategy: WindowStrategy::UtcDay,
            default_policy: None,
            only_within_window: false,
            observations: Vec::new(),
            queued_failures: Mutex::new(VecDeque::new()),
            failing_latitudes: Vec::new(),
            hang_latitude: None,
            delay_by_latitude: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_observations(mut self, observations: Vec<Observation>) -> Self {
        self.observations = observations;
        self
    }

    /// Behave like a provider queried around each record: report `strategy`
    /// and `policy`, and return only observations inside the window.
    pub(crate) fn windowed(
        mut self,
        strategy: WindowStrategy,
        policy: Option<MatchPolicy>,
    ) -> Self {
        self.strategy = strategy;
        self.default_policy = policy;
        self.only_within_window = true;
        self
    }

    /// The next `n` fetches fail with `err`, later ones succeed.
    pub(crate) fn then_fail_times(self, n: usize, err: ProviderError) -> Self {
        {
            let mut queue = self.queued_failures.lock().unwrap();
            queue.extend(std::iter::repeat_n(err, n));
        }
        self
    }

    pub(crate) fn fail_for_latitude(mut self, latitude: f64, err: ProviderError) -> Self {
        self.failing_latitudes.push((latitude, err));
        self
    }

    /// Cancel `token` and never return when asked about `latitude`.
    pub(crate) fn cancel_and_hang_at(mut self, latitude: f64, token: CancellationToken) -> Self {
        self.hang_latitude = Some((latitude, token));
        self
    }

    /// Sleep `(10 - latitude) * 5ms` so that earlier rows finish last.
    pub(crate) fn reversed_latency(mut self) -> Self {
        self.delay_by_latitude = true;
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn window_strategy(&self) -> WindowStrategy {
        self.strategy
    }

    fn default_policy(&self) -> Option<MatchPolicy> {
        self.default_policy
    }

    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<Observation>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some((lat, token)) = &self.hang_latitude {
            if *lat == window.latitude() {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }

        if self.delay_by_latitude {
            let ms = (10.0 - window.latitude()).max(0.0) * 5.0;
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        }

        let queued = self.queued_failures.lock().unwrap().pop_front();
        if let Some(err) = queued {
            return Err(err);
        }

        if let Some((_, err)) = self
            .failing_latitudes
            .iter()
            .find(|(lat, _)| *lat == window.latitude())
        {
            return Err(err.clone());
        }

        if self.only_within_window {
            return Ok(self
                .observations
                .iter()
                .filter(|o| o.observed_at >= window.start() && o.observed_at <= window.end())
                .cloned()
                .collect());
        }

        Ok(self.observations.clone())
    }
}
