//! Per-record enrichment driver.
//!
//! Every record is enriched independently: derive a query window, fetch,
//! match, project. Up to `workers` records are in flight at once and each
//! result lands in the slot of its input row, so output order never depends
//! on completion order.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::{StreamExt, future::join_all, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::ProviderError,
    mapper::FieldMapper,
    matcher::{MatchPolicy, MatchResult, select},
    model::{EnrichStatus, EnrichedRecord, Observation, QueryWindow, Record, RecordInput},
    provider::{ProviderClient, ProviderId},
};

/// A provider together with the column table used to project its observations.
#[derive(Debug)]
pub struct ProviderBinding {
    pub client: Box<dyn ProviderClient>,
    pub mapper: FieldMapper,
    /// Overrides the pipeline's policy for this provider.
    pub policy: Option<MatchPolicy>,
}

impl ProviderBinding {
    /// Bind `client` to the built-in column table for its provider and to
    /// the provider's own default policy, if it has one.
    pub fn new(client: Box<dyn ProviderClient>) -> Self {
        let mapper = FieldMapper::for_provider(client.id());
        let policy = client.default_policy();
        Self { client, mapper, policy }
    }

    /// Use `policy` for this provider regardless of its default.
    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn id(&self) -> ProviderId {
        self.client.id()
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentPipeline {
    policy: MatchPolicy,
    workers: usize,
    request_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl EnrichmentPipeline {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            policy,
            workers: 8,
            request_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Maximum number of records in flight. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Upper bound on a single fetch; expiry is reported as a transport error.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enrich `records` from one provider with the pipeline's policy.
    ///
    /// Always returns exactly one record per input row, in input order.
    pub async fn run(
        &self,
        records: &[RecordInput],
        client: &dyn ProviderClient,
        mapper: &FieldMapper,
    ) -> Vec<EnrichedRecord> {
        self.run_with_policy(records, client, mapper, self.policy).await
    }

    async fn run_with_policy(
        &self,
        records: &[RecordInput],
        client: &dyn ProviderClient,
        mapper: &FieldMapper,
        policy: MatchPolicy,
    ) -> Vec<EnrichedRecord> {
        let provider = client.id();
        info!(
            %provider,
            records = records.len(),
            workers = self.workers,
            %policy,
            "starting enrichment"
        );

        let mut slots: Vec<Option<EnrichedRecord>> = (0..records.len()).map(|_| None).collect();

        let mut completed = stream::iter(records.iter().enumerate())
            .map(|(index, input)| self.enrich_one(index, input, client, mapper, policy))
            .buffer_unordered(self.workers);

        while let Some(enriched) = completed.next().await {
            let index = enriched.index();
            slots[index] = Some(enriched);
        }

        let output: Vec<EnrichedRecord> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let record = records[index].as_ref().ok().copied();
                    absent(index, record, provider, mapper, EnrichStatus::Cancelled)
                })
            })
            .collect();

        let counts = StatusCounts::tally(&output, provider);
        info!(
            %provider,
            matched = counts.matched,
            no_match = counts.no_match,
            provider_error = counts.provider_error,
            invalid_input = counts.invalid_input,
            cancelled = counts.cancelled,
            "enrichment finished"
        );

        output
    }

    /// Enrich `records` from every binding and merge the results row by row.
    ///
    /// Providers run concurrently; each one's columns and status stay
    /// independent of the others. A binding's own policy wins over the
    /// pipeline's.
    pub async fn run_all(
        &self,
        records: &[RecordInput],
        bindings: &[ProviderBinding],
    ) -> Vec<EnrichedRecord> {
        let batches = join_all(bindings.iter().map(|b| {
            let policy = b.policy.unwrap_or(self.policy);
            self.run_with_policy(records, b.client.as_ref(), &b.mapper, policy)
        }))
        .await;

        let mut batches = batches.into_iter();
        let Some(first) = batches.next() else {
            return records
                .iter()
                .enumerate()
                .map(|(index, input)| EnrichedRecord::bare(index, input.as_ref().ok().copied()))
                .collect();
        };

        batches.fold(first, |acc, batch| {
            acc.into_iter().zip(batch).map(|(a, b)| a.merge(b)).collect()
        })
    }

    async fn enrich_one(
        &self,
        index: usize,
        input: &RecordInput,
        client: &dyn ProviderClient,
        mapper: &FieldMapper,
        policy: MatchPolicy,
    ) -> EnrichedRecord {
        let provider = client.id();

        let record = match input {
            Ok(record) => *record,
            Err(e) => {
                debug!(index, %provider, "skipping row: {e}");
                return absent(index, None, provider, mapper, EnrichStatus::InvalidInput(e.clone()));
            }
        };

        if self.cancel.is_cancelled() {
            return absent(index, Some(record), provider, mapper, EnrichStatus::Cancelled);
        }

        let window = match client.window_strategy().window_for(&record) {
            Ok(window) => window,
            Err(e) => {
                debug!(index, %provider, "cannot build query window: {e}");
                return absent(index, Some(record), provider, mapper, EnrichStatus::InvalidInput(e));
            }
        };

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return absent(index, Some(record), provider, mapper, EnrichStatus::Cancelled);
            }
            fetched = self.fetch_bounded(client, &window) => fetched,
        };

        let candidates = match fetched {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(index, %provider, "provider error: {e}");
                let status = EnrichStatus::ProviderError(e);
                return absent(index, Some(record), provider, mapper, status);
            }
        };

        match select(record.timestamp, &candidates, policy) {
            MatchResult::Matched { observation, offset } => {
                debug!(index, %provider, offset_secs = offset.num_seconds(), "matched");
                EnrichedRecord::new(
                    index,
                    Some(record),
                    provider,
                    EnrichStatus::Matched { offset },
                    mapper.project(observation, provider),
                )
            }
            MatchResult::NoMatch => {
                debug!(index, %provider, candidates = candidates.len(), "no matching observation");
                EnrichedRecord::new(
                    index,
                    Some(record),
                    provider,
                    EnrichStatus::NoMatch,
                    mapper.project_unmatched(&candidates, provider),
                )
            }
        }
    }

    async fn fetch_bounded(
        &self,
        client: &dyn ProviderClient,
        window: &QueryWindow,
    ) -> Result<Vec<Observation>, ProviderError> {
        match self.request_timeout {
            None => client.fetch(window).await,
            Some(limit) => tokio::time::timeout(limit, client.fetch(window))
                .await
                .unwrap_or_else(|_| {
                    Err(ProviderError::Transport(format!(
                        "no response within {}ms",
                        limit.as_millis()
                    )))
                }),
        }
    }
}

fn absent(
    index: usize,
    record: Option<Record>,
    provider: ProviderId,
    mapper: &FieldMapper,
    status: EnrichStatus,
) -> EnrichedRecord {
    EnrichedRecord::new(index, record, provider, status, mapper.absent(provider))
}

/// Per-provider tally of statuses in an output batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub matched: usize,
    pub no_match: usize,
    pub provider_error: usize,
    pub invalid_input: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn tally(records: &[EnrichedRecord], provider: ProviderId) -> Self {
        let mut counts = Self::default();
        for status in records.iter().filter_map(|r| r.status(provider)) {
            match status {
                EnrichStatus::Matched { .. } => counts.matched += 1,
                EnrichStatus::NoMatch => counts.no_match += 1,
                EnrichStatus::ProviderError(_) => counts.provider_error += 1,
                EnrichStatus::InvalidInput(_) => counts.invalid_input += 1,
                EnrichStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.matched + self.no_match + self.provider_error + self.invalid_input + self.cancelled
    }
}

/// Tally every provider that appears in `records`.
pub fn summarize(records: &[EnrichedRecord]) -> BTreeMap<ProviderId, StatusCounts> {
    let mut providers: Vec<ProviderId> = records
        .iter()
        .flat_map(|r| r.statuses().keys().copied())
        .collect();
    providers.sort();
    providers.dedup();

    providers
        .into_iter()
        .map(|p| (p, StatusCounts::tally(records, p)))
        .collect()
}
