//! Lead fetch pipeline: paginate the provider, dedupe, persist, export.
//!
//! Pages are processed strictly in sequence. After each page the job row is
//! updated (counters plus the `next_page` cursor), so a crash loses at most
//! the page in flight and a retry resumes where the last attempt stopped.
//!
//! Failure policy per call:
//!
//! | failure                               | effect                         |
//! |---------------------------------------|--------------------------------|
//! | provider transient error              | retried, then page skipped     |
//! | N consecutive skipped pages           | fatal                          |
//! | provider unauthorized                 | fatal, reauth required         |
//! | provider call exceeds `fetch_timeout` | fatal for the attempt          |
//! | sheet append, insufficient scope      | fatal, reauth required         |
//! | sheet append, other error             | batch skipped, annotated       |

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use leadflow_campaigns::{
    AttemptAnnotation, Campaign, CampaignJob, CampaignJobStatus, Lead, PageProgress, ProspectRecord,
    RetryPolicy,
};
use leadflow_core::{DomainError, DomainResult, Entity};

use super::ledger::{AttemptLedger, AttemptRef};
use crate::clock::Clock;
use crate::external::{LeadPage, LeadProvider, PageRequest, ProviderError, SinkError, SpreadsheetSink};
use crate::store::{CampaignJobStore, LeadStore, StoreError};

/// Largest number of rows sent to the spreadsheet in one append call.
pub const MAX_EXPORT_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on pages over the job's lifetime.
    pub max_pages: u32,
    /// Rows per append call; clamped to [`MAX_EXPORT_BATCH`].
    pub export_batch_size: usize,
    pub inter_batch_delay: Duration,
    /// Budget for one provider call.
    pub fetch_timeout: Duration,
    pub page_retry: RetryPolicy,
    pub max_consecutive_page_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pages: 200,
            export_batch_size: MAX_EXPORT_BATCH,
            inter_batch_delay: Duration::from_millis(250),
            fetch_timeout: Duration::from_secs(30),
            page_retry: RetryPolicy::default(),
            max_consecutive_page_failures: 3,
        }
    }
}

impl PipelineConfig {
    pub fn batch_size(&self) -> usize {
        self.export_batch_size.clamp(1, MAX_EXPORT_BATCH)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("reauth required: {0}")]
    ReauthRequired(String),
    #[error("provider page {page} timed out after {after:?}")]
    Timeout { page: u32, after: Duration },
    #[error("{count} consecutive provider pages failed, last error: {last_error}")]
    TooManyPageFailures { count: u32, last_error: String },
    #[error("job left RUNNING while the pipeline owned it (now {0})")]
    Preempted(CampaignJobStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The provider returned an empty page or reported no more pages.
    Exhausted,
    MaxLeadsReached,
    PageLimitReached,
    /// The job was cancelled, or a newer attempt took it over.
    Cancelled,
}

/// Counters for the pages this attempt processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineTotals {
    pub pages: u32,
    pub fetched: u64,
    pub written: u64,
    pub skipped: u64,
    pub export_failures: u32,
    pub page_failures: u32,
}

impl PipelineTotals {
    fn add(&mut self, progress: &PageProgress) {
        self.pages += 1;
        self.fetched += progress.fetched;
        self.written += progress.written;
        self.skipped += progress.skipped;
        self.export_failures += progress.export_failures;
        if progress.page_failed {
            self.page_failures += 1;
        }
    }
}

/// Outcome of [`LeadFetchPipeline::run`]; totals are kept even on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub totals: PipelineTotals,
    pub result: Result<StopReason, PipelineError>,
}

enum PageFetch {
    Fetched(LeadPage),
    Skipped(String),
}

/// Fails unless `job` is still on the attempt the caller owns.
pub(crate) fn ensure_current_attempt(job: &CampaignJob, attempt: u32) -> DomainResult<()> {
    if job.attempt_count() != attempt {
        return Err(DomainError::conflict(format!(
            "attempt {attempt} superseded by attempt {}",
            job.attempt_count()
        )));
    }
    Ok(())
}

pub struct LeadFetchPipeline {
    provider: Arc<dyn LeadProvider>,
    sink: Arc<dyn SpreadsheetSink>,
    leads: Arc<dyn LeadStore>,
    jobs: Arc<dyn CampaignJobStore>,
    ledger: AttemptLedger,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl LeadFetchPipeline {
    pub fn new(
        provider: Arc<dyn LeadProvider>,
        sink: Arc<dyn SpreadsheetSink>,
        leads: Arc<dyn LeadStore>,
        jobs: Arc<dyn CampaignJobStore>,
        ledger: AttemptLedger,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            provider,
            sink,
            leads,
            jobs,
            ledger,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process pages for a RUNNING job until a stop condition or fatal error.
    pub async fn run(&self, campaign: &Campaign, attempt: AttemptRef) -> PipelineRun {
        let mut totals = PipelineTotals::default();
        let result = self.run_pages(campaign, attempt, &mut totals).await;
        PipelineRun { totals, result }
    }

    async fn run_pages(
        &self,
        campaign: &Campaign,
        attempt: AttemptRef,
        totals: &mut PipelineTotals,
    ) -> Result<StopReason, PipelineError> {
        let mut consecutive_failures = 0u32;

        loop {
            // Page boundary: observe cancellation and stop conditions on the stored row.
            let job = self
                .jobs
                .get(attempt.job_id)?
                .ok_or_else(|| StoreError::not_found("campaign job", attempt.job_id))?;
            if job.attempt_count() != attempt.number {
                return Ok(StopReason::Cancelled);
            }
            match job.status() {
                CampaignJobStatus::Running => {}
                CampaignJobStatus::Cancelled => return Ok(StopReason::Cancelled),
                other => return Err(PipelineError::Preempted(other)),
            }
            if job.leads_written() >= campaign.max_leads {
                return Ok(StopReason::MaxLeadsReached);
            }
            if job.total_pages() >= self.config.max_pages {
                return Ok(StopReason::PageLimitReached);
            }

            let request = PageRequest {
                index: job.next_page(),
                size: campaign.page_size,
            };
            let page = match self.fetch_page(campaign, request).await? {
                PageFetch::Fetched(page) => {
                    consecutive_failures = 0;
                    page
                }
                PageFetch::Skipped(error) => {
                    consecutive_failures += 1;
                    warn!(
                        job_id = %attempt.job_id,
                        page = request.index,
                        error = %error,
                        "provider page skipped after retries"
                    );
                    self.ledger.annotate(
                        attempt,
                        AttemptAnnotation::PageSkipped {
                            page: request.index,
                            error: error.clone(),
                        },
                    )?;
                    let progress = PageProgress {
                        page_failed: true,
                        next_page: request.index + 1,
                        ..Default::default()
                    };
                    if !self.record(attempt, progress, totals)? {
                        return Ok(StopReason::Cancelled);
                    }
                    if consecutive_failures >= self.config.max_consecutive_page_failures {
                        return Err(PipelineError::TooManyPageFailures {
                            count: consecutive_failures,
                            last_error: error,
                        });
                    }
                    continue;
                }
            };

            if page.leads.is_empty() {
                return Ok(StopReason::Exhausted);
            }
            let has_more = page.has_more;
            let progress = self
                .process_page(campaign, attempt, request.index, page.leads, totals)
                .await?;
            if !self.record(attempt, progress, totals)? {
                return Ok(StopReason::Cancelled);
            }
            if !has_more {
                return Ok(StopReason::Exhausted);
            }
        }
    }

    async fn fetch_page(&self, campaign: &Campaign, request: PageRequest) -> Result<PageFetch, PipelineError> {
        let policy = &self.config.page_retry;
        let mut tries = 0u32;

        loop {
            tries += 1;
            let call = self.provider.search(&campaign.criteria, request);
            match tokio::time::timeout(self.config.fetch_timeout, call).await {
                Err(_) => {
                    return Err(PipelineError::Timeout {
                        page: request.index,
                        after: self.config.fetch_timeout,
                    });
                }
                Ok(Ok(page)) => return Ok(PageFetch::Fetched(page)),
                Ok(Err(ProviderError::Unauthorized(msg))) => {
                    return Err(PipelineError::ReauthRequired(format!(
                        "lead provider rejected credentials: {msg}"
                    )));
                }
                Ok(Err(ProviderError::Transient(msg))) => {
                    if !policy.allows_another(tries) {
                        return Ok(PageFetch::Skipped(msg));
                    }
                    let delay = policy.delay_after(tries);
                    debug!(page = request.index, tries, ?delay, error = %msg, "retrying provider page");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Dedupe and persist one page, then export the survivors in batches.
    async fn process_page(
        &self,
        campaign: &Campaign,
        attempt: AttemptRef,
        index: u32,
        records: Vec<ProspectRecord>,
        totals: &mut PipelineTotals,
    ) -> Result<PageProgress, PipelineError> {
        let now = self.clock.now();
        let tenant_id = campaign.tenant_id();
        let campaign_id = *campaign.id();

        let fetched = records.len();
        let candidates: Vec<Lead> = records
            .into_iter()
            .filter_map(|r| Lead::from_prospect(tenant_id, campaign_id, r, now))
            .collect();
        let usable = candidates.len();
        let survivors = self.leads.insert_new(tenant_id, campaign_id, candidates)?;

        let mut progress = PageProgress {
            fetched: fetched as u64,
            skipped: (fetched - survivors.len()) as u64,
            next_page: index + 1,
            ..Default::default()
        };
        debug!(
            job_id = %attempt.job_id,
            page = index,
            fetched,
            unusable = fetched - usable,
            duplicates = usable - survivors.len(),
            "page deduplicated"
        );

        for (batch, chunk) in survivors.chunks(self.config.batch_size()).enumerate() {
            if batch > 0 && !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }

            let rows = chunk.iter().map(Lead::to_row).collect();
            match self.sink.append_rows(&campaign.destination, rows).await {
                Ok(()) => progress.written += chunk.len() as u64,
                Err(SinkError::InsufficientScope(msg)) => {
                    // The page's leads are persisted; keep its counters before aborting.
                    self.record(attempt, progress, totals)?;
                    return Err(PipelineError::ReauthRequired(format!(
                        "spreadsheet write scope missing: {msg}"
                    )));
                }
                Err(err) => {
                    warn!(
                        job_id = %attempt.job_id,
                        page = index,
                        batch,
                        rows = chunk.len(),
                        error = %err,
                        "export batch skipped"
                    );
                    progress.export_failures += 1;
                    self.ledger.annotate(
                        attempt,
                        AttemptAnnotation::BatchFailed {
                            page: index,
                            batch: batch as u32,
                            rows: chunk.len() as u32,
                            error: err.to_string(),
                        },
                    )?;
                }
            }
        }

        Ok(progress)
    }

    /// Fold page counters into the row. `false` if a newer attempt owns it.
    fn record(
        &self,
        attempt: AttemptRef,
        progress: PageProgress,
        totals: &mut PipelineTotals,
    ) -> Result<bool, PipelineError> {
        let now = self.clock.now();
        let updated = self.jobs.transition(attempt.job_id, &mut |job| {
            ensure_current_attempt(job, attempt.number)?;
            job.record_page(progress, now)
        });

        match updated {
            Ok(_) => {
                totals.add(&progress);
                Ok(true)
            }
            Err(StoreError::Rejected(err)) => {
                debug!(job_id = %attempt.job_id, error = %err, "page progress not recorded");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadflow_campaigns::{IdempotencyKey, JobPhase, LeadCriteria, SheetDestination};
    use leadflow_core::{CampaignId, TenantId};

    use super::*;
    use crate::clock::SystemClock;
    use crate::external::{InMemoryLeadProvider, InMemorySpreadsheetSink};
    use crate::store::{InMemoryAttemptStore, InMemoryCampaignJobStore, InMemoryLeadStore};

    struct Fixture {
        jobs: Arc<InMemoryCampaignJobStore>,
        leads: Arc<InMemoryLeadStore>,
        sink: Arc<InMemorySpreadsheetSink>,
        provider: Arc<InMemoryLeadProvider>,
        pipeline: LeadFetchPipeline,
        campaign: Campaign,
        attempt: AttemptRef,
    }

    fn page(prefix: &str, n: usize) -> Vec<ProspectRecord> {
        (0..n)
            .map(|i| ProspectRecord::with_email(format!("{prefix}{i}@example.com")))
            .collect()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            inter_batch_delay: Duration::ZERO,
            page_retry: RetryPolicy::fixed(2, Duration::ZERO),
            ..Default::default()
        }
    }

    fn fixture(
        provider: InMemoryLeadProvider,
        sink: InMemorySpreadsheetSink,
        max_leads: u64,
        config: PipelineConfig,
    ) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tenant = TenantId::new();
        let campaign = Campaign::new(
            CampaignId::new(),
            tenant,
            "pipeline",
            LeadCriteria::default(),
            max_leads,
            5,
            SheetDestination::new("sheet", "Leads"),
            Utc::now(),
        )
        .unwrap();

        let jobs = Arc::new(InMemoryCampaignJobStore::new());
        let (job, _) = jobs
            .insert_if_absent(CampaignJob::new(
                tenant,
                *campaign.id(),
                IdempotencyKey::derive(*campaign.id(), JobPhase::Initial),
                Utc::now(),
            ))
            .unwrap();
        let running = jobs
            .transition(*job.id(), &mut |j| j.start(Utc::now()).map(|_| ()))
            .unwrap();

        let leads = Arc::new(InMemoryLeadStore::new());
        let sink = Arc::new(sink);
        let provider = Arc::new(provider);
        let ledger = AttemptLedger::new(Arc::new(InMemoryAttemptStore::new()), clock.clone());
        let pipeline = LeadFetchPipeline::new(
            provider.clone(),
            sink.clone(),
            leads.clone(),
            jobs.clone(),
            ledger,
            clock,
            config,
        );

        Fixture {
            attempt: AttemptRef {
                tenant_id: tenant,
                job_id: *running.id(),
                number: running.attempt_count(),
            },
            jobs,
            leads,
            sink,
            provider,
            pipeline,
            campaign,
        }
    }

    #[tokio::test]
    async fn stops_when_provider_is_exhausted() {
        let f = fixture(
            InMemoryLeadProvider::new(vec![page("a", 5), page("b", 3)]),
            InMemorySpreadsheetSink::new(),
            100,
            config(),
        );

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert_eq!(run.result, Ok(StopReason::Exhausted));
        assert_eq!(run.totals.pages, 2);
        assert_eq!(run.totals.written, 8);

        let job = f.jobs.get(f.attempt.job_id).unwrap().unwrap();
        assert_eq!(job.leads_processed(), 8);
        assert_eq!(job.next_page(), 2);
        assert_eq!(f.sink.rows(&f.campaign.destination).len(), 8);
    }

    #[tokio::test]
    async fn duplicates_across_pages_are_skipped_not_written() {
        let mut second = page("b", 2);
        second.push(ProspectRecord::with_email("A0@EXAMPLE.com"));
        second.push(ProspectRecord::default());
        let f = fixture(
            InMemoryLeadProvider::new(vec![page("a", 2), second]),
            InMemorySpreadsheetSink::new(),
            100,
            config(),
        );

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert_eq!(run.result, Ok(StopReason::Exhausted));
        assert_eq!(run.totals.fetched, 6);
        assert_eq!(run.totals.written, 4);
        assert_eq!(run.totals.skipped, 2);
        assert_eq!(f.leads.list(f.attempt.tenant_id, *f.campaign.id()).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn transient_page_failure_is_retried() {
        let provider = InMemoryLeadProvider::new(vec![page("a", 5)])
            .fail_page(0, ProviderError::Transient("502".into()));
        let f = fixture(provider, InMemorySpreadsheetSink::new(), 100, config());

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert_eq!(run.result, Ok(StopReason::Exhausted));
        assert_eq!(run.totals.written, 5);
        assert_eq!(f.provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_skip_the_page_and_advance() {
        let provider = InMemoryLeadProvider::new(vec![page("a", 5), page("b", 5)])
            .fail_page(0, ProviderError::Transient("502".into()))
            .fail_page(0, ProviderError::Transient("502".into()));
        let f = fixture(provider, InMemorySpreadsheetSink::new(), 100, config());

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert_eq!(run.result, Ok(StopReason::Exhausted));
        assert_eq!(run.totals.page_failures, 1);
        assert_eq!(run.totals.written, 5);

        let job = f.jobs.get(f.attempt.job_id).unwrap().unwrap();
        assert_eq!(job.page_failures(), 1);
        assert_eq!(job.total_pages(), 2);
    }

    #[tokio::test]
    async fn consecutive_skipped_pages_become_fatal() {
        let mut provider = InMemoryLeadProvider::new(vec![page("a", 5), page("b", 5), page("c", 5)]);
        for index in 0..3 {
            provider = provider
                .fail_page(index, ProviderError::Transient("down".into()))
                .fail_page(index, ProviderError::Transient("down".into()));
        }
        let config = PipelineConfig {
            max_consecutive_page_failures: 2,
            ..config()
        };
        let f = fixture(provider, InMemorySpreadsheetSink::new(), 100, config);

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert!(matches!(
            run.result,
            Err(PipelineError::TooManyPageFailures { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn unauthorized_provider_is_fatal_without_retry() {
        let provider = InMemoryLeadProvider::new(vec![page("a", 5)])
            .fail_page(0, ProviderError::Unauthorized("token revoked".into()));
        let f = fixture(provider, InMemorySpreadsheetSink::new(), 100, config());

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert!(matches!(run.result, Err(PipelineError::ReauthRequired(_))));
        assert_eq!(f.provider.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let provider = InMemoryLeadProvider::new(vec![page("a", 5)]).with_latency(Duration::from_secs(60));
        let config = PipelineConfig {
            fetch_timeout: Duration::from_secs(5),
            ..config()
        };
        let f = fixture(provider, InMemorySpreadsheetSink::new(), 100, config);

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert_eq!(
            run.result,
            Err(PipelineError::Timeout {
                page: 0,
                after: Duration::from_secs(5)
            })
        );
    }

    #[tokio::test]
    async fn missing_write_scope_aborts_but_keeps_page_counters() {
        let sink = InMemorySpreadsheetSink::new().fail_call(1, SinkError::InsufficientScope("sheets.readonly".into()));
        let f = fixture(
            InMemoryLeadProvider::new(vec![page("a", 5), page("b", 5)]),
            sink,
            100,
            config(),
        );

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert!(matches!(run.result, Err(PipelineError::ReauthRequired(_))));

        let job = f.jobs.get(f.attempt.job_id).unwrap().unwrap();
        assert_eq!(job.leads_processed(), 5);
        assert_eq!(job.leads_written(), 0);
        assert_eq!(job.next_page(), 1);
    }

    #[tokio::test]
    async fn batches_are_capped_at_fifty_rows() {
        let provider = InMemoryLeadProvider::new(vec![page("a", 120)]);
        let config = PipelineConfig {
            export_batch_size: 500,
            ..config()
        };
        let f = fixture(provider, InMemorySpreadsheetSink::new(), 1_000, config);

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert_eq!(run.result, Ok(StopReason::Exhausted));
        assert_eq!(f.sink.calls(), 3);
        assert_eq!(run.totals.written, 120);
    }

    #[tokio::test]
    async fn cancelled_row_stops_at_next_page_boundary() {
        let f = fixture(
            InMemoryLeadProvider::new(vec![page("a", 5), page("b", 5)]),
            InMemorySpreadsheetSink::new(),
            100,
            config(),
        );
        f.jobs
            .transition(f.attempt.job_id, &mut |j| j.cancel(Utc::now()))
            .unwrap();

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert_eq!(run.result, Ok(StopReason::Cancelled));
        assert!(f.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn page_limit_bounds_the_run() {
        let pages = (0..10).map(|i| page(&format!("p{i}-"), 5)).collect();
        let config = PipelineConfig {
            max_pages: 3,
            ..config()
        };
        let f = fixture(InMemoryLeadProvider::new(pages), InMemorySpreadsheetSink::new(), 1_000, config);

        let run = f.pipeline.run(&f.campaign, f.attempt).await;
        assert_eq!(run.result, Ok(StopReason::PageLimitReached));
        assert_eq!(run.totals.pages, 3);
    }
}
