use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use leadflow_campaigns::{CampaignJob, IdempotencyKey, JobPhase, Lead, ProspectRecord};
use leadflow_core::{CampaignId, TenantId};
use leadflow_infra::rate_limit::{EMAIL_SEND, FixedWindowRateLimiter, RateKey, RateLimitConfig};
use leadflow_infra::store::{CampaignJobStore, InMemoryCampaignJobStore, InMemoryLeadStore, LeadStore};
use std::time::Duration;

fn bench_rate_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_admission");

    for tenants in [1usize, 100, 10_000] {
        let limiter = FixedWindowRateLimiter::new(RateLimitConfig {
            capacity: u32::MAX,
            window: Duration::from_secs(60),
        });
        let keys: Vec<RateKey> = (0..tenants).map(|_| RateKey::new(EMAIL_SEND, TenantId::new())).collect();
        let now = Utc::now();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(tenants), &keys, |b, keys| {
            let mut i = 0usize;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                black_box(limiter.check_and_consume_at(key, 1, now).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_lead_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lead_dedup_page");

    for page_size in [25usize, 100] {
        group.throughput(Throughput::Elements(page_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(page_size), &page_size, |b, &page_size| {
            let tenant = TenantId::new();
            let campaign = CampaignId::new();
            let store = InMemoryLeadStore::new();
            let mut page = 0usize;

            b.iter(|| {
                // Half of every page repeats the previous one.
                let leads: Vec<Lead> = (0..page_size)
                    .map(|i| {
                        let n = page * page_size / 2 + i;
                        let record = ProspectRecord::with_email(format!("lead{n}@example.com"));
                        Lead::from_prospect(tenant, campaign, record, Utc::now()).unwrap()
                    })
                    .collect();
                page += 1;
                black_box(store.insert_new(tenant, campaign, leads).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_idempotent_insert(c: &mut Criterion) {
    c.bench_function("campaign_job_insert_if_absent_existing", |b| {
        let store = InMemoryCampaignJobStore::new();
        let tenant = TenantId::new();
        let campaign = CampaignId::new();
        let key = IdempotencyKey::derive(campaign, JobPhase::Initial);
        store
            .insert_if_absent(CampaignJob::new(tenant, campaign, key, Utc::now()))
            .unwrap();

        b.iter(|| {
            let job = CampaignJob::new(tenant, campaign, IdempotencyKey::derive(campaign, JobPhase::Initial), Utc::now());
            black_box(store.insert_if_absent(job).unwrap())
        });
    });
}

criterion_group!(benches, bench_rate_admission, bench_lead_dedup, bench_idempotent_insert);
criterion_main!(benches);
