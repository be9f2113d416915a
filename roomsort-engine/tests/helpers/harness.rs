//! Workflow harness: real database, executor and rate limiter around fake
//! downstream services, driven with an explicit clock

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use roomsort_common::config::TomlConfig;
use roomsort_common::events::EventBus;
use roomsort_engine::db::{executions, images, SqliteBudgetStore};
use roomsort_engine::models::ImageRecord;
use roomsort_engine::services::{
    BudgetStore, FallbackTierRunner, FastTierRunner, RateLimiter, WindowKind,
};
use roomsort_engine::workflow::{
    ExecutionScheduler, SqliteScheduler, StepContext, StepExecutor, TransitionPolicy,
    WorkflowExecution,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use super::db_utils::{create_test_db, resized_record, seed_records};
use super::fakes::{FakeDetector, FakeObjectStore, FakeVision, RecordingNotifier};

/// Ticks before `drive` gives up on an execution that never idles
const MAX_TICKS: usize = 64;

/// Defaults with pacing disabled
pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.fast_tier.pacing_ms = 0;
    config
}

/// A fixed instant after the wall clock: 10:00:30 UTC tomorrow
///
/// New executions are due at creation time, so the test clock must not run
/// behind it. Mid-morning keeps a few minutes of offsets inside one day window.
pub fn test_now() -> DateTime<Utc> {
    let tomorrow = Utc::now().date_naive() + ChronoDuration::days(1);
    tomorrow
        .and_hms_opt(10, 0, 30)
        .expect("valid time of day")
        .and_utc()
}

pub struct Harness {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub detector: Arc<FakeDetector>,
    pub vision: Arc<FakeVision>,
    pub notifier: Arc<RecordingNotifier>,
    pub budget: SqliteBudgetStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub scheduler: Arc<SqliteScheduler>,
    pub executor: StepExecutor,
    pub config: TomlConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: TomlConfig) -> Self {
        let (dir, pool) = create_test_db().await.expect("Failed to create test database");
        let event_bus = EventBus::new(256);

        let detector = Arc::new(FakeDetector::new());
        let vision = Arc::new(FakeVision::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let budget = SqliteBudgetStore::new(pool.clone());
        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::new(budget.clone()),
            config.rate_limits.clone(),
        ));

        let fast_tier = Arc::new(FastTierRunner::new(
            detector.clone(),
            config.fast_tier.clone(),
            &config.storage.resized_prefix,
        ));
        let fallback_tier = Arc::new(FallbackTierRunner::new(
            vision.clone(),
            Arc::new(FakeObjectStore),
            config.fallback_tier.clone(),
            config.fast_tier.unit_price_usd,
            &config.storage.resized_prefix,
            Duration::from_secs(config.storage.url_ttl_secs),
        ));

        let context = Arc::new(StepContext {
            pool: pool.clone(),
            fast_tier,
            fallback_tier,
            rate_limiter: rate_limiter.clone(),
            notifier: notifier.clone(),
            max_tries: config.fallback_tier.max_tries,
        });
        let executor = StepExecutor::new(
            pool.clone(),
            context,
            event_bus.clone(),
            &config.workflow,
            TransitionPolicy::default(),
        );
        let scheduler = Arc::new(SqliteScheduler::new(pool.clone(), event_bus.clone()));

        Self {
            _dir: dir,
            pool,
            event_bus,
            detector,
            vision,
            notifier,
            budget,
            rate_limiter,
            scheduler,
            executor,
            config,
        }
    }

    /// Store fully resized images for `request_id` and start its workflow
    pub async fn seed(&self, request_id: &str, image_ids: &[&str]) -> Uuid {
        let today = test_now().date_naive();
        let records: Vec<ImageRecord> = image_ids
            .iter()
            .map(|id| resized_record(request_id, id, today))
            .collect();
        self.seed_with(request_id, &records).await
    }

    pub async fn seed_with(&self, request_id: &str, records: &[ImageRecord]) -> Uuid {
        seed_records(&self.pool, records).await;
        self.scheduler
            .start_execution(request_id)
            .await
            .expect("Failed to start execution")
    }

    /// Tick at `now` until nothing is due
    pub async fn drive(&self, now: DateTime<Utc>) {
        for _ in 0..MAX_TICKS {
            let claimed = self.executor.tick_at(now).await.expect("Executor tick failed");
            if claimed == 0 {
                return;
            }
        }
        panic!("executions still due after {} ticks", MAX_TICKS);
    }

    pub async fn records(&self, request_id: &str) -> Vec<ImageRecord> {
        images::load_request(&self.pool, request_id)
            .await
            .expect("Failed to load records")
    }

    pub async fn record(&self, request_id: &str, image_id: &str) -> ImageRecord {
        self.records(request_id)
            .await
            .into_iter()
            .find(|r| r.image_id == image_id)
            .unwrap_or_else(|| panic!("no record {}/{}", request_id, image_id))
    }

    pub async fn execution(&self, execution_id: Uuid) -> WorkflowExecution {
        executions::load_execution(&self.pool, execution_id)
            .await
            .expect("Failed to load execution")
            .expect("execution exists")
    }

    pub fn window_key(&self, kind: WindowKind, at: DateTime<Utc>) -> String {
        kind.window_key(&self.config.rate_limits.budget_key, at)
    }

    pub async fn used(&self, kind: WindowKind, at: DateTime<Utc>) -> u32 {
        self.budget
            .used(&self.window_key(kind, at))
            .await
            .expect("Failed to read budget window")
    }

    /// Pre-fill a budget window as if other executions had spent `used`
    pub async fn fill(&self, kind: WindowKind, at: DateTime<Utc>, used: u32) {
        let limit = self.rate_limiter.limit_for(kind);
        let expires_at = roomsort_common::time::window_start(at, kind.seconds()) + kind.seconds();
        let consumed = self
            .budget
            .try_consume(&self.window_key(kind, at), used, limit, expires_at)
            .await
            .expect("Failed to fill budget window");
        assert_eq!(consumed, Some(used), "window already had usage");
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
}
