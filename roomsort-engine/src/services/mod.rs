//! Classification services
//!
//! Attempt bookkeeping, the shared rate limiter, both tier runners with their
//! downstream adapters, intake, status reads and the backfill reconciler.

pub mod attempt_tracker;
pub mod classifier;
pub mod fallback_tier;
pub mod fast_tier;
pub mod intake;
pub mod label_detector;
pub mod notifier;
pub mod object_store;
pub mod rate_limiter;
pub mod reconciler;
pub mod status;
pub mod tier_runner;
pub mod vision_client;

pub use attempt_tracker::RequestImages;
pub use classifier::{ClassifierError, DetectedLabel, LabelDetector, VisionClassifier, VisionResponse};
pub use fallback_tier::FallbackTierRunner;
pub use fast_tier::FastTierRunner;
pub use intake::{Intake, ResizeOutcome, UploadImage, UploadRequest, UploadResponse};
pub use label_detector::HttpLabelDetector;
pub use notifier::{EventBusNotifier, FanoutNotifier, NotificationSink, WebhookNotifier};
pub use object_store::{ObjectStore, SignedUrlIssuer};
pub use rate_limiter::{BudgetDecision, BudgetStore, RateLimiter, Reservation, WindowKind};
pub use reconciler::{ReconcileReport, Reconciler};
pub use tier_runner::{ClassificationOutcome, OutcomeSink, TierReport, TierRunner};
pub use vision_client::OpenAiVisionClient;
