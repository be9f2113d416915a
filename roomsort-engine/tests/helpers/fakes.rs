//! In-memory stand-ins for the downstream services

use async_trait::async_trait;
use roomsort_common::{Error, Result};
use roomsort_engine::models::{split_image_file, ImageRecord, RequestStatus};
use roomsort_engine::services::{
    ClassifierError, DetectedLabel, LabelDetector, NotificationSink, ObjectStore, OutcomeSink,
    VisionClassifier, VisionResponse,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Image id from an object path or URL such as `mem://resized-images/R1/a.png`
pub fn image_id_of(reference: &str) -> String {
    let file = reference.rsplit('/').next().unwrap_or(reference);
    split_image_file(file)
        .map(|(id, _)| id.to_string())
        .unwrap_or_else(|| file.to_string())
}

/// Label detector answering from a per-image table; unknown images get no labels
#[derive(Default)]
pub struct FakeDetector {
    answers: Mutex<HashMap<String, std::result::Result<Vec<DetectedLabel>, ClassifierError>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&self, image_id: &str, name: &str, confidence: f64) {
        self.labels(image_id, &[(name, confidence)]);
    }

    pub fn labels(&self, image_id: &str, labels: &[(&str, f64)]) {
        let labels = labels
            .iter()
            .map(|(name, confidence)| DetectedLabel {
                name: name.to_string(),
                confidence: *confidence,
            })
            .collect();
        self.answers
            .lock()
            .unwrap()
            .insert(image_id.to_string(), Ok(labels));
    }

    pub fn fail(&self, image_id: &str, error: ClassifierError) {
        self.answers
            .lock()
            .unwrap()
            .insert(image_id.to_string(), Err(error));
    }

    /// Image refs passed to `detect`, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabelDetector for FakeDetector {
    async fn detect(
        &self,
        image_ref: &str,
        _max_labels: u32,
        _min_confidence: f64,
    ) -> std::result::Result<Vec<DetectedLabel>, ClassifierError> {
        self.calls.lock().unwrap().push(image_ref.to_string());
        self.answers
            .lock()
            .unwrap()
            .get(&image_id_of(image_ref))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn service_name(&self) -> &str {
        "label-detection"
    }
}

/// Vision model with scripted answers per image; unscripted calls get an
/// answer that matches no vocabulary keyword
pub struct FakeVision {
    scripts: Mutex<HashMap<String, VecDeque<std::result::Result<VisionResponse, ClassifierError>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, String)>>,
    default_tokens: u64,
}

impl Default for FakeVision {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            default_tokens: 10,
        }
    }
}

impl FakeVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, image_id: &str, text: &str, tokens_used: u64) {
        self.push(
            image_id,
            Ok(VisionResponse {
                text: text.to_string(),
                tokens_used,
            }),
        );
    }

    pub fn fail(&self, image_id: &str, error: ClassifierError) {
        self.push(image_id, Err(error));
    }

    /// Stall the next call for `image_id` before answering
    pub fn delay(&self, image_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(image_id.to_string(), delay);
    }

    fn push(&self, image_id: &str, result: std::result::Result<VisionResponse, ClassifierError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(image_id.to_string())
            .or_default()
            .push_back(result);
    }

    /// Image ids classified, in call order
    pub fn called_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| image_id_of(url))
            .collect()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionClassifier for FakeVision {
    async fn classify(
        &self,
        image_url: &str,
        prompt: &str,
    ) -> std::result::Result<VisionResponse, ClassifierError> {
        self.calls
            .lock()
            .unwrap()
            .push((image_url.to_string(), prompt.to_string()));

        let delay = self.delays.lock().unwrap().remove(&image_id_of(image_url));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&image_id_of(image_url))
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or_else(|| {
            Ok(VisionResponse {
                text: "I cannot tell".to_string(),
                tokens_used: self.default_tokens,
            })
        })
    }

    fn service_name(&self) -> &str {
        "vision-language-model"
    }
}

/// Hands out `mem://` URLs
pub struct FakeObjectStore;

impl ObjectStore for FakeObjectStore {
    fn presigned_read_url(&self, path: &str, _ttl: Duration) -> Result<String> {
        Ok(format!("mem://{}", path))
    }

    fn presigned_write_url(&self, path: &str, _content_type: &str, _ttl: Duration) -> Result<String> {
        Ok(format!("mem://{}?upload", path))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    results: Mutex<Vec<RequestStatus>>,
    alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<RequestStatus> {
        self.results.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<(String, String)> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn publish_result(&self, status: &RequestStatus) -> Result<()> {
        self.results.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn publish_alert(&self, request_id: &str, message: &str) -> Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push((request_id.to_string(), message.to_string()));
        Ok(())
    }
}

/// Keeps every write in memory; can be told to fail after some writes
#[derive(Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<Vec<ImageRecord>>>,
    fail_after: Mutex<Option<usize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `writes` writes, then reject every later one
    pub fn fail_after(&self, writes: usize) {
        *self.fail_after.lock().unwrap() = Some(writes);
    }

    /// Records per write call, in call order
    pub fn writes(&self) -> Vec<Vec<ImageRecord>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<ImageRecord> {
        self.writes().into_iter().flatten().collect()
    }
}

#[async_trait]
impl OutcomeSink for RecordingSink {
    async fn write(&self, records: &[ImageRecord]) -> Result<()> {
        let mut writes = self.writes.lock().unwrap();
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if writes.len() >= limit {
                return Err(Error::Internal("disk full".to_string()));
            }
        }
        writes.push(records.to_vec());
        Ok(())
    }
}
