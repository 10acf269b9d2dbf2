//! Scripted fakes of every platform capability.
//!
//! Compiled for the crate's own tests and behind the `testing` feature for
//! hosts that want them in previews.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::capabilities::kv::StorageErrorCode;
use crate::capabilities::{
    Capabilities, DeliveryClient, DeliveryError, DeviceEffects, EffectError, Geolocation,
    KeyValueStore, KvError, KvKey, MemoryKvStore, Position, PositionError, PositionOptions,
    StatusSink,
};
use crate::model::AlertPayload;

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum GeoScript {
    Unsupported,
    Answer(Result<Position, PositionError>),
    Hang,
}

pub struct ScriptedGeolocation {
    script: GeoScript,
    requests: Mutex<Vec<PositionOptions>>,
}

impl ScriptedGeolocation {
    fn with_script(script: GeoScript) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(lat: f64, lon: f64) -> Self {
        Self::position(Position {
            latitude: lat,
            longitude: lon,
            accuracy_m: Some(5.0),
        })
    }

    pub fn position(position: Position) -> Self {
        Self::with_script(GeoScript::Answer(Ok(position)))
    }

    pub fn failing(error: PositionError) -> Self {
        Self::with_script(GeoScript::Answer(Err(error)))
    }

    pub fn unsupported() -> Self {
        Self::with_script(GeoScript::Unsupported)
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self::with_script(GeoScript::Hang)
    }

    pub fn requests(&self) -> Vec<PositionOptions> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl Geolocation for ScriptedGeolocation {
    fn is_supported(&self) -> bool {
        !matches!(self.script, GeoScript::Unsupported)
    }

    async fn current_position(&self, options: PositionOptions) -> Result<Position, PositionError> {
        locked(&self.requests).push(options);
        match &self.script {
            GeoScript::Answer(answer) => answer.clone(),
            GeoScript::Hang => std::future::pending().await,
            GeoScript::Unsupported => Err(PositionError::PositionUnavailable(
                "Geolocation not supported".into(),
            )),
        }
    }
}

type DeliveryRule = Box<dyn Fn(&AlertPayload) -> Result<(), DeliveryError> + Send + Sync>;

/// Records every attempted payload; the outcome comes from a rule.
pub struct RecordingDelivery {
    rule: DeliveryRule,
    should_fail: AtomicBool,
    attempts: Mutex<Vec<AlertPayload>>,
}

impl RecordingDelivery {
    pub fn succeeding() -> Self {
        Self::with_rule(|_| Ok(()))
    }

    pub fn failing(error: DeliveryError) -> Self {
        Self::with_rule(move |_| Err(error.clone()))
    }

    pub fn with_rule(
        rule: impl Fn(&AlertPayload) -> Result<(), DeliveryError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rule: Box::new(rule),
            should_fail: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the rule with a network failure while set.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<AlertPayload> {
        locked(&self.attempts).clone()
    }

    pub fn attempt_count(&self) -> usize {
        locked(&self.attempts).len()
    }
}

#[async_trait]
impl DeliveryClient for RecordingDelivery {
    async fn send(&self, payload: &AlertPayload) -> Result<(), DeliveryError> {
        locked(&self.attempts).push(payload.clone());
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Network("Failed to fetch".into()));
        }
        (self.rule)(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Vibrate(Vec<u32>),
    PlayAudio(String),
    OpenUrl(String),
}

/// Records device effects; optionally reports every one as unsupported.
#[derive(Default)]
pub struct RecordingDevice {
    unsupported: bool,
    calls: Mutex<Vec<DeviceCall>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unsupported() -> Self {
        Self {
            unsupported: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        locked(&self.calls).clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::OpenUrl(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DeviceCall) -> Result<(), EffectError> {
        locked(&self.calls).push(call);
        if self.unsupported {
            Err(EffectError::Unsupported)
        } else {
            Ok(())
        }
    }
}

impl DeviceEffects for RecordingDevice {
    fn vibrate(&self, pattern_ms: &[u32]) -> Result<(), EffectError> {
        self.record(DeviceCall::Vibrate(pattern_ms.to_vec()))
    }

    fn play_audio(&self, src: &str) -> Result<(), EffectError> {
        self.record(DeviceCall::PlayAudio(src.to_string()))
    }

    fn open_url(&self, url: &str) -> Result<(), EffectError> {
        self.record(DeviceCall::OpenUrl(url.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Status(String),
    Alert(String),
}

#[derive(Default)]
pub struct RecordingStatus {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        locked(&self.events).clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Status(text) => Some(text),
                StatusEvent::Alert(_) => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Alert(text) => Some(text),
                StatusEvent::Status(_) => None,
            })
            .collect()
    }

    pub fn last_status(&self) -> Option<String> {
        self.statuses().pop()
    }
}

impl StatusSink for RecordingStatus {
    fn set_status(&self, text: &str) {
        locked(&self.events).push(StatusEvent::Status(text.to_string()));
    }

    fn alert(&self, text: &str) {
        locked(&self.events).push(StatusEvent::Alert(text.to_string()));
    }
}

/// Failure-injectable store wrapper
pub struct FailableKvStore<S: KeyValueStore> {
    inner: S,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl<S: KeyValueStore> FailableKvStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful `set`/`remove` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FailableKvStore<S> {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(KvError::storage(StorageErrorCode::Unavailable, "Injected failure"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::storage(StorageErrorCode::QuotaExceeded, "Injected failure"));
        }
        self.inner.set(key, value).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &KvKey) -> Result<(), KvError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::storage(StorageErrorCode::Unavailable, "Injected failure"));
        }
        self.inner.remove(key).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Concrete handles to the fakes behind a [`Capabilities`] bundle, so tests can
/// script and inspect them after handing the bundle over.
pub struct TestPlatform {
    pub geolocation: Arc<ScriptedGeolocation>,
    pub kv: Arc<FailableKvStore<MemoryKvStore>>,
    pub delivery: Arc<RecordingDelivery>,
    pub device: Arc<RecordingDevice>,
    pub status: Arc<RecordingStatus>,
}

impl TestPlatform {
    pub fn new(geolocation: ScriptedGeolocation, delivery: RecordingDelivery) -> Self {
        Self {
            geolocation: Arc::new(geolocation),
            kv: Arc::new(FailableKvStore::new(MemoryKvStore::new())),
            delivery: Arc::new(delivery),
            device: Arc::new(RecordingDevice::new()),
            status: Arc::new(RecordingStatus::new()),
        }
    }

    pub fn with_device(mut self, device: RecordingDevice) -> Self {
        self.device = Arc::new(device);
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            geolocation: self.geolocation.clone(),
            kv: self.kv.clone(),
            delivery: self.delivery.clone(),
            device: self.device.clone(),
            status: self.status.clone(),
        }
    }
}
