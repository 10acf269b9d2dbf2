pub mod device;
pub mod geolocation;
pub mod http;
pub mod kv;

use std::sync::Arc;

pub use self::device::{DeviceEffects, EffectError, SmsLink, StatusSink};
pub use self::geolocation::{Geolocation, Position, PositionError, PositionOptions};
pub use self::http::{DeliveryClient, DeliveryError, HttpDeliveryClient, ValidatedUrl};
pub use self::kv::{KeyValueStore, KvError, KvKey, MemoryKvStore};

#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteKvStore;

/// Everything the relay needs from its host platform, injected at construction.
#[derive(Clone)]
pub struct Capabilities {
    pub geolocation: Arc<dyn Geolocation>,
    pub kv: Arc<dyn KeyValueStore>,
    pub delivery: Arc<dyn DeliveryClient>,
    pub device: Arc<dyn DeviceEffects>,
    pub status: Arc<dyn StatusSink>,
}
