use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::db::{PostalCodeLookup, PostalCodeStore};
use crate::geocoder::{BatchGeocoder, GeocodeError, GeocodeProvider, HttpGeocoder};
use crate::map::{MapOptions, MapRegistry};

// Marker streams each hold a background thread.
const MAX_MARKER_STREAMS: usize = 16;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub store: PostalCodeStore,
    pub geocoder: Arc<BatchGeocoder>,
    pub map_options: MapOptions,
    /// One view per client container; each view owns its searches.
    pub maps: Mutex<MapRegistry>,
    marker_streams: Arc<AtomicUsize>,
}

/// Held by a running marker stream; frees its slot on drop.
pub struct StreamSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AppState {
    pub fn new(
        store: PostalCodeStore,
        provider: Option<Arc<dyn GeocodeProvider>>,
        config: &Config,
    ) -> Self {
        let lookup: Arc<dyn PostalCodeLookup> = Arc::new(store.clone());
        Self {
            geocoder: Arc::new(BatchGeocoder::new(lookup, provider, config.geocoder.clone())),
            store,
            map_options: config.map,
            maps: Mutex::new(MapRegistry::new()),
            marker_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Locks the map registry. A poisoned lock is logged and cleared.
    pub fn maps(&self) -> MutexGuard<'_, MapRegistry> {
        self.maps.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("map registry lock was poisoned, recovering");
            self.maps.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Claims a marker stream slot, or `None` when all are busy.
    pub fn try_stream_slot(&self) -> Option<StreamSlot> {
        let claimed = self
            .marker_streams
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_MARKER_STREAMS).then_some(n + 1)
            })
            .is_ok();
        claimed.then(|| StreamSlot {
            active: Arc::clone(&self.marker_streams),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, GeocodeError> {
        let store = PostalCodeStore::open(config.db_path.clone());

        let provider: Option<Arc<dyn GeocodeProvider>> = match &config.geocoder_url {
            Some(url) => Some(Arc::new(HttpGeocoder::new(
                url.clone(),
                config.geocoder_timeout,
            )?)),
            None => None,
        };

        if let Err(e) = store.count() {
            tracing::warn!(path = %config.db_path, error = %e, "postal code store not usable yet; lookups will fall back to provider");
        }

        Ok(Self::new(store, provider, config))
    }
}
