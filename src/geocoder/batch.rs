// batch.rs
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::db::PostalCodeLookup;
use crate::domain::postal_code::{normalize, Coordinate};
use crate::geocoder::{GeocodeError, GeocodeProvider};
use crate::session::SearchTicket;

pub type GeocodeResult = HashMap<String, Coordinate>;

// Consecutive sub-batches in which every provider request failed before the
// provider is treated as down for the rest of the call.
const OUTAGE_BATCHES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct GeocoderSettings {
    pub batch_size: usize,
    /// Pause before a sub-batch when the previous one went to the provider.
    pub batch_delay: Duration,
    /// Upper bound on provider requests in flight within one sub-batch.
    pub max_concurrent: usize,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            batch_delay: Duration::from_millis(100),
            max_concurrent: 4,
        }
    }
}

/// Progress after one sub-batch: cumulative count, total, the codes just
/// processed and where their answers came from.
#[derive(Debug, Clone, Copy)]
pub struct GeocodeProgress<'a> {
    pub done: usize,
    pub total: usize,
    pub batch: &'a [String],
    pub from_store: usize,
    pub from_provider: usize,
}

/// What one sub-batch produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub done: usize,
    pub total: usize,
    pub codes: Vec<String>,
    pub results: GeocodeResult,
    pub from_store: usize,
    pub from_provider: usize,
}

impl BatchOutcome {
    pub fn progress(&self) -> GeocodeProgress<'_> {
        GeocodeProgress {
            done: self.done,
            total: self.total,
            batch: &self.codes,
            from_store: self.from_store,
            from_provider: self.from_provider,
        }
    }
}

/// Anything that turns postal codes into coordinates batch by batch.
pub trait Geocode {
    /// Lazily geocodes `codes`, one sub-batch per item. When `ticket` goes
    /// stale the sequence ends early.
    fn batches<'a>(
        &'a self,
        codes: &[String],
        ticket: Option<SearchTicket>,
    ) -> Box<dyn Iterator<Item = BatchOutcome> + 'a>;

    /// Drains [`Geocode::batches`], reporting after each sub-batch, and
    /// returns the merged result.
    fn geocode(
        &self,
        codes: &[String],
        on_progress: &mut dyn FnMut(GeocodeProgress<'_>),
    ) -> GeocodeResult {
        let mut merged = GeocodeResult::new();
        for outcome in self.batches(codes, None) {
            on_progress(outcome.progress());
            merged.extend(outcome.results);
        }
        merged
    }
}

/// Store-first geocoder with an optional external fallback.
pub struct BatchGeocoder {
    store: Arc<dyn PostalCodeLookup>,
    provider: Option<Arc<dyn GeocodeProvider>>,
    settings: GeocoderSettings,
}

impl BatchGeocoder {
    pub fn new(
        store: Arc<dyn PostalCodeLookup>,
        provider: Option<Arc<dyn GeocodeProvider>>,
        settings: GeocoderSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    /// Normalized, deduplicated codes in first-seen order. Invalid codes
    /// are dropped here.
    pub fn unique_codes(codes: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        codes
            .iter()
            .filter_map(|c| normalize(c))
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }
}

impl Geocode for BatchGeocoder {
    fn batches<'a>(
        &'a self,
        codes: &[String],
        ticket: Option<SearchTicket>,
    ) -> Box<dyn Iterator<Item = BatchOutcome> + 'a> {
        let unique = Self::unique_codes(codes);
        let total = unique.len();
        let size = self.settings.batch_size.max(1);
        let pending = unique.chunks(size).map(<[String]>::to_vec).collect();

        tracing::debug!(requested = codes.len(), unique = total, batch_size = size, "geocode started");

        Box::new(GeocodeBatches {
            geocoder: self,
            pending,
            done: 0,
            total,
            ticket,
            provider_down: false,
            failed_streak: Streak::default(),
            last_hit_provider: false,
        })
    }
}

/// Finite, non-restartable sequence of sub-batch outcomes.
pub struct GeocodeBatches<'a> {
    geocoder: &'a BatchGeocoder,
    pending: VecDeque<Vec<String>>,
    done: usize,
    total: usize,
    ticket: Option<SearchTicket>,
    provider_down: bool,
    failed_streak: Streak,
    last_hit_provider: bool,
}

/// Run of consecutive sub-batches where the provider answered nothing.
#[derive(Debug, Default, Clone, Copy)]
struct Streak {
    batches: usize,
    errors: usize,
}

impl GeocodeBatches<'_> {
    fn is_stale(&self) -> bool {
        self.ticket.as_ref().is_some_and(|t| !t.is_current())
    }

    /// A single failed request never turns the provider off. Only a run of
    /// fully failed sub-batches with enough errors to fill the worker pool
    /// does.
    fn record_provider_errors(&mut self, errors: usize, asked: usize) {
        if errors == 0 || errors < asked {
            self.failed_streak = Streak::default();
            return;
        }

        self.failed_streak.batches += 1;
        self.failed_streak.errors += errors;

        let needed = self.geocoder.settings.max_concurrent.max(1);
        if self.failed_streak.batches >= OUTAGE_BATCHES && self.failed_streak.errors >= needed {
            tracing::warn!(
                failed_batches = self.failed_streak.batches,
                failed_requests = self.failed_streak.errors,
                "geocoding provider looks down, returning store hits for the rest of this call"
            );
            self.provider_down = true;
        }
    }

    fn run_batch(&mut self, codes: Vec<String>) -> BatchOutcome {
        let wanted: HashSet<String> = codes.iter().cloned().collect();

        let mut results = match self.geocoder.store.lookup_many(&wanted) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "postal code store lookup failed, using provider for whole batch");
                GeocodeResult::new()
            }
        };
        let from_store = results.len();

        let misses: Vec<String> = codes
            .iter()
            .filter(|c| !results.contains_key(*c))
            .cloned()
            .collect();

        let mut from_provider = 0;
        self.last_hit_provider = false;

        if let (Some(provider), false) = (&self.geocoder.provider, misses.is_empty()) {
            if self.provider_down {
                tracing::debug!(misses = misses.len(), "provider marked down for this call, skipping");
            } else {
                self.last_hit_provider = true;
                let answers = escalate(provider.as_ref(), &misses, self.geocoder.settings.max_concurrent);

                let mut provider_errors = 0;
                let asked = answers.len();
                for (code, answer) in answers {
                    match answer {
                        Ok(coord) => {
                            results.insert(code, coord);
                            from_provider += 1;
                        }
                        Err(GeocodeError::NotFound(_)) => {
                            tracing::debug!(%code, "postal code not found by provider");
                        }
                        Err(e) => {
                            provider_errors += 1;
                            tracing::debug!(%code, error = %e, "provider lookup failed");
                        }
                    }
                }

                self.record_provider_errors(provider_errors, asked);
            }
        }

        self.done += codes.len();
        tracing::debug!(
            done = self.done,
            total = self.total,
            from_store,
            from_provider,
            "geocode batch complete"
        );

        BatchOutcome {
            done: self.done,
            total: self.total,
            codes,
            results,
            from_store,
            from_provider,
        }
    }
}

impl Iterator for GeocodeBatches<'_> {
    type Item = BatchOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() {
            return None;
        }
        if self.is_stale() {
            tracing::debug!(remaining = self.pending.len(), "search superseded, dropping geocode batches");
            self.pending.clear();
            return None;
        }

        let delay = self.geocoder.settings.batch_delay;
        if self.last_hit_provider && !delay.is_zero() {
            std::thread::sleep(delay);
            if self.is_stale() {
                self.pending.clear();
                return None;
            }
        }

        let codes = self.pending.pop_front()?;
        Some(self.run_batch(codes))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len()))
    }
}

/// Sends `misses` to the provider on at most `max_concurrent` threads.
fn escalate(
    provider: &dyn GeocodeProvider,
    misses: &[String],
    max_concurrent: usize,
) -> Vec<(String, Result<Coordinate, GeocodeError>)> {
    let workers = max_concurrent.clamp(1, misses.len().max(1));
    if workers == 1 {
        return misses
            .iter()
            .map(|code| (code.clone(), provider.geocode_postal_code(code)))
            .collect();
    }

    let counter = AtomicUsize::new(0);
    let next = &counter;
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                s.spawn(move || {
                    let mut out = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(code) = misses.get(i) else { break };
                        out.push((code.clone(), provider.geocode_postal_code(code)));
                    }
                    out
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect()
    })
}
