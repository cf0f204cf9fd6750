//! Beat/measure event types and the typed event bus that fans them out

use crate::director::VisualSystem;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Where a beat came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatSource {
    /// Adaptive detection on the analyzed energy stream
    Audio,
    /// Synthetic pattern beat
    Fallback,
    /// Live input onset
    Microphone,
    /// Metronome clock of a loaded track
    Track,
}

/// Band levels carried by beats and fed to the mapping handlers
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioLevels {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub energy: f32,
}

impl AudioLevels {
    /// Levels from three bands; energy is their mean. Everything clamped.
    pub fn from_bands(bass: f32, mid: f32, high: f32) -> Self {
        let bass = crate::numeric::clamp01(bass);
        let mid = crate::numeric::clamp01(mid);
        let high = crate::numeric::clamp01(high);
        Self {
            bass,
            mid,
            high,
            energy: (bass + mid + high) / 3.0,
        }
    }

    /// Copy with every field clamped to [0, 1] (NaN becomes 0).
    pub fn clamped(&self) -> Self {
        Self {
            bass: crate::numeric::clamp01(self.bass),
            mid: crate::numeric::clamp01(self.mid),
            high: crate::numeric::clamp01(self.high),
            energy: crate::numeric::clamp01(self.energy),
        }
    }
}

/// Mapping profile a beat was produced under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKey {
    pub system: VisualSystem,
    pub geometry: usize,
}

/// A detected or synthesized beat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Milliseconds on the emitter's clock
    pub timestamp: f64,
    pub bpm: f32,
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub energy: f32,
    pub source: BeatSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileKey>,
}

impl BeatEvent {
    pub fn new(
        timestamp: f64,
        bpm: f32,
        levels: AudioLevels,
        source: BeatSource,
        profile: Option<ProfileKey>,
    ) -> Self {
        let levels = levels.clamped();
        Self {
            timestamp,
            bpm,
            bass: levels.bass,
            mid: levels.mid,
            high: levels.high,
            energy: levels.energy,
            source,
            profile,
        }
    }

    pub fn levels(&self) -> AudioLevels {
        AudioLevels {
            bass: self.bass,
            mid: self.mid,
            high: self.high,
            energy: self.energy,
        }
    }
}

/// Fired every `measure_beats` capture beats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureEvent {
    pub timestamp: f64,
    /// Measures completed since the last start (1-based)
    pub measure_index: u64,
    /// Beat index that closed the measure
    pub beat_index: u64,
    pub source: BeatSource,
}

type Listener<E> = Box<dyn FnMut(&E) + Send>;

struct BusInner<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
    /// Ids unsubscribed while their listener was checked out by `emit`
    removed_during_emit: Vec<u64>,
    emitting: bool,
}

/// Typed observer list.
///
/// Cloning shares the same listener set. Listeners may subscribe or
/// unsubscribe from inside a callback.
pub struct EventBus<E> {
    inner: Arc<Mutex<BusInner<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                listeners: Vec::new(),
                removed_during_emit: Vec::new(),
                emitting: false,
            })),
        }
    }

    /// Register a listener; the returned handle removes it again.
    pub fn subscribe<F>(&self, listener: F) -> Subscription<E>
    where
        F: FnMut(&E) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Box::new(listener)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Deliver `event` to every listener registered before the call.
    pub fn emit(&self, event: &E) {
        let mut checked_out = {
            let mut inner = self.inner.lock();
            if inner.emitting {
                // Re-entrant emit from a listener: listeners are checked out
                log::debug!("Nested event emit skipped");
                return;
            }
            inner.emitting = true;
            std::mem::take(&mut inner.listeners)
        };

        for (_, listener) in checked_out.iter_mut() {
            listener(event);
        }

        let mut inner = self.inner.lock();
        let removed = std::mem::take(&mut inner.removed_during_emit);
        checked_out.retain(|(id, _)| !removed.contains(id));
        let added = std::mem::take(&mut inner.listeners);
        checked_out.extend(added);
        inner.listeners = checked_out;
        inner.emitting = false;
    }
}

/// Handle returned by [`EventBus::subscribe`]
pub struct Subscription<E> {
    id: u64,
    bus: Weak<Mutex<BusInner<E>>>,
}

impl<E> Subscription<E> {
    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut inner = bus.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _)| *id != self.id);
        if inner.listeners.len() != before {
            return true;
        }
        if inner.emitting {
            inner.removed_during_emit.push(self.id);
            return true;
        }
        false
    }
}
