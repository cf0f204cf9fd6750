//! Collaborator seams: parameter sinks and the active-system provider

use super::profiles::{VisualSystem, GEOMETRY_COUNT};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Receives parameter writes for one visual system
pub trait ParameterSink: Send {
    fn set_parameter(&mut self, name: &str, value: f32);
}

impl<F> ParameterSink for F
where
    F: FnMut(&str, f32) + Send,
{
    fn set_parameter(&mut self, name: &str, value: f32) {
        self(name, value)
    }
}

/// Cloneable parameter table; every clone sees the same values
#[derive(Debug, Clone, Default)]
pub struct SharedParameters {
    values: Arc<Mutex<HashMap<String, f32>>>,
}

impl SharedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.lock().get(name).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, f32> {
        self.values.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl ParameterSink for SharedParameters {
    fn set_parameter(&mut self, name: &str, value: f32) {
        self.values.lock().insert(name.to_string(), value);
    }
}

/// Reports which visual system is on screen and its geometry state
pub trait ActiveSystemProvider: Send + Sync {
    fn active_system(&self) -> String;
    fn active_geometry_index(&self, system: &str) -> usize;
    fn geometry_count(&self, system: &str) -> usize;

    /// Called after the director picked a new geometry for `system`
    fn geometry_changed(&self, _system: &str, _index: usize) {}
}

#[derive(Debug)]
struct RegistryState {
    active: String,
    geometry: HashMap<String, usize>,
    counts: HashMap<String, usize>,
}

/// Simple shared [`ActiveSystemProvider`] that records geometry changes
#[derive(Debug, Clone)]
pub struct SystemRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SystemRegistry {
    pub fn new(active: VisualSystem) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                active: active.name().to_string(),
                geometry: HashMap::new(),
                counts: HashMap::new(),
            })),
        }
    }

    /// Switch the active system. Any string is accepted; names the
    /// director does not know simply receive no writes.
    pub fn set_active_system(&self, name: impl Into<String>) {
        let name = name.into();
        log::debug!("Active visual system: {}", name);
        self.state.lock().active = name;
    }

    pub fn set_geometry(&self, system: VisualSystem, index: usize) {
        self.state
            .lock()
            .geometry
            .insert(system.name().to_string(), index);
    }

    pub fn set_geometry_count(&self, system: VisualSystem, count: usize) {
        self.state
            .lock()
            .counts
            .insert(system.name().to_string(), count);
    }

    pub fn geometry(&self, system: VisualSystem) -> usize {
        self.active_geometry_index(system.name())
    }
}

impl Default for SystemRegistry {
    fn default() -> Self {
        Self::new(VisualSystem::Faceted)
    }
}

impl ActiveSystemProvider for SystemRegistry {
    fn active_system(&self) -> String {
        self.state.lock().active.clone()
    }

    fn active_geometry_index(&self, system: &str) -> usize {
        let key = system.to_lowercase();
        self.state.lock().geometry.get(&key).copied().unwrap_or(0)
    }

    fn geometry_count(&self, system: &str) -> usize {
        let key = system.to_lowercase();
        self.state
            .lock()
            .counts
            .get(&key)
            .copied()
            .unwrap_or(GEOMETRY_COUNT)
    }

    fn geometry_changed(&self, system: &str, index: usize) {
        self.state.lock().geometry.insert(system.to_lowercase(), index);
    }
}
