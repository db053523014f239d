//! Composition of independently optional storage capabilities.

use crate::error::{StorageError, StorageResult};
use crate::traits::{Concatenator, ContentReader, DataStore, LengthDeclarer, Locker, Terminator};
use std::fmt;
use std::sync::Arc;

/// Collects capability implementations before startup.
///
/// Each capability slot holds at most one implementation. Registering a
/// second implementation for the same slot replaces the first.
#[derive(Default)]
pub struct StoreComposer {
    core: Option<Arc<dyn DataStore>>,
    reader: Option<Arc<dyn ContentReader>>,
    locker: Option<Arc<dyn Locker>>,
    terminator: Option<Arc<dyn Terminator>>,
    concatenator: Option<Arc<dyn Concatenator>>,
    length_declarer: Option<Arc<dyn LengthDeclarer>>,
}

fn replace<T: ?Sized>(slot: &mut Option<Arc<T>>, value: Arc<T>, capability: &'static str) {
    if slot.replace(value).is_some() {
        tracing::debug!(capability, "Replacing previously registered capability");
    }
}

impl StoreComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_core(&mut self, core: Arc<dyn DataStore>) -> &mut Self {
        replace(&mut self.core, core, "core");
        self
    }

    pub fn use_reader(&mut self, reader: Arc<dyn ContentReader>) -> &mut Self {
        replace(&mut self.reader, reader, "reader");
        self
    }

    pub fn use_locker(&mut self, locker: Arc<dyn Locker>) -> &mut Self {
        replace(&mut self.locker, locker, "locker");
        self
    }

    pub fn use_terminator(&mut self, terminator: Arc<dyn Terminator>) -> &mut Self {
        replace(&mut self.terminator, terminator, "terminator");
        self
    }

    pub fn use_concatenator(&mut self, concatenator: Arc<dyn Concatenator>) -> &mut Self {
        replace(&mut self.concatenator, concatenator, "concatenator");
        self
    }

    pub fn use_length_declarer(&mut self, declarer: Arc<dyn LengthDeclarer>) -> &mut Self {
        replace(&mut self.length_declarer, declarer, "length_declarer");
        self
    }

    /// Whether a core has been registered.
    pub fn has_core(&self) -> bool {
        self.core.is_some()
    }

    /// Freeze the registered capabilities.
    ///
    /// Fails with a configuration error when no core is registered.
    pub fn build(self) -> StorageResult<ComposedStore> {
        let core = self.core.ok_or_else(|| {
            StorageError::Config("no core storage capability registered".to_string())
        })?;
        Ok(ComposedStore {
            core,
            reader: self.reader,
            locker: self.locker,
            terminator: self.terminator,
            concatenator: self.concatenator,
            length_declarer: self.length_declarer,
        })
    }
}

/// Immutable set of capabilities the engine runs against.
#[derive(Clone)]
pub struct ComposedStore {
    core: Arc<dyn DataStore>,
    reader: Option<Arc<dyn ContentReader>>,
    locker: Option<Arc<dyn Locker>>,
    terminator: Option<Arc<dyn Terminator>>,
    concatenator: Option<Arc<dyn Concatenator>>,
    length_declarer: Option<Arc<dyn LengthDeclarer>>,
}

impl ComposedStore {
    pub fn core(&self) -> &Arc<dyn DataStore> {
        &self.core
    }

    pub fn reader(&self) -> Option<&Arc<dyn ContentReader>> {
        self.reader.as_ref()
    }

    pub fn locker(&self) -> Option<&Arc<dyn Locker>> {
        self.locker.as_ref()
    }

    pub fn terminator(&self) -> Option<&Arc<dyn Terminator>> {
        self.terminator.as_ref()
    }

    pub fn concatenator(&self) -> Option<&Arc<dyn Concatenator>> {
        self.concatenator.as_ref()
    }

    pub fn length_declarer(&self) -> Option<&Arc<dyn LengthDeclarer>> {
        self.length_declarer.as_ref()
    }

    /// Which optional capabilities are present.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            reader: self.reader.is_some(),
            locker: self.locker.is_some(),
            terminator: self.terminator.is_some(),
            concatenator: self.concatenator.is_some(),
            length_declarer: self.length_declarer.is_some(),
        }
    }
}

impl fmt::Debug for ComposedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedStore")
            .field("backend", &self.core.backend_name())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Presence flags for the optional capabilities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub reader: bool,
    pub locker: bool,
    pub terminator: bool,
    pub concatenator: bool,
    pub length_declarer: bool,
}

impl Capabilities {
    /// tus protocol extensions enabled by these capabilities.
    pub fn extensions(&self) -> Vec<&'static str> {
        let mut extensions = vec!["creation"];
        if self.length_declarer {
            extensions.push("creation-defer-length");
        }
        if self.terminator {
            extensions.push("termination");
        }
        if self.concatenator {
            extensions.push("concatenation");
        }
        extensions
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = vec!["core"];
        for (present, name) in [
            (self.reader, "reader"),
            (self.locker, "locker"),
            (self.terminator, "terminator"),
            (self.concatenator, "concatenator"),
            (self.length_declarer, "length_declarer"),
        ] {
            if present {
                names.push(name);
            }
        }
        f.write_str(&names.join(","))
    }
}
