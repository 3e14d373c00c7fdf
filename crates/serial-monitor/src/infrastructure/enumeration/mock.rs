//! Mock enumerator for tests: reports whatever port list the test sets.

use std::sync::{Arc, Mutex, PoisonError};

use super::{EnumerationError, PortEnumerator, PortInfo};

/// A [`PortEnumerator`] whose answer is controlled by the test.
///
/// Clones share the same port list, so a test can keep one clone and hand
/// the other to the registry.
#[derive(Clone, Default)]
pub struct MockPortEnumerator {
    ports: Arc<Mutex<Vec<PortInfo>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockPortEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an enumerator that reports the given port names.
    pub fn with_ports(names: &[&str]) -> Self {
        let enumerator = Self::new();
        enumerator.set_ports(names.iter().map(|n| PortInfo::named(*n)).collect());
        enumerator
    }

    /// Replaces the reported port list.
    pub fn set_ports(&self, ports: Vec<PortInfo>) {
        *self.ports.lock().unwrap_or_else(PoisonError::into_inner) = ports;
    }

    /// Removes one port from the reported list, as if it were unplugged.
    pub fn remove_port(&self, name: &str) {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p| p.name != name);
    }

    /// Makes every subsequent enumeration fail until reset.
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }
}

impl PortEnumerator for MockPortEnumerator {
    fn enumerate(&self) -> Result<Vec<PortInfo>, EnumerationError> {
        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(EnumerationError::Backend("mock failure".to_string()));
        }
        Ok(self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
