//! Provider registry resolving identifiers to adapters.

use std::collections::HashMap;
use std::sync::Arc;

use drivelink_common::{Error, Result};

use crate::dropbox::{DropboxConfig, DropboxProvider};
use crate::gdrive::{GDriveConfig, GDriveProvider};
use crate::provider::StorageProvider;

/// Registry of storage provider adapters.
///
/// Populated once at startup and then shared read-only.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn StorageProvider>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register an adapter under an identifier.
    ///
    /// # Errors
    /// - `AlreadyExists` if the identifier is taken
    pub fn register(
        &mut self,
        identifier: impl Into<String>,
        provider: Arc<dyn StorageProvider>,
    ) -> Result<()> {
        let identifier = identifier.into();
        if self.providers.contains_key(&identifier) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                identifier
            )));
        }
        self.providers.insert(identifier, provider);
        Ok(())
    }

    /// Resolve an adapter.
    ///
    /// # Errors
    /// - `ProviderNotFound` for unknown identifiers
    pub fn get(&self, identifier: &str) -> Result<Arc<dyn StorageProvider>> {
        self.providers
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(identifier.to_string()))
    }

    /// Registered identifiers, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_provider(&self, identifier: &str) -> bool {
        self.providers.contains_key(identifier)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry holding the Drive and Dropbox adapters.
///
/// Adapters without client credentials are still registered; their
/// auth operations fail with `NotConfigured`.
pub fn create_default_registry(
    gdrive: GDriveConfig,
    dropbox: DropboxConfig,
) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    registry.register(
        crate::gdrive::PROVIDER_NAME,
        Arc::new(GDriveProvider::new(gdrive)?),
    )?;
    registry.register(
        crate::dropbox::PROVIDER_NAME,
        Arc::new(DropboxProvider::new(dropbox)?),
    )?;

    Ok(registry)
}
