//! Provider registry -- provider instances by id, with aliases.
//!
//! Model ids follow the grammar `providerId|modelId`. Only the first `|`
//! separates, so `:` and further `|` stay legal inside the model part.
//!
//! # Aliases
//!
//! An alias is an extra key pointing at the same provider instance as a
//! canonical id, and remembers which id it was registered for.
//! Unregistering a canonical id removes the aliases registered with it;
//! unregistering an alias removes only that alias.
//!
//! The registry is an explicit object owned by the application and shared
//! as `Arc<ProviderRegistry>`. It is populated up front and read-mostly
//! afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::{ModelResolutionError, ProviderError};
use crate::models::ModelKind;
use crate::traits::{
    EmbeddingModel, ImageModel, LanguageModel, Provider, SpeechModel, TranscriptionModel,
};

/// Separator between provider id and model id.
pub const MODEL_ID_SEPARATOR: char = '|';

/// Join a provider id and a model id.
pub fn format_model_id(provider_id: &str, model_id: &str) -> String {
    format!("{provider_id}{MODEL_ID_SEPARATOR}{model_id}")
}

/// Split a full model id into `(provider_id, model_id)`.
///
/// Returns `None` when the id carries no separator.
pub fn parse_model_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(MODEL_ID_SEPARATOR)
}

struct Entry {
    provider: Arc<dyn Provider>,
    /// Canonical id for alias entries, `None` for canonical ones.
    canonical: Option<String>,
}

impl Entry {
    fn is_alias(&self) -> bool {
        self.canonical.is_some()
    }
}

/// Registered providers keyed by id or alias.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under `id` plus `aliases`.
    ///
    /// Re-registering an id first unregisters whatever it pointed at. An
    /// alias that collides with an existing canonical id is skipped.
    pub fn register_provider(&self, id: &str, provider: Arc<dyn Provider>, aliases: &[&str]) {
        let mut entries = self.write();
        remove_entry(&mut entries, id);
        entries.insert(
            id.to_string(),
            Entry {
                provider: provider.clone(),
                canonical: None,
            },
        );

        for alias in aliases.iter().filter(|a| **a != id) {
            if entries.get(*alias).is_some_and(|e| !e.is_alias()) {
                log::warn!("alias '{alias}' for provider '{id}' collides with a registered provider id, skipping");
                continue;
            }
            entries.insert(
                alias.to_string(),
                Entry {
                    provider: provider.clone(),
                    canonical: Some(id.to_string()),
                },
            );
        }
        log::debug!("registered provider '{id}' with {} alias(es)", aliases.len());
    }

    /// Register several providers without aliases.
    pub fn register_providers<I>(&self, providers: I)
    where
        I: IntoIterator<Item = (String, Arc<dyn Provider>)>,
    {
        for (id, provider) in providers {
            self.register_provider(&id, provider, &[]);
        }
    }

    /// Remove `id`. Returns `false` if nothing was registered under it.
    pub fn unregister_provider(&self, id: &str) -> bool {
        remove_entry(&mut self.write(), id)
    }

    pub fn get_provider(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.read().get(id).map(|e| e.provider.clone())
    }

    pub fn has_provider(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Canonical id for `id`, which may be an alias.
    pub fn resolve_provider_id(&self, id: &str) -> Option<String> {
        self.read()
            .get(id)
            .map(|e| e.canonical.clone().unwrap_or_else(|| id.to_string()))
    }

    pub fn is_alias(&self, id: &str) -> bool {
        self.read().get(id).is_some_and(Entry::is_alias)
    }

    /// Every alias mapped to its canonical id.
    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.read()
            .iter()
            .filter_map(|(alias, e)| Some((alias.clone(), e.canonical.clone()?)))
            .collect()
    }

    /// Canonical provider ids, sorted.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, e)| !e.is_alias())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    // -- per-kind lookups by full `provider|model` id --

    pub fn language_model(&self, id: &str) -> Result<Arc<dyn LanguageModel>, ModelResolutionError> {
        self.lookup(id, ModelKind::Language, |p, m| p.language_model(m))
    }

    pub fn embedding_model(&self, id: &str) -> Result<Arc<dyn EmbeddingModel>, ModelResolutionError> {
        self.lookup(id, ModelKind::Embedding, |p, m| p.embedding_model(m))
    }

    pub fn image_model(&self, id: &str) -> Result<Arc<dyn ImageModel>, ModelResolutionError> {
        self.lookup(id, ModelKind::Image, |p, m| p.image_model(m))
    }

    pub fn transcription_model(
        &self,
        id: &str,
    ) -> Result<Arc<dyn TranscriptionModel>, ModelResolutionError> {
        self.lookup(id, ModelKind::Transcription, |p, m| p.transcription_model(m))
    }

    pub fn speech_model(&self, id: &str) -> Result<Arc<dyn SpeechModel>, ModelResolutionError> {
        self.lookup(id, ModelKind::Speech, |p, m| p.speech_model(m))
    }

    fn lookup<T>(
        &self,
        id: &str,
        kind: ModelKind,
        get: impl FnOnce(&dyn Provider, &str) -> Result<T, ProviderError>,
    ) -> Result<T, ModelResolutionError> {
        let (provider_id, model_id) = parse_model_id(id).ok_or_else(|| ModelResolutionError {
            model_id: id.to_string(),
            provider_id: None,
            kind,
            reason: format!("expected 'provider{MODEL_ID_SEPARATOR}model'"),
        })?;
        let provider = self
            .get_provider(provider_id)
            .ok_or_else(|| ModelResolutionError::provider_not_found(id, provider_id, kind))?;

        get(provider.as_ref(), model_id).map_err(|err| ModelResolutionError {
            model_id: id.to_string(),
            provider_id: Some(provider_id.to_string()),
            kind,
            reason: err.to_string(),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remove `id`, cascading to aliases when it is canonical.
fn remove_entry(entries: &mut HashMap<String, Entry>, id: &str) -> bool {
    let Some(removed) = entries.remove(id) else {
        return false;
    };
    if !removed.is_alias() {
        entries.retain(|_, e| e.canonical.as_deref() != Some(id));
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
