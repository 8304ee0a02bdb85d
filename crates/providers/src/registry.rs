//! Provider registry: resolves `provider/model` specs to clients.

use std::collections::HashMap;
use std::sync::Arc;

use orch_domain::{Error, Result};

use crate::traits::ModelClient;

#[derive(Default)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn ModelClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn ModelClient>) {
        self.clients.insert(client.provider_id().to_string(), client);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ModelClient>> {
        self.clients.get(provider_id).cloned()
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Resolve a `provider/model` spec (agent default or request
    /// override). Resolution order:
    /// 1. `provider/model` — that provider, that model.
    /// 2. Bare `model` — the sole registered provider, that model.
    /// 3. Empty — the sole registered provider and its default model.
    pub fn resolve(&self, spec: &str) -> Result<(Arc<dyn ModelClient>, String)> {
        if let Some((provider, model)) = spec.split_once('/') {
            let client = self.get(provider).ok_or_else(|| {
                Error::Config(format!("no model client registered for provider {provider}"))
            })?;
            let model = if model.is_empty() { client.default_model().to_string() } else { model.to_string() };
            return Ok((client, model));
        }

        let mut iter = self.clients.values();
        let client = iter
            .next()
            .cloned()
            .ok_or_else(|| Error::Config("no model clients registered".into()))?;
        if iter.next().is_some() && !spec.is_empty() {
            return Err(Error::Config(format!(
                "ambiguous model spec {spec:?}: several providers registered, use provider/model"
            )));
        }
        let model = if spec.is_empty() { client.default_model().to_string() } else { spec.to_string() };
        Ok((client, model))
    }
}
