//! Named Configurations
//!
//! Configurations are kept in their own key/value store, keyed by name. The
//! name of the currently selected configuration lives in the local state store
//! under [`SELECTED_KEY`]. The flow core only ever sees a [`ConfigurationView`].

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FlowError, FlowResult};
use crate::storage::KeyValueStore;

/// Local state key holding the selected configuration name.
pub const SELECTED_KEY: &str = "config";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub authentication_server: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scope: String,
}

impl Configuration {
    /// Fields that must be filled in before a configuration can be saved.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("name", &self.name),
            ("authenticationServer", &self.authentication_server),
            ("clientId", &self.client_id),
            ("scope", &self.scope),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    pub fn view(&self) -> ConfigurationView {
        ConfigurationView {
            inner: self.clone(),
        }
    }
}

/// Read-only projection handed to the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationView {
    inner: Configuration,
}

impl ConfigurationView {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn authentication_server(&self) -> &str {
        &self.inner.authentication_server
    }

    pub fn audience(&self) -> &str {
        &self.inner.audience
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.inner.client_secret
    }

    pub fn scope(&self) -> &str {
        &self.inner.scope
    }
}

// ── ConfigurationStore ──────────────────────────────────────────────────────

pub struct ConfigurationStore<C, L> {
    configurations: C,
    local: L,
}

impl<C: KeyValueStore, L: KeyValueStore> ConfigurationStore<C, L> {
    pub fn new(configurations: C, local: L) -> Self {
        Self {
            configurations,
            local,
        }
    }

    /// All stored configurations, sorted by name.
    pub fn list(&self) -> FlowResult<Vec<Configuration>> {
        let mut all = Vec::new();
        for key in self.configurations.keys()? {
            match self.get(&key)? {
                Some(config) => all.push(config),
                None => continue,
            }
        }
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    pub fn get(&self, name: &str) -> FlowResult<Option<Configuration>> {
        let Some(raw) = self.configurations.get(name)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Configuration>(&raw) {
            Ok(mut config) => {
                config.name = name.to_string();
                Ok(Some(config))
            }
            Err(e) => {
                warn!("Ignoring unreadable configuration '{}': {}", name, e);
                Ok(None)
            }
        }
    }

    /// Save under `config.name`. When `previous_name` names a different
    /// entry it is removed (rename). The saved configuration becomes selected.
    pub fn save(&self, config: &Configuration, previous_name: Option<&str>) -> FlowResult<()> {
        ensure_complete(config)?;
        self.write(config)?;

        if let Some(previous) = previous_name.filter(|p| !p.is_empty() && *p != config.name) {
            self.configurations.remove(previous)?;
            info!("Renamed configuration '{}' to '{}'", previous, config.name);
        }

        self.select(Some(&config.name))
    }

    /// Save as a new entry; a clashing name becomes `Copy of {name}`.
    pub fn save_as(&self, config: &Configuration) -> FlowResult<Configuration> {
        ensure_complete(config)?;
        let mut copy = config.clone();
        if self.configurations.get(&copy.name)?.is_some() {
            copy.name = format!("Copy of {}", copy.name);
        }
        self.write(&copy)?;
        self.select(Some(&copy.name))?;
        Ok(copy)
    }

    pub fn remove(&self, name: &str) -> FlowResult<()> {
        if self.configurations.get(name)?.is_none() {
            return Err(FlowError::Config(format!("No configuration named '{}'", name)));
        }
        self.configurations.remove(name)?;
        if self.selected_name()?.as_deref() == Some(name) {
            self.select(None)?;
        }
        info!("Removed configuration '{}'", name);
        Ok(())
    }

    pub fn select(&self, name: Option<&str>) -> FlowResult<()> {
        match name {
            Some(name) => {
                if self.configurations.get(name)?.is_none() {
                    return Err(FlowError::Config(format!("No configuration named '{}'", name)));
                }
                self.local.set(SELECTED_KEY, name)
            }
            None => self.local.remove(SELECTED_KEY),
        }
    }

    pub fn selected_name(&self) -> FlowResult<Option<String>> {
        self.local.get(SELECTED_KEY)
    }

    /// The selected configuration, if the selection still resolves.
    pub fn selected(&self) -> FlowResult<Option<Configuration>> {
        match self.selected_name()? {
            Some(name) => self.get(&name),
            None => Ok(None),
        }
    }

    fn write(&self, config: &Configuration) -> FlowResult<()> {
        let json = serde_json::to_string(config)
            .map_err(|e| FlowError::storage("Failed to serialize configuration", e))?;
        self.configurations.set(&config.name, &json)
    }
}

fn ensure_complete(config: &Configuration) -> FlowResult<()> {
    let missing = config.missing_fields();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FlowError::Config(format!(
            "Configuration is missing required fields: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> ConfigurationStore<MemoryStore, MemoryStore> {
        ConfigurationStore::new(MemoryStore::new(), MemoryStore::new())
    }

    fn sample(name: &str) -> Configuration {
        Configuration {
            name: name.to_string(),
            authentication_server: "https://idp.example".into(),
            audience: "api".into(),
            client_id: "abc".into(),
            client_secret: "unused".into(),
            scope: "openid".into(),
        }
    }

    #[test]
    fn test_save_selects_and_lists_sorted() {
        let store = store();
        store.save(&sample("zeta"), None).unwrap();
        store.save(&sample("alpha"), None).unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(store.selected_name().unwrap().as_deref(), Some("alpha"));
    }

    #[test]
    fn test_save_with_new_name_renames() {
        let store = store();
        store.save(&sample("dev"), None).unwrap();
        store.save(&sample("staging"), Some("dev")).unwrap();

        assert!(store.get("dev").unwrap().is_none());
        assert!(store.get("staging").unwrap().is_some());
        assert_eq!(store.selected().unwrap().unwrap().name, "staging");
    }

    #[test]
    fn test_save_as_duplicate_gets_copy_prefix() {
        let store = store();
        store.save(&sample("dev"), None).unwrap();
        let copy = store.save_as(&sample("dev")).unwrap();

        assert_eq!(copy.name, "Copy of dev");
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.selected_name().unwrap().as_deref(), Some("Copy of dev"));
    }

    #[test]
    fn test_remove_clears_selection() {
        let store = store();
        store.save(&sample("dev"), None).unwrap();
        store.remove("dev").unwrap();
        assert_eq!(store.selected_name().unwrap(), None);
        assert!(store.remove("dev").is_err());
    }

    #[test]
    fn test_incomplete_configuration_is_refused() {
        let store = store();
        let mut config = sample("dev");
        config.client_id.clear();
        let err = store.save(&config, None).unwrap_err();
        assert!(err.to_string().contains("clientId"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_select_unknown_name_fails() {
        let store = store();
        assert!(store.select(Some("nope")).is_err());
    }

    #[test]
    fn test_view_is_read_only_projection() {
        let mut config = sample("dev");
        let view = config.view();
        config.client_id = "changed".into();
        assert_eq!(view.client_id(), "abc");
        assert_eq!(view.authentication_server(), "https://idp.example");
    }
}
