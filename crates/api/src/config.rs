//! Types for use when configuring backing store modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> StoreResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| StoreError::other_src("encode", e))?,
    )
    .map_err(|e| StoreError::other_src("decode", e))
}

/// Denotes a type used to configure a specific module.
///
/// A module config must serialize to a json object. Its top-level keys
/// are merged into the [Config] map, so by convention a module config
/// is a wrapper struct with a single property named after the module,
/// such as `{ "queuedBackingStore": { ... } }`.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

impl<T> ModConfig for T where
    T: 'static
        + Sized
        + Default
        + std::fmt::Debug
        + serde::Serialize
        + serde::de::DeserializeOwned
        + Send
        + Sync
{
}

/// Backing store configuration.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// Merge a module config into this config.
    ///
    /// Module factories call this from their `default_config` to
    /// publish their defaults, tests call it to override them. Refuses
    /// to overwrite a key that another module already set.
    pub fn set_module_config<M: ModConfig>(
        &mut self,
        config: &M,
    ) -> StoreResult<()> {
        let value: serde_json::Value = tc(config)?;
        let serde_json::Value::Object(map) = value else {
            return Err(StoreError::other(format!(
                "module config must serialize to an object: {config:?}"
            )));
        };
        for (key, value) in map {
            if self.0.contains_key(&key) {
                return Err(StoreError::other(format!(
                    "Refusing to overwrite conflicting module config: {key}"
                )));
            }
            self.0.insert(key, value);
        }
        Ok(())
    }

    /// Replace (or insert) a module config, ignoring conflicts.
    pub fn replace_module_config<M: ModConfig>(
        &mut self,
        config: &M,
    ) -> StoreResult<()> {
        let value: serde_json::Value = tc(config)?;
        let serde_json::Value::Object(map) = value else {
            return Err(StoreError::other(format!(
                "module config must serialize to an object: {config:?}"
            )));
        };
        self.0.extend(map);
        Ok(())
    }

    /// Extract a module config.
    ///
    /// Note that this config may have been loaded from disk and edited by
    /// humans, so module configs should use `#[serde(default)]` to be
    /// tolerant of missing properties. Keys belonging to other modules
    /// are ignored.
    pub fn get_module_config<M: ModConfig>(&self) -> StoreResult<M> {
        tc(&self.0)
    }
}
