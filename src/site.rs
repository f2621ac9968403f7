//! Transport configuration record of a site.
//!
//! The record is a ConfigMap whose `qdrouterd.json` key holds a JSON array of
//! `[entityType, attributes]` pairs. The `router` entity carries the site
//! metadata as a JSON string in its `metadata` attribute; `log` entities set
//! per-module log levels.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SkupError;
use crate::names::TRANSPORT_CONFIG_KEY;

const ROUTER_ENTITY: &str = "router";
const LOG_ENTITY: &str = "log";
const METADATA_ATTRIBUTE: &str = "metadata";

/// Log levels accepted by the transport, each optionally suffixed with `+`.
pub const LOG_LEVELS: &[&str] = &[
    "trace", "debug", "info", "notice", "warning", "error", "critical",
];

/// Identity and version recorded by the site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteMetadata {
    #[serde(rename = "id", default)]
    pub identity: String,
    #[serde(default)]
    pub version: String,
}

/// Log level for one transport module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogConfig {
    pub module: String,
    pub level: String,
}

impl LogConfig {
    /// Parse `MODULE:LEVEL`, or a bare `LEVEL` for the `DEFAULT` module.
    pub fn parse(spec: &str) -> Result<Self, SkupError> {
        let (module, level) = match spec.split_once(':') {
            Some((module, level)) => (module.trim(), level.trim()),
            None => ("DEFAULT", spec.trim()),
        };
        if module.is_empty() {
            return Err(SkupError::InvalidSiteConfig(format!(
                "empty module in log setting '{spec}'"
            )));
        }
        let base = level.strip_suffix('+').unwrap_or(level);
        if !LOG_LEVELS.contains(&base) {
            return Err(SkupError::InvalidSiteConfig(format!(
                "invalid log level '{level}', expected one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(Self {
            module: module.to_string(),
            level: level.to_string(),
        })
    }
}

impl fmt::Display for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.level)
    }
}

/// Parsed transport configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    entities: Vec<(String, Map<String, Value>)>,
}

impl RouterConfig {
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self, SkupError> {
        let raw = cm
            .data
            .as_ref()
            .and_then(|d| d.get(TRANSPORT_CONFIG_KEY))
            .ok_or_else(|| {
                SkupError::InvalidSiteConfig(format!("missing {TRANSPORT_CONFIG_KEY}"))
            })?;
        let entities = serde_json::from_str(raw).map_err(|e| {
            SkupError::InvalidSiteConfig(format!("{TRANSPORT_CONFIG_KEY} is not valid: {e}"))
        })?;
        Ok(Self { entities })
    }

    fn router(&self) -> Option<&Map<String, Value>> {
        self.entities
            .iter()
            .find(|(kind, _)| kind == ROUTER_ENTITY)
            .map(|(_, attrs)| attrs)
    }

    fn router_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.entities
            .iter_mut()
            .find(|(kind, _)| kind == ROUTER_ENTITY)
            .map(|(_, attrs)| attrs)
    }

    /// Site metadata; empty when the router carries none.
    pub fn site_metadata(&self) -> Result<SiteMetadata, SkupError> {
        let router = self
            .router()
            .ok_or_else(|| SkupError::InvalidSiteConfig("no router entity".to_string()))?;
        match router.get(METADATA_ATTRIBUTE).and_then(Value::as_str) {
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                SkupError::InvalidSiteConfig(format!("router metadata is not valid: {e}"))
            }),
            None => Ok(SiteMetadata::default()),
        }
    }

    pub fn set_site_metadata(&mut self, metadata: &SiteMetadata) -> Result<(), SkupError> {
        let encoded = serde_json::to_string(metadata)
            .map_err(|e| SkupError::InvalidSiteConfig(e.to_string()))?;
        let router = self
            .router_mut()
            .ok_or_else(|| SkupError::InvalidSiteConfig("no router entity".to_string()))?;
        router.insert(METADATA_ATTRIBUTE.to_string(), Value::String(encoded));
        Ok(())
    }

    pub fn log_levels(&self) -> Vec<LogConfig> {
        self.entities
            .iter()
            .filter(|(kind, _)| kind == LOG_ENTITY)
            .filter_map(|(_, attrs)| {
                Some(LogConfig {
                    module: attrs.get("module")?.as_str()?.to_string(),
                    level: attrs.get("enable")?.as_str()?.to_string(),
                })
            })
            .collect()
    }

    /// Replace all `log` entities. Returns false when nothing changed.
    pub fn set_log_levels(&mut self, levels: &[LogConfig]) -> bool {
        let mut current = self.log_levels();
        current.sort();
        // A module given twice keeps its last level.
        let mut desired: Vec<LogConfig> = Vec::with_capacity(levels.len());
        for level in levels {
            desired.retain(|l| l.module != level.module);
            desired.push(level.clone());
        }
        desired.sort();
        if current == desired {
            return false;
        }

        self.entities.retain(|(kind, _)| kind != LOG_ENTITY);
        for level in desired {
            let mut attrs = Map::new();
            attrs.insert("module".to_string(), Value::String(level.module));
            attrs.insert("enable".to_string(), Value::String(level.level));
            self.entities.push((LOG_ENTITY.to_string(), attrs));
        }
        true
    }

    /// Serialize back into the configuration record.
    pub fn write_to_config_map(&self, cm: &mut ConfigMap) -> Result<(), SkupError> {
        let encoded = serde_json::to_string_pretty(&self.entities)
            .map_err(|e| SkupError::InvalidSiteConfig(e.to_string()))?;
        cm.data
            .get_or_insert_with(BTreeMap::new)
            .insert(TRANSPORT_CONFIG_KEY.to_string(), encoded);
        Ok(())
    }
}
