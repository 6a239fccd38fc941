// Static reference tables shared read-only by every pipeline worker

use crate::error::ReferenceError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const ENTITY_MAP_FILE: &str = "entity_map.json";
pub const CATEGORIES_FILE: &str = "categories.json";
pub const POLICIES_FILE: &str = "policies.json";
pub const ABUSE_SCORES_FILE: &str = "abuse_scores.json";
pub const SURROGATES_FILE: &str = "surrogates.json";
pub const BREAKING_FILE: &str = "breaking.json";
pub const PERFORMANCE_FILE: &str = "performance.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Entity {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEntry {
    pub privacy_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurrogateEntry {
    pub regex_rule: String,
    pub surrogate: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// domain -> owning entity
    pub entity_map: HashMap<String, Entity>,
    /// domain -> category tag -> flag
    pub categories: HashMap<String, BTreeMap<String, serde_json::Value>>,
    /// domain or entity name -> policy
    pub policies: HashMap<String, PolicyEntry>,
    /// API name -> abuse weight. Unlisted APIs weigh 1.
    pub abuse_scores: HashMap<String, f64>,
    pub surrogates: HashMap<String, Vec<SurrogateEntry>>,
    /// list type -> domain -> entries
    pub breaking: BTreeMap<String, HashMap<String, Vec<serde_json::Value>>>,
    pub performance: HashMap<String, serde_json::Value>,
}

impl ReferenceData {
    /// Load every table from `dir`. The entity map is required; the other
    /// tables default to empty when their file is absent. Any file that is
    /// present but unreadable aborts the load.
    pub fn load(dir: &Path) -> Result<Self, ReferenceError> {
        let entity_path = dir.join(ENTITY_MAP_FILE);
        if !entity_path.exists() {
            return Err(ReferenceError::Missing(entity_path));
        }

        let data = ReferenceData {
            entity_map: load_table(&entity_path)?,
            categories: load_optional(&dir.join(CATEGORIES_FILE))?,
            policies: load_optional(&dir.join(POLICIES_FILE))?,
            abuse_scores: load_optional(&dir.join(ABUSE_SCORES_FILE))?,
            surrogates: load_optional(&dir.join(SURROGATES_FILE))?,
            breaking: load_optional(&dir.join(BREAKING_FILE))?,
            performance: load_optional(&dir.join(PERFORMANCE_FILE))?,
        };

        info!(
            "Loaded reference data: {} entity domains, {} category domains, {} abuse scores",
            data.entity_map.len(),
            data.categories.len(),
            data.abuse_scores.len()
        );
        Ok(data)
    }

    /// Weight of a fingerprinting API.
    pub fn abuse_score(&self, api: &str) -> f64 {
        self.abuse_scores.get(api).copied().unwrap_or(1.0)
    }
}

fn load_table<T: DeserializeOwned>(path: &Path) -> Result<T, ReferenceError> {
    debug!("Reading reference table {}", path.display());
    let content = fs::read_to_string(path).map_err(|e| ReferenceError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ReferenceError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn load_optional<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ReferenceError> {
    if path.exists() {
        load_table(path)
    } else {
        debug!("Reference table {} not present", path.display());
        Ok(T::default())
    }
}
