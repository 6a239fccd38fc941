use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One crawl record as captured by the crawler, before any classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSite {
    #[serde(default)]
    pub initial_url: Option<String>,
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub data: Option<RawSiteData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSiteData {
    #[serde(default)]
    pub requests: Option<Vec<RawRequest>>,
    #[serde(default)]
    pub apis: RawApis,
}

/// Client-side API activity recorded per script URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawApis {
    /// script url -> api name -> call count
    #[serde(default)]
    pub call_stats: HashMap<String, HashMap<String, u64>>,
    #[serde(default)]
    pub saved_calls: Vec<SavedCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedCall {
    pub source: String,
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequest {
    pub url: String,
    #[serde(rename = "type", default)]
    pub request_type: String,
    #[serde(default)]
    pub response_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub response_body_hash: Option<String>,
    #[serde(default)]
    pub initiators: Vec<String>,
    #[serde(default)]
    pub cname_chain: Vec<String>,
    #[serde(default)]
    pub nameservers: Vec<String>,
}

impl RawSite {
    /// Returns the captured requests, or `None` when the crawl of this site
    /// did not finish with usable data.
    pub fn requests(&self) -> Option<&[RawRequest]> {
        if self.initial_url.is_none() {
            return None;
        }
        self.data.as_ref()?.requests.as_deref()
    }

    pub fn apis(&self) -> Option<&RawApis> {
        self.data.as_ref().map(|d| &d.apis)
    }
}

impl RawRequest {
    pub fn new(url: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_type: request_type.into(),
            response_headers: None,
            response_body_hash: None,
            initiators: Vec::new(),
            cname_chain: Vec::new(),
            nameservers: Vec::new(),
        }
    }
}
