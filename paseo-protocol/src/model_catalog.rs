//! The provider model catalog (spec.md §4.5): models a provider offers for
//! a given project, queryable independent of any running agent.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingOption {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantOption {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub thinking_options: Vec<ThinkingOption>,
    #[serde(default)]
    pub variant_options: Vec<VariantOption>,
}
