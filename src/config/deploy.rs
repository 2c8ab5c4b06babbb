//! The DEPLOYMENTS file maps branch names to deployment tasks.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::bad_request;

pub type DeploymentConfigs = IndexMap<String, DeploymentConfig>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default, rename = "env", skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

pub(super) fn parse_deployment_map(data: &str) -> anyhow::Result<DeploymentConfigs> {
    if data.trim().is_empty() {
        return Err(bad_request("no content in deployment map"));
    }
    deser_hjson::from_str(data).map_err(|err| bad_request(err.to_string()))
}
