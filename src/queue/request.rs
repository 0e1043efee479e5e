use crate::types::BuildCondition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a build should run, who asked for it, and with which parameters.
/// Immutable once created; travels over the wire when a build is
/// dispatched to a remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationRequest {
    pub condition: BuildCondition,
    /// Free text naming the origin, e.g. "trigger" or a user name.
    pub source: String,
    pub user_name: String,
    #[serde(default)]
    pub build_values: BTreeMap<String, String>,
}

impl IntegrationRequest {
    pub fn new(
        condition: BuildCondition,
        source: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            condition,
            source: source.into(),
            user_name: user_name.into(),
            build_values: BTreeMap::new(),
        }
    }

    pub fn with_build_values(mut self, build_values: BTreeMap<String, String>) -> Self {
        self.build_values = build_values;
        self
    }

    /// The request a force-build command produces on behalf of a user.
    pub fn force_build(requester: impl Into<String>, values: BTreeMap<String, String>) -> Self {
        let requester = requester.into();
        Self {
            condition: BuildCondition::ForceBuild,
            source: requester.clone(),
            user_name: requester,
            build_values: values,
        }
    }
}
