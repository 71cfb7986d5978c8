//! Skill descriptor and configuration instance types.

use serde::{Deserialize, Serialize};

/// Secret URI carrying the workspace API key.
pub const API_KEY_SECRET: &str = "atomist://api-key";

/// A secret handed to the skill with the incoming payload.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Secret {
    pub uri: String,
    pub value: String,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("uri", &self.uri)
            .field("value", &hide_string(&self.value))
            .finish()
    }
}

/// Mask a sensitive string, keeping only its first and last character.
///
/// Strings of three characters or fewer are masked completely.
pub fn hide_string(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 3 {
        return "*".repeat(chars.len());
    }
    let mut masked = String::with_capacity(chars.len());
    masked.push(chars[0]);
    masked.push_str(&"*".repeat(chars.len() - 2));
    masked.push(chars[chars.len() - 1]);
    masked
}

/// One configured parameter of a skill configuration instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationParameter {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A provider reference selected for a resource provider slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedResourceProvider {
    pub id: String,
}

/// A resource provider slot of a skill configuration instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceProviderSelection {
    pub name: String,
    #[serde(rename = "typeName", alias = "type-name")]
    pub type_name: String,
    #[serde(
        default,
        rename = "selectedResourceProviders",
        alias = "selected-resource-providers"
    )]
    pub selected_resource_providers: Vec<SelectedResourceProvider>,
}

/// A named configuration instance of a skill.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SkillConfiguration {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ConfigurationParameter>,
    #[serde(
        default,
        rename = "resourceProviders",
        alias = "resource-providers"
    )]
    pub resource_providers: Vec<ResourceProviderSelection>,
}

/// Configuration shapes accepted on the skill descriptor: either a list of
/// instances or a single instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SkillConfigurations {
    Instances { instances: Vec<SkillConfiguration> },
    Single(SkillConfiguration),
}

/// Identity and configuration of the skill being executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SkillDescriptor {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<SkillConfigurations>,
}

impl SkillDescriptor {
    /// Create a descriptor without configuration.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the skill id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the skill version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Attach configuration instances.
    pub fn with_configurations(mut self, instances: Vec<SkillConfiguration>) -> Self {
        self.configuration = Some(SkillConfigurations::Instances { instances });
        self
    }

    /// `namespace/name` label used in status reasons and log lines.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// All configuration instances in declaration order.
    pub fn configurations(&self) -> Vec<&SkillConfiguration> {
        match &self.configuration {
            Some(SkillConfigurations::Instances { instances }) => instances.iter().collect(),
            Some(SkillConfigurations::Single(single)) => vec![single],
            None => Vec::new(),
        }
    }

    /// The configuration instance this execution runs under (the first one).
    pub fn active_configuration(&self) -> Option<&SkillConfiguration> {
        self.configurations().into_iter().next()
    }
}
