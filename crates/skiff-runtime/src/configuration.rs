//! Resolved skill configuration handed to handlers.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value as Json};
use skiff_datalog::map::camel_case;
use skiff_types::{ConfigurationParameter, SelectedResourceProvider, SkillDescriptor};
use url::Url;

const PLATFORM_PREFIX: &str = "atomist://";
const MANAGE_BASE_URL: &str = "https://go.atomist.com/";

/// One configuration instance with its parameters resolved into an object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    pub name: String,
    pub parameters: Json,
    #[serde(rename = "resourceProviders")]
    pub resource_providers: BTreeMap<String, ResourceProvider>,
    /// Management page for this instance.
    pub url: String,
}

impl Configuration {
    /// Parameter by top-level name.
    pub fn parameter(&self, name: &str) -> Option<&Json> {
        self.parameters.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceProvider {
    #[serde(rename = "typeName")]
    pub type_name: String,
    #[serde(rename = "selectedResourceProviders")]
    pub selected_resource_providers: Vec<SelectedResourceProvider>,
}

/// Resolve every configuration instance of `skill`.
pub fn extract_configurations(skill: &SkillDescriptor, workspace_id: &str) -> Vec<Configuration> {
    skill
        .configurations()
        .into_iter()
        .map(|c| Configuration {
            name: c.name.clone(),
            parameters: extract_parameters(&c.parameters),
            resource_providers: c
                .resource_providers
                .iter()
                .map(|p| {
                    (
                        p.name.clone(),
                        ResourceProvider {
                            type_name: p.type_name.clone(),
                            selected_resource_providers: p.selected_resource_providers.clone(),
                        },
                    )
                })
                .collect(),
            url: manage_url(workspace_id, skill, &c.name),
        })
        .collect()
}

/// Platform parameters (`atomist://x`) are grouped under `atomist.<x>`;
/// dotted names expand into nested objects.
fn extract_parameters(params: &[ConfigurationParameter]) -> Json {
    let mut parameters = Map::new();
    for p in params {
        match p.name.strip_prefix(PLATFORM_PREFIX) {
            Some(name) => {
                let platform = parameters
                    .entry("atomist")
                    .or_insert_with(|| Json::Object(Map::new()));
                if let Json::Object(platform) = platform {
                    platform.insert(camel_case(name), p.value.clone());
                }
            }
            None => insert_path(&mut parameters, &p.name, p.value.clone()),
        }
    }
    Json::Object(parameters)
}

fn insert_path(target: &mut Map<String, Json>, name: &str, value: Json) {
    match name.split_once('.') {
        Some((head, rest)) if !head.is_empty() && !rest.is_empty() => {
            let child = target
                .entry(head)
                .or_insert_with(|| Json::Object(Map::new()));
            if !child.is_object() {
                *child = Json::Object(Map::new());
            }
            if let Json::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
        _ => {
            target.insert(name.to_string(), value);
        }
    }
}

fn manage_url(workspace_id: &str, skill: &SkillDescriptor, configuration: &str) -> String {
    let Ok(mut url) = Url::parse(MANAGE_BASE_URL) else {
        return MANAGE_BASE_URL.to_string();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend([
            workspace_id,
            "manage",
            "skills",
            "configure",
            "edit",
            skill.namespace.as_str(),
            skill.name.as_str(),
            configuration,
        ]);
    }
    url.to_string()
}
