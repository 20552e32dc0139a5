//! The build → deploy hand-off artifact (`imagedefinitions.json`).

use serde::{Deserialize, Serialize};

/// File name the build stage writes and the deploy stage reads.
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// One container-name → image mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

/// The whole artifact: a JSON array of [`ImageDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageDefinitions(pub Vec<ImageDefinition>);

impl ImageDefinitions {
    pub fn single(name: &str, image_uri: &str) -> Self {
        Self(vec![ImageDefinition {
            name: name.to_string(),
            image_uri: image_uri.to_string(),
        }])
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn for_container(&self, name: &str) -> Option<&ImageDefinition> {
        self.0.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageDefinition> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_wire_format() {
        let defs = ImageDefinitions::single("onlineshopping", "repo.example.com/shop:latest");
        assert_eq!(
            defs.to_json().unwrap(),
            r#"[{"name":"onlineshopping","imageUri":"repo.example.com/shop:latest"}]"#
        );
    }

    #[test]
    fn parses_build_output() {
        let defs = ImageDefinitions::from_json(
            r#"[{"name":"onlineshopping","imageUri":"r/shop:latest"},{"name":"sidecar","imageUri":"envoy:v1"}]"#,
        )
        .unwrap();
        assert_eq!(defs.0.len(), 2);
        assert_eq!(defs.for_container("sidecar").unwrap().image_uri, "envoy:v1");
        assert!(defs.for_container("missing").is_none());
    }

    #[test]
    fn rejects_wrong_field_name() {
        assert!(ImageDefinitions::from_json(r#"[{"name":"a","image_uri":"x"}]"#).is_err());
    }
}
