//! Container image references and the conditional image source.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Value;

#[derive(Debug, Error, PartialEq)]
pub enum ImageUriError {
    #[error("empty image URI")]
    Empty,
    #[error("invalid image URI: {0}")]
    Invalid(String),
}

/// A parsed container image URI: `[registry/]repository[:tag]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUri {
    /// Registry host, present when the first path segment looks like a host
    /// (contains `.` or `:`, or is `localhost`).
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
}

impl ImageUri {
    pub fn parse(uri: &str) -> Result<Self, ImageUriError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(ImageUriError::Empty);
        }
        if uri.contains(char::is_whitespace) || uri.ends_with('/') || uri.ends_with(':') {
            return Err(ImageUriError::Invalid(uri.to_string()));
        }

        let (registry, rest) = match uri.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest)
            }
            _ => (None, uri),
        };

        // A ':' after the last '/' separates the tag.
        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag.to_string())),
            _ => (rest, None),
        };
        if repository.is_empty() {
            return Err(ImageUriError::Invalid(uri.to_string()));
        }

        Ok(ImageUri {
            registry,
            repository: repository.to_string(),
            tag,
        })
    }

    /// Tag, defaulting to `latest` like container runtimes do.
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// URI without the tag (the repository URI).
    pub fn repository_uri(&self) -> String {
        match &self.registry {
            Some(r) => format!("{r}/{}", self.repository),
            None => self.repository.clone(),
        }
    }
}

impl std::fmt::Display for ImageUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repository_uri())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        Ok(())
    }
}

/// Where the application container image comes from.
///
/// Selected exactly once per graph construction; the port travels with the
/// image so a pipeline image can never be paired with the placeholder's port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageSource {
    /// A fixed public image (bootstrap mode).
    Fixed { uri: String, port: u16 },
    /// A tag in the provisioned image repository (pipeline mode).
    FromRepository {
        repository: Value,
        tag: String,
        port: u16,
    },
}

impl ImageSource {
    pub fn port(&self) -> u16 {
        match self {
            ImageSource::Fixed { port, .. } | ImageSource::FromRepository { port, .. } => *port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_docker_hub_image() {
        let uri = ImageUri::parse("amazon/amazon-ecs-sample").unwrap();
        assert_eq!(uri.registry, None);
        assert_eq!(uri.repository, "amazon/amazon-ecs-sample");
        assert_eq!(uri.tag_or_latest(), "latest");
    }

    #[test]
    fn parse_registry_image_with_tag() {
        let uri = ImageUri::parse(
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/onlineshopping-07:abcdef1",
        )
        .unwrap();
        assert_eq!(
            uri.registry.as_deref(),
            Some("123456789012.dkr.ecr.us-east-1.amazonaws.com")
        );
        assert_eq!(uri.repository, "onlineshopping-07");
        assert_eq!(uri.tag.as_deref(), Some("abcdef1"));
    }

    #[test]
    fn parse_registry_with_port() {
        let uri = ImageUri::parse("localhost:5000/app").unwrap();
        assert_eq!(uri.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(uri.tag, None);
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(ImageUri::parse(""), Err(ImageUriError::Empty));
        assert!(ImageUri::parse("app:").is_err());
        assert!(ImageUri::parse("reg.example.com/").is_err());
        assert!(ImageUri::parse("bad image").is_err());
    }

    #[test]
    fn image_source_port_follows_variant() {
        let fixed = ImageSource::Fixed {
            uri: "amazon/amazon-ecs-sample".to_string(),
            port: 80,
        };
        let repo = ImageSource::FromRepository {
            repository: Value::attr("OnlineShoppingRepo", "repository_uri"),
            tag: "latest".to_string(),
            port: 8070,
        };
        assert_eq!(fixed.port(), 80);
        assert_eq!(repo.port(), 8070);
    }
}
