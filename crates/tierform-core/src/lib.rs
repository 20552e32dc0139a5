pub mod artifact;
pub mod config;
pub mod context;
pub mod image;
pub mod types;

pub use artifact::{ImageDefinition, ImageDefinitions, IMAGE_DEFINITIONS_FILE};
pub use config::{ConfigError, TierformConfig};
pub use context::{DeployContext, DeploymentMode, USE_PIPELINE_IMAGE};
pub use image::{ImageSource, ImageUri, ImageUriError};
pub use types::*;
