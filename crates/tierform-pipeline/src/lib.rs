//! tierform-pipeline — the delivery pipeline runtime.
//!
//! An execution fetches the configured branch, builds and pushes the
//! application image under its short revision and `latest`, and points the
//! provisioned service at the new image through `imagedefinitions.json`.
//! External systems sit behind the traits in [`toolchain`].

pub mod controller;
pub mod error;
pub mod stages;
pub mod toolchain;

pub use controller::{PipelineController, PipelineSettings, PipelineTarget, Stage};
pub use error::{PipelineError, PipelineResult};
pub use stages::{build_stage, deploy_stage, image_tag_for_revision, source_stage, BuildArtifact, SourceSettings};
pub use toolchain::{
    BoxFuture, ContainerToolchain, LocalDeployer, LocalRegistry, SecretStore, ServiceDeployer, SourceArtifact,
    SourceHost, SourceRequest, StaticSecrets, StaticSource,
};
