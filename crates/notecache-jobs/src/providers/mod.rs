//! Built-in content generators.

pub mod feature_image;
pub mod markdown;
pub mod metadata;
pub mod tags;

use std::sync::Arc;

pub use feature_image::FeatureImageGenerator;
pub use markdown::MarkdownGenerator;
pub use metadata::MetadataGenerator;
pub use tags::TagGenerator;

use crate::provider::{ProviderConfig, ProviderContext, QueuedProvider};
use crate::registry::ContentProviderRegistry;

/// Registry with the four built-in providers sharing `ctx` and `config`.
pub async fn default_registry(ctx: ProviderContext, config: ProviderConfig) -> ContentProviderRegistry {
    let registry = ContentProviderRegistry::new();
    registry
        .register_provider(Arc::new(QueuedProvider::with_config(
            MarkdownGenerator,
            ctx.clone(),
            config.clone(),
        )))
        .await;
    registry
        .register_provider(Arc::new(QueuedProvider::with_config(
            TagGenerator,
            ctx.clone(),
            config.clone(),
        )))
        .await;
    registry
        .register_provider(Arc::new(QueuedProvider::with_config(
            MetadataGenerator,
            ctx.clone(),
            config.clone(),
        )))
        .await;
    registry
        .register_provider(Arc::new(QueuedProvider::with_config(
            FeatureImageGenerator,
            ctx,
            config,
        )))
        .await;
    registry
}
