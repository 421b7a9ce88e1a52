//! Source resolution.
//!
//! This module provides:
//! - Classification of references (content ids, HLS manifests, direct files)
//! - HLS playlist expansion into ordered segment units
//! - Discovery of files behind numeric content identifiers
//! - A plan cache keeping re-resolution stable

pub mod cache;
pub mod client;
pub mod decode;
pub mod detail;
pub mod hls;
pub mod metadata;
pub mod reference;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::job::FetchUnit;

pub use cache::PlanCache;
pub use client::HttpClient;
pub use detail::video_path;
pub use reference::{classify, extract_urls, SourceRef};

/// Result of resolving a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSource {
    #[serde(default)]
    pub title: Option<String>,
    pub units: Vec<FetchUnit>,
}

/// Turns references into fetch plans.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `reference`; failures are `Error::UnresolvableSource` or
    /// transient HTTP errors.
    async fn resolve(&self, reference: &str) -> Result<ResolvedSource>;

    /// Forget anything remembered about `reference`, so the next resolve
    /// starts from the source. Called when a job for it fails.
    async fn invalidate(&self, _reference: &str) -> Result<()> {
        Ok(())
    }
}

/// Resolver backed by HTTP and the plan cache.
pub struct SourceResolver {
    http: HttpClient,
    config: ResolverConfig,
    cache: PlanCache,
}

impl SourceResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
            config: config.clone(),
            cache: PlanCache::new(config.cache_dir(), config.cache_ttl()),
        })
    }

    async fn resolve_uncached(&self, reference: &str) -> Result<ResolvedSource> {
        match classify(reference, self.config.metadata_site.as_deref())? {
            SourceRef::Direct(url) => Ok(ResolvedSource {
                title: None,
                units: vec![FetchUnit::new(0, url.to_string())],
            }),
            SourceRef::Hls(url) => {
                let units = hls::resolve_playlist(&self.http, url.as_str(), self.config.variant).await?;
                Ok(ResolvedSource { title: None, units })
            }
            SourceRef::ContentId { site, id } => {
                metadata::discover(&self.http, &site, id, self.config.lifetime).await
            }
        }
    }
}

#[async_trait]
impl Resolver for SourceResolver {
    async fn resolve(&self, reference: &str) -> Result<ResolvedSource> {
        match self.cache.load(reference).await {
            Ok(Some(cached)) => {
                tracing::debug!(reference, units = cached.units.len(), "Using cached plan");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(reference, error = %e, "Ignoring unreadable plan cache entry"),
        }

        let resolved = self.resolve_uncached(reference).await?;
        tracing::info!(reference, units = resolved.units.len(), "Resolved source");

        if let Err(e) = self.cache.store(reference, &resolved).await {
            tracing::warn!(reference, error = %e, "Failed to cache plan");
        }
        Ok(resolved)
    }

    async fn invalidate(&self, reference: &str) -> Result<()> {
        tracing::debug!(reference, "Dropping cached plan");
        self.cache.forget(reference).await
    }
}
