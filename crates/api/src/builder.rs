//! Builder-related types.

use crate::*;
use std::sync::Arc;

/// The general backing store builder.
/// This contains both configuration and factory instances,
/// allowing construction of runtime module instances.
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the builder.
    pub config: crate::config::Config,

    /// The [local_store::LocalStoreFactory] to be used for creating
    /// the [local_store::LocalStore] instance.
    pub local_store: local_store::DynLocalStoreFactory,

    /// The [fetcher::BackingFetcherFactory] to be used for creating
    /// the [fetcher::BackingFetcher] instance.
    pub fetcher: fetcher::DynBackingFetcherFactory,

    /// The [backing_store::BackingStoreFactory] to be used for creating
    /// the [backing_store::BackingStore] instance.
    pub backing_store: backing_store::DynBackingStoreFactory,
}

impl Builder {
    /// Construct a default config given the configured module factories.
    /// Note, this should be called before freezing the Builder instance
    /// in an Arc<>.
    pub fn with_default_config(mut self) -> StoreResult<Self> {
        {
            let Self {
                config,
                local_store,
                fetcher,
                backing_store,
            } = &mut self;

            local_store.default_config(config)?;
            fetcher.default_config(config)?;
            backing_store.default_config(config)?;
        }

        Ok(self)
    }

    /// Validate the current configuration.
    pub fn validate_config(&self) -> StoreResult<()> {
        self.backing_store.validate_config(&self.config)
    }

    /// Generate the local store, the backing fetcher and finally the
    /// backing store wired to both of them.
    pub fn build(self) -> BoxFut<'static, StoreResult<DynBackingStore>> {
        Box::pin(async move {
            self.validate_config()?;

            let builder = Arc::new(self);

            let local_store =
                builder.local_store.create(builder.clone()).await?;
            let fetcher = builder.fetcher.create(builder.clone()).await?;

            builder
                .backing_store
                .create(builder.clone(), local_store, fetcher)
                .await
        })
    }
}
