// Application wiring.
// Builds the cache, upstream sources, dispatcher and ranking service from configuration.

use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use crate::cache::{Cache, CacheKeys, CacheStore, FileStore, MemoryStore};
use crate::config::{CacheBackend, CacheConfig, Config, DispatchMode};
use crate::dispatch::{HttpExecutor, LocalDispatcher, RemoteDispatcher};
use crate::enrich::Enricher;
use crate::error::{Result, StarboardError};
use crate::rank::{DayAggregator, WindowAggregator};
use crate::server::{self, AppState};
use crate::service::{RankingOptions, RankingResponse, Rankings, Target};
use crate::upstream::{DispatchedMetadata, MetadataSource, UpstreamClient};

/// A fully wired service.
pub struct App {
    config: Config,
    rankings: Arc<Rankings>,
    dispatcher: Arc<LocalDispatcher>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let cache = open_cache(&config.cache)?;
        let client = Arc::new(UpstreamClient::from_env(&config.sources, config.retry.clone())?);

        // Always built: it also backs the dispatch endpoint.
        let executor = Arc::new(HttpExecutor::with_client(
            client.http().clone(),
            config.retry.clone(),
        ));
        let dispatcher = Arc::new(LocalDispatcher::new(executor, &config.dispatch));

        let batch_size = config.dispatch.max_batch_items;
        let metadata: Arc<dyn MetadataSource> = match config.dispatch.mode {
            DispatchMode::Direct => client.clone(),
            DispatchMode::Local => Arc::new(DispatchedMetadata::new(
                client.clone(),
                dispatcher.clone(),
                batch_size,
            )),
            DispatchMode::Remote => {
                let http = Client::builder()
                    .connect_timeout(config.sources.timeout())
                    .build()
                    .map_err(StarboardError::Http)?;
                let remote = RemoteDispatcher::from_config(http, &config.dispatch);
                Arc::new(DispatchedMetadata::new(client.clone(), Arc::new(remote), batch_size))
            }
        };

        let days = DayAggregator::new(client, cache.clone(), &config.cache);
        let windows = WindowAggregator::new(
            days,
            cache.clone(),
            config.sources.day_concurrency,
            &config.cache,
        );
        let enricher = Enricher::new(metadata, cache.clone());
        let rankings = Rankings::new(cache, windows, enricher, &config.cache, config.refresh);

        info!(
            cache = ?config.cache.backend,
            dispatch = ?config.dispatch.mode,
            "starboard ready"
        );

        Ok(Self {
            config,
            rankings: Arc::new(rankings),
            dispatcher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> AppState {
        AppState {
            rankings: Arc::clone(&self.rankings),
            dispatcher: Arc::clone(&self.dispatcher),
            dispatch_token: self.config.dispatch.token().ok(),
        }
    }

    pub async fn rank(&self, target: &Target, options: &RankingOptions) -> Result<RankingResponse> {
        self.rankings.rank(target, options).await
    }

    /// Serve the HTTP API on `bind`, or the configured address.
    pub async fn serve(&self, bind: Option<&str>) -> Result<()> {
        let bind = bind.unwrap_or(&self.config.server.bind);
        server::serve(self.state(), bind).await
    }
}

fn open_cache(config: &CacheConfig) -> Result<Cache> {
    let store: Arc<dyn CacheStore> = match config.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::File => {
            let store = match &config.dir {
                Some(dir) => FileStore::new(dir),
                None => FileStore::in_default_dir().ok_or_else(|| {
                    StarboardError::Config("no cache directory available, set cache.dir".into())
                })?,
            };
            info!(root = %store.root().display(), "file cache");
            Arc::new(store)
        }
    };
    Ok(Cache::new(store, CacheKeys::new(config.schema_version.clone())))
}
