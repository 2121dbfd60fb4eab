use mail_auth::Resolver;
use parking_lot::Mutex;
use reqwest::redirect;

use crate::config::EngineConfig;
use crate::store::ResultStore;
use crate::tracking::EndpointCache;

// Shared handles for one processing batch. Everything here is either
// immutable or internally synchronized; workers receive an Arc<Core>.
pub struct Core {
    pub config: EngineConfig,
    pub resolver: Resolver,
    pub store: ResultStore,
    pub endpoints: Mutex<EndpointCache>,
}

impl Core {
    pub async fn new(config: EngineConfig) -> crate::config::Result<Self> {
        let store = ResultStore::open(&config.results).await?;
        let resolver = Resolver::new_system_conf()
            .map_err(|err| format!("Failed to build DNS resolver: {err}"))?;
        Ok(Core {
            endpoints: Mutex::new(EndpointCache::new(
                1024,
                config.tracking.cache_ttl,
                config.tracking.cache_ttl_neg,
            )),
            config,
            resolver,
            store,
        })
    }

    // One dedicated client per worker slot: connection reuse without
    // cross-worker coordination. No redirects are ever followed.
    pub fn http_client(&self) -> crate::config::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(self.config.http_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| format!("Failed to build HTTP client: {err}"))
    }
}
