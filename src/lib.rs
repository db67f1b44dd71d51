pub mod accounts;
pub mod api;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod notifications;
pub mod payments;
pub mod wallet;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::accounts::Accounts;
use crate::api::rate_limit::RateLimiter;
use crate::cache::Cache;
use crate::wallet::Wallet;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub cache: Cache,
    pub wallet: Wallet,
    pub accounts: Accounts,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: DbPool,
        cache: Cache,
        wallet: Wallet,
        accounts: Accounts,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            db,
            cache,
            wallet,
            accounts,
            rate_limiter,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Fully wired state over an in-memory store, for router tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::accounts::google::testing::FakeGoogle;
    use crate::accounts::TokenIssuer;
    use crate::db::test_pool;
    use crate::notifications::testing::RecordingMailer;
    use crate::notifications::Notifier;
    use crate::payments::testing::ScriptedGateway;

    pub struct TestApp {
        pub state: Arc<AppState>,
        pub mailer: Arc<RecordingMailer>,
        pub gateway: Arc<ScriptedGateway>,
    }

    impl TestApp {
        pub async fn new() -> Self {
            Self::with_config(Config::default()).await
        }

        pub async fn with_config(mut config: Config) -> Self {
            config.auth.jwt_secret = "router-test-secret".to_string();

            let db = test_pool().await;
            let cache = Cache::in_memory();
            let mailer = Arc::new(RecordingMailer::default());
            let gateway = Arc::new(ScriptedGateway::approving());
            let notifier = Notifier::new(mailer.clone());

            let wallet = Wallet::new(
                db.clone(),
                cache.clone(),
                gateway.clone(),
                notifier.clone(),
                config.payments.currency.clone(),
            );
            let accounts = Accounts::new(
                db.clone(),
                cache.clone(),
                notifier,
                TokenIssuer::new(&config.auth.jwt_secret, config.auth.token_ttl_hours),
                Arc::new(FakeGoogle),
                config.email.app_url.clone(),
            );

            let state = Arc::new(AppState::new(config, db, cache, wallet, accounts));
            Self {
                state,
                mailer,
                gateway,
            }
        }
    }
}
