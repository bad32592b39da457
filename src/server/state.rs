use crate::application::{CheckoutService, FeatureGate, LedgerService};
use crate::infrastructure::{
    AppConfig, HttpContentProvider, PostgresAccountRepository, PostgresOrderRepository,
    WebhookVerifier,
};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

pub type LedgerServiceType = LedgerService<PostgresAccountRepository>;
pub type CheckoutServiceType = CheckoutService<PostgresAccountRepository, PostgresOrderRepository>;
pub type FeatureGateType = FeatureGate<PostgresAccountRepository, HttpContentProvider>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub ledger: Arc<LedgerServiceType>,
    pub checkout: Arc<CheckoutServiceType>,
    pub gate: Arc<FeatureGateType>,
    pub verifier: WebhookVerifier,
    pub webhook_timeout: Duration,
    pub frontend_url: String,
}

/// Build full state from config + an existing pool.
///
/// Intended for embedding into a larger service that already manages a `PgPool`.
pub async fn build_state_with_pool(
    config: AppConfig,
    pool: PgPool,
    run_migrations: bool,
) -> anyhow::Result<AppState> {
    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
    }

    let provider = Arc::new(
        HttpContentProvider::new(config.provider_api_key, config.provider_base_url)
            .context("init content provider client")?,
    );

    let account_repo = Arc::new(PostgresAccountRepository::new(pool.clone()));
    let order_repo = Arc::new(PostgresOrderRepository::new(pool.clone()));

    let ledger = Arc::new(LedgerService::new(account_repo.clone()));
    let checkout = Arc::new(CheckoutService::new(account_repo.clone(), order_repo));
    let gate = Arc::new(FeatureGate::new(account_repo, provider));

    Ok(AppState {
        pool,
        ledger,
        checkout,
        gate,
        verifier: WebhookVerifier::new(&config.webhook_secret),
        webhook_timeout: Duration::from_secs(config.webhook_timeout_secs),
        frontend_url: config.frontend_url,
    })
}

/// Build state for the standalone server.
///
/// Creates the `PgPool`, runs migrations, and wires repositories/services.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connect database")?;
    build_state_with_pool(config, pool, true).await
}
