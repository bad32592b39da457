use crate::infrastructure::{
    AccountRepository, ContentProvider, FeatureKind, ProviderError, RepositoryError,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Insufficient credits")]
    InsufficientCredits,
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// The small operation set that reads and mutates balances. Every
/// mutation goes through the store's atomic primitives; there is no
/// in-process coordination to lean on between the webhook process and
/// open browser tabs.
pub struct LedgerService<A>
where
    A: AccountRepository,
{
    account_repo: Arc<A>,
}

impl<A> LedgerService<A>
where
    A: AccountRepository,
{
    pub fn new(account_repo: Arc<A>) -> Self {
        Self { account_repo }
    }

    /// Current balance, creating the account with the initial free
    /// grant on first access.
    pub async fn get_balance(&self, account_id: &str) -> Result<i64, LedgerError> {
        let account = self.account_repo.get_or_create(account_id).await?;
        Ok(account.credits)
    }

    /// Explicit form of the first-access initialization.
    pub async fn initialize_account(&self, account_id: &str) -> Result<i64, LedgerError> {
        self.get_balance(account_id).await
    }

    /// Deduct exactly one credit. Returns the remaining balance as
    /// reported by the store's conditional decrement, never a value
    /// recomputed from a stale client copy.
    pub async fn deduct_one(&self, account_id: &str) -> Result<i64, LedgerError> {
        self.account_repo.get_or_create(account_id).await?;

        match self.account_repo.try_deduct_one(account_id).await? {
            Some(remaining) => Ok(remaining),
            None => Err(LedgerError::InsufficientCredits),
        }
    }

    pub async fn grant_credits(
        &self,
        account_id: &str,
        amount: i32,
        plan_id: &str,
    ) -> Result<i64, LedgerError> {
        let balance = self
            .account_repo
            .grant_credits(account_id, amount, plan_id)
            .await?;

        info!(account_id, amount, balance, "Credits granted");
        Ok(balance)
    }
}

/// Result of a gated feature invocation: the provider output plus the
/// authoritative remaining balance for the UI cache.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub output: String,
    pub remaining: i64,
}

/// Pre/post-condition check wrapping each credit-consuming action:
/// check balance, invoke the provider, deduct one credit on success.
/// A provider failure deducts nothing.
pub struct FeatureGate<A, P>
where
    A: AccountRepository,
    P: ContentProvider,
{
    account_repo: Arc<A>,
    provider: Arc<P>,
}

impl<A, P> FeatureGate<A, P>
where
    A: AccountRepository,
    P: ContentProvider,
{
    pub fn new(account_repo: Arc<A>, provider: Arc<P>) -> Self {
        Self {
            account_repo,
            provider,
        }
    }

    pub async fn invoke(
        &self,
        account_id: &str,
        feature: FeatureKind,
        input: &str,
    ) -> Result<GateOutcome, LedgerError> {
        let account = self.account_repo.get_or_create(account_id).await?;
        if account.credits <= 0 {
            return Err(LedgerError::InsufficientCredits);
        }

        let output = self.provider.run(feature, input).await?;

        let remaining = match self.account_repo.try_deduct_one(account_id).await? {
            Some(remaining) => remaining,
            None => {
                // A concurrent tab drained the balance between the
                // check and the decrement. The provider work is done,
                // so report the floor instead of going negative.
                warn!(account_id, %feature, "Balance drained mid-invocation, no credit deducted");
                0
            }
        };

        info!(account_id, %feature, remaining, "Feature invocation charged");
        Ok(GateOutcome { output, remaining })
    }
}
