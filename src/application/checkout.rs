use crate::domain::{find_plan, Order, OrderStatus};
use crate::infrastructure::{AccountRepository, OrderRepository, RepositoryError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Unknown plan: {0}")]
    PlanNotFound(String),
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Order {order_id} already {status}, transition rejected")]
    InvalidTransition { order_id: Uuid, status: OrderStatus },
}

/// Outcome of a reconciliation attempt. Exactly one caller per order
/// ever sees `Credited`; every later attempt sees `AlreadyCompleted`.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Credited { order: Order, balance: i64 },
    AlreadyCompleted { order: Order },
}

/// Order lifecycle plus payment reconciliation. Both confirmation
/// triggers (server-side webhook and client-side success callback)
/// funnel into `complete_order`, which gates the credit grant on a
/// single conditional status transition.
pub struct CheckoutService<A, O>
where
    A: AccountRepository,
    O: OrderRepository,
{
    account_repo: Arc<A>,
    order_repo: Arc<O>,
}

impl<A, O> CheckoutService<A, O>
where
    A: AccountRepository,
    O: OrderRepository,
{
    pub fn new(account_repo: Arc<A>, order_repo: Arc<O>) -> Self {
        Self {
            account_repo,
            order_repo,
        }
    }

    /// Persists a `created` order with the price and credit grant
    /// copied from the static catalog. The purchaser's account is
    /// initialized if this is its first access.
    pub async fn create_order(
        &self,
        account_id: &str,
        plan_id: &str,
    ) -> Result<Order, CheckoutError> {
        let plan =
            find_plan(plan_id).ok_or_else(|| CheckoutError::PlanNotFound(plan_id.to_string()))?;

        self.account_repo.get_or_create(account_id).await?;

        let order = Order::new(account_id.to_string(), plan);
        self.order_repo.create(&order).await?;

        info!(order_id = %order.id, account_id, plan_id, "Order created");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, CheckoutError> {
        self.order_repo.get_by_id(order_id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => CheckoutError::OrderNotFound(order_id),
            other => CheckoutError::Repository(other),
        })
    }

    /// Marks the order completed and applies its credit grant exactly
    /// once, as a single transactional transition. Safe to call
    /// concurrently from the webhook and the client callback; the
    /// loser of the status compare-and-swap skips the grant and
    /// reports the idempotent no-op. A failed grant rolls the status
    /// flip back so a provider retry can still credit the account.
    pub async fn complete_order(
        &self,
        order_id: Uuid,
        payment_id: &str,
    ) -> Result<Completion, CheckoutError> {
        match self.order_repo.complete_and_grant(order_id, payment_id).await {
            Ok(Some((order, balance))) => {
                info!(order_id = %order.id, account_id = %order.account_id,
                      credits = order.credits, balance, payment_id, "Order completed, credits granted");
                Ok(Completion::Credited { order, balance })
            }
            Ok(None) => {
                // Lost the transition: the other trigger already
                // completed this order. Idempotent no-op, not an error.
                let order = self.get_order(order_id).await?;
                info!(order_id = %order.id, "Order already completed, skipping credit grant");
                Ok(Completion::AlreadyCompleted { order })
            }
            Err(RepositoryError::NotFound(_)) => {
                // The transition won but the grant target is missing;
                // the whole transition rolled back. Data-integrity
                // failure, surfaced loudly.
                let order = self.get_order(order_id).await?;
                error!(order_id = %order.id, account_id = %order.account_id,
                       "Order references missing account, completion rolled back");
                Err(CheckoutError::AccountNotFound(order.account_id))
            }
            Err(other) => Err(CheckoutError::Repository(other)),
        }
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, CheckoutError> {
        self.finish_order(order_id, OrderStatus::Cancelled, None).await
    }

    pub async fn fail_order(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<Order, CheckoutError> {
        self.finish_order(order_id, OrderStatus::Failed, Some(reason)).await
    }

    async fn finish_order(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        error: Option<&str>,
    ) -> Result<Order, CheckoutError> {
        let applied = self.order_repo.finish_if_created(order_id, status, error).await?;

        let order = self.get_order(order_id).await?;
        if applied {
            info!(order_id = %order.id, %status, "Order closed");
            return Ok(order);
        }

        // A late cancel/failure after completion (or after the other
        // terminal state) must not rewind the order.
        warn!(order_id = %order.id, current = %order.status, attempted = %status,
              "Rejected transition on terminal order");
        Err(CheckoutError::InvalidTransition {
            order_id,
            status: order.status,
        })
    }
}
