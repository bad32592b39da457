use crate::domain::{Account, Order, OrderStatus, INITIAL_GRANT};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Returns the existing account, or atomically creates one with the
    /// initial free grant. Two racing first-accesses must not
    /// double-grant.
    #[must_use]
    async fn get_or_create(&self, account_id: &str) -> Result<Account, RepositoryError>;
    #[must_use]
    async fn get_by_id(&self, account_id: &str) -> Result<Account, RepositoryError>;
    /// Atomic conditional decrement of one credit. Returns the
    /// remaining balance, or `None` when the balance was already zero.
    /// Never a read-then-write of a client-held value.
    #[must_use]
    async fn try_deduct_one(&self, account_id: &str) -> Result<Option<i64>, RepositoryError>;
    /// Atomic server-side increment stamping purchase metadata.
    /// A missing account is a data-integrity failure, not an upsert.
    #[must_use]
    async fn grant_credits(
        &self,
        account_id: &str,
        amount: i32,
        plan_id: &str,
    ) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    #[must_use]
    async fn create(&self, order: &Order) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_by_id(&self, id: Uuid) -> Result<Order, RepositoryError>;
    /// Compare-and-swap completion plus credit grant in one
    /// transaction: flips any non-completed order to `completed`,
    /// records the payment id, and applies the order's credit grant to
    /// the owning account, returning the updated order and the new
    /// balance. Returns `None` when the order is already completed, so
    /// exactly one caller ever applies the grant. A missing account
    /// rolls the whole transition back and reports `NotFound`, leaving
    /// the order re-completable — no partial credit state survives.
    #[must_use]
    async fn complete_and_grant(
        &self,
        id: Uuid,
        payment_id: &str,
    ) -> Result<Option<(Order, i64)>, RepositoryError>;
    /// Conditional transition into `cancelled`/`failed`, guarded so a
    /// late cancel cannot overwrite a completed (or otherwise terminal)
    /// order. Returns whether the transition was applied.
    #[must_use]
    async fn finish_if_created(
        &self,
        id: Uuid,
        status: OrderStatus,
        error: Option<&str>,
    ) -> Result<bool, RepositoryError>;
}

pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn get_or_create(&self, account_id: &str) -> Result<Account, RepositoryError> {
        let now = Utc::now();

        // Conditional create: the losing writer of a first-access race
        // hits the conflict and falls through to the read below.
        sqlx::query(
            r#"
            INSERT INTO accounts (id, credits, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(INITIAL_GRANT)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(account_id).await
    }

    async fn get_by_id(&self, account_id: &str) -> Result<Account, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, credits, plan_id, last_purchase, last_used, created_at, updated_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Account {}", account_id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_account(&row)
    }

    async fn try_deduct_one(&self, account_id: &str) -> Result<Option<i64>, RepositoryError> {
        let now = Utc::now();

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET credits = credits - 1, last_used = $2, updated_at = $2
            WHERE id = $1 AND credits >= 1
            RETURNING credits
            "#,
        )
        .bind(account_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining)
    }

    async fn grant_credits(
        &self,
        account_id: &str,
        amount: i32,
        plan_id: &str,
    ) -> Result<i64, RepositoryError> {
        let now = Utc::now();

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET credits = credits + $2, last_purchase = $3, plan_id = $4, updated_at = $3
            WHERE id = $1
            RETURNING credits
            "#,
        )
        .bind(account_id)
        .bind(i64::from(amount))
        .bind(now)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        balance.ok_or_else(|| RepositoryError::NotFound(format!("Account {}", account_id)))
    }
}

pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, account_id, plan_id, amount, currency, status,
                                credits, payment_id, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order.id)
        .bind(&order.account_id)
        .bind(&order.plan_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.status.to_string())
        .bind(order.credits)
        .bind(&order.payment_id)
        .bind(&order.error)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Order, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, plan_id, amount, currency, status,
                   credits, payment_id, error, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Order {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_order(&row)
    }

    async fn complete_and_grant(
        &self,
        id: Uuid,
        payment_id: &str,
    ) -> Result<Option<(Order, i64)>, RepositoryError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'completed', payment_id = $2, updated_at = $3
            WHERE id = $1 AND status <> 'completed'
            RETURNING id, account_id, plan_id, amount, currency, status,
                      credits, payment_id, error, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(payment_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Lost the transition; nothing to commit.
            return Ok(None);
        };
        let order = row_to_order(&row)?;

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET credits = credits + $2, last_purchase = $3, plan_id = $4, updated_at = $3
            WHERE id = $1
            RETURNING credits
            "#,
        )
        .bind(&order.account_id)
        .bind(i64::from(order.credits))
        .bind(now)
        .bind(&order.plan_id)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping the transaction rolls the status flip back, so a
        // retry can win the transition again once the account exists.
        let balance = balance
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {}", order.account_id)))?;

        tx.commit().await?;
        Ok(Some((order, balance)))
    }

    async fn finish_if_created(
        &self,
        id: Uuid,
        status: OrderStatus,
        error: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        if !matches!(status, OrderStatus::Cancelled | OrderStatus::Failed) {
            return Err(RepositoryError::InvalidData(format!(
                "finish_if_created cannot transition into {}",
                status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, error = $3, updated_at = $4
            WHERE id = $1 AND status = 'created'
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account, RepositoryError> {
    Ok(Account {
        id: row.try_get("id")?,
        credits: row.try_get("credits")?,
        plan_id: row.try_get("plan_id")?,
        last_purchase: row.try_get("last_purchase")?,
        last_used: row.try_get("last_used")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, RepositoryError> {
    let status_str: String = row.try_get("status")?;

    Ok(Order {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        plan_id: row.try_get("plan_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: OrderStatus::from_str(&status_str)
            .map_err(|_| RepositoryError::InvalidData(format!("Unknown status: {}", status_str)))?,
        credits: row.try_get("credits")?,
        payment_id: row.try_get("payment_id")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
