//! Per-user post quota
//!
//! `users.post_available` is the number of posts a user may still publish.
//! All mutations are single conditional `UPDATE` statements, so two batches
//! for the same user cannot overspend.

use tracing::{debug, info, warn};

use crate::error::{DbError, RedcastError, Result};
use crate::Database;

/// Quota withheld at the start of a batch
///
/// Must be handed back to [`Ledger::settle`] once the batch has settled.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be settled"]
pub struct Reservation {
    user_id: String,
    amount: i64,
}

impl Reservation {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }
}

#[derive(Clone)]
pub struct Ledger {
    db: Database,
    initial_posts: i64,
}

impl Ledger {
    /// `initial_posts` is granted to users the ledger has not seen before
    pub fn new(db: Database, initial_posts: i64) -> Self {
        Self {
            db,
            initial_posts: initial_posts.max(0),
        }
    }

    async fn ensure_user(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO users (id, post_available, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(self.initial_posts)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Current quota for a user
    pub async fn check_available(&self, user_id: &str) -> Result<i64> {
        self.ensure_user(user_id).await?;

        let row = sqlx::query_as::<_, (i64,)>("SELECT post_available FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.0)
    }

    /// Atomically take `amount` posts if at least that many are available
    ///
    /// Returns `false` and leaves the quota untouched when there are not
    /// enough. Zero is a no-op that always succeeds.
    pub async fn decrement(&self, user_id: &str, amount: i64) -> Result<bool> {
        if amount < 0 {
            return Err(RedcastError::InvalidInput(format!(
                "Cannot decrement quota by a negative amount ({})",
                amount
            )));
        }
        if amount == 0 {
            return Ok(true);
        }

        self.ensure_user(user_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE users SET post_available = post_available - ?
            WHERE id = ? AND post_available >= ?
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .bind(amount)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        let applied = result.rows_affected() == 1;
        debug!(user_id, amount, applied, "Quota decrement");
        Ok(applied)
    }

    /// Single-post decrement
    pub async fn decrement_one(&self, user_id: &str) -> Result<bool> {
        self.decrement(user_id, 1).await
    }

    /// Withhold `amount` posts for a batch
    ///
    /// # Errors
    ///
    /// `QuotaExceeded` when fewer than `amount` posts are available; the
    /// quota is left unchanged.
    pub async fn reserve(&self, user_id: &str, amount: i64) -> Result<Reservation> {
        if !self.decrement(user_id, amount).await? {
            let available = self.check_available(user_id).await?;
            return Err(RedcastError::QuotaExceeded {
                available,
                requested: amount,
            });
        }

        Ok(Reservation {
            user_id: user_id.to_string(),
            amount,
        })
    }

    /// Return the unused part of a reservation
    ///
    /// `used` is clamped to the reserved amount, so the net effect of
    /// reserve plus settle is exactly `-used`. A failed refund is retried
    /// once. Returns the refunded amount.
    pub async fn settle(&self, reservation: Reservation, used: i64) -> Result<i64> {
        let used = used.clamp(0, reservation.amount);
        let refund = reservation.amount - used;

        if refund > 0 {
            if let Err(e) = self.grant(&reservation.user_id, refund).await {
                warn!(user_id = %reservation.user_id, refund, "Refund failed, retrying: {}", e);
                self.grant(&reservation.user_id, refund).await?;
            }
        }

        debug!(
            user_id = %reservation.user_id,
            reserved = reservation.amount,
            used,
            refund,
            "Settled quota reservation"
        );
        Ok(refund)
    }

    /// Raise a user's quota. Returns the new balance.
    pub async fn grant(&self, user_id: &str, amount: i64) -> Result<i64> {
        if amount < 0 {
            return Err(RedcastError::InvalidInput(format!(
                "Cannot grant a negative amount ({})",
                amount
            )));
        }

        self.ensure_user(user_id).await?;

        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            UPDATE users SET post_available = post_available + ?
            WHERE id = ?
            RETURNING post_available
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        info!(user_id, amount, balance = row.0, "Granted posts");
        Ok(row.0)
    }
}
