//! Lease-based allocation of pooled articles.
//!
//! Every transition is one conditional update on the article row, so
//! separate processes sharing a database never hand the same article to two
//! consumers.
//!
//! ```text
//! free --claim--> claimed --release(consumed)--> done
//!                    |  \--release(requeue)-->  free
//!                    \----expire_stale-------->  free
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::app::{FastfishError, Result};
use crate::domain::hot::span_start;
use crate::domain::{
    AllocationChange, AllocationGuard, AllocationStatus, Article, ArticleFilter, PoolVariant,
    ReleaseOutcome,
};
use crate::store::ArticlePool;

pub const DEFAULT_LEASE_TTL_SECS: i64 = 600;

/// Re-queries after every candidate of a round was taken by someone else.
const CLAIM_ROUNDS: usize = 3;
const CLAIM_BATCH: usize = 8;

pub struct AllocationManager<P> {
    pool: Arc<P>,
    lease_ttl: Duration,
}

impl<P: ArticlePool> AllocationManager<P> {
    pub fn new(pool: Arc<P>, lease_ttl: Duration) -> Self {
        Self { pool, lease_ttl }
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    fn expired_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        span_start(now, self.lease_ttl)
    }

    /// Hand the oldest eligible article to `requester_id`. `Ok(None)` when
    /// nothing is available.
    pub fn claim(
        &self,
        variant: PoolVariant,
        filter: &ArticleFilter,
        requester_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Article>> {
        let requester_id = requester_id.trim();
        if requester_id.is_empty() {
            return Err(FastfishError::Other("requester id must not be empty".into()));
        }

        for round in 0..CLAIM_ROUNDS {
            let candidates = self.pool.find_claimable(
                variant,
                filter,
                self.expired_before(now),
                CLAIM_BATCH,
            )?;
            if candidates.is_empty() {
                return Ok(None);
            }

            for mut candidate in candidates {
                let guard = AllocationGuard::of(&candidate);
                let change = AllocationChange::Claim {
                    user_id: requester_id.to_string(),
                    at: now,
                };
                if self
                    .pool
                    .compare_and_set_allocation(variant, candidate.id, &guard, &change)?
                {
                    debug!(
                        "Article {} claimed by {} (previous holder: {:?})",
                        candidate.id, requester_id, candidate.locked_by_user_id
                    );
                    candidate.allocation_status = AllocationStatus::Claimed;
                    candidate.locked_by_user_id = Some(requester_id.to_string());
                    candidate.locked_time = Some(now);
                    candidate.updated_at = now;
                    return Ok(Some(candidate));
                }
                debug!(
                    "Lost claim race for article {} (round {})",
                    candidate.id,
                    round + 1
                );
            }
        }

        Ok(None)
    }

    /// Load a claimed article and check that `requester_id` may act on it.
    fn owned_claim(
        &self,
        variant: PoolVariant,
        article_id: i64,
        requester_id: &str,
        now: DateTime<Utc>,
        allow_expired_takeover: bool,
    ) -> Result<Article> {
        let requester_id = requester_id.trim();
        if requester_id.is_empty() {
            return Err(FastfishError::Other("requester id must not be empty".into()));
        }

        let article = self
            .pool
            .get_article(variant, article_id)?
            .ok_or(FastfishError::ArticleNotFound(article_id))?;

        let holder = match article.holder() {
            Some(holder) => holder.to_string(),
            None => return Err(FastfishError::NotClaimed(article_id)),
        };

        let takeover = allow_expired_takeover && article.lease_expired(now, self.lease_ttl);
        if holder != requester_id && !takeover {
            return Err(FastfishError::LockOwnership {
                article_id,
                holder,
                requester: requester_id.to_string(),
            });
        }

        Ok(article)
    }

    /// Finish a claim. Allowed for the holder, or for anyone once the lease
    /// has expired.
    pub fn release(
        &self,
        variant: PoolVariant,
        article_id: i64,
        requester_id: &str,
        outcome: ReleaseOutcome,
        now: DateTime<Utc>,
    ) -> Result<Article> {
        let article = self.owned_claim(variant, article_id, requester_id, now, true)?;

        let change = match outcome {
            ReleaseOutcome::Consumed => AllocationChange::Consume { at: now },
            ReleaseOutcome::Requeue => AllocationChange::Free { at: now },
        };
        if !self.pool.compare_and_set_allocation(
            variant,
            article_id,
            &AllocationGuard::of(&article),
            &change,
        )? {
            return Err(FastfishError::AllocationConflict(article_id));
        }

        debug!("Article {} released by {} ({:?})", article_id, requester_id, outcome);
        self.pool
            .get_article(variant, article_id)?
            .ok_or(FastfishError::ArticleNotFound(article_id))
    }

    /// Renew the holder's lease.
    pub fn extend(
        &self,
        variant: PoolVariant,
        article_id: i64,
        requester_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Article> {
        let mut article = self.owned_claim(variant, article_id, requester_id, now, false)?;

        if !self.pool.compare_and_set_allocation(
            variant,
            article_id,
            &AllocationGuard::of(&article),
            &AllocationChange::Renew { at: now },
        )? {
            return Err(FastfishError::AllocationConflict(article_id));
        }

        article.locked_time = Some(now);
        article.updated_at = now;
        Ok(article)
    }

    /// Free every claim whose lease has run out. Rows released concurrently
    /// are left alone.
    pub fn expire_stale(&self, variant: PoolVariant, now: DateTime<Utc>) -> Result<usize> {
        let stale = self
            .pool
            .find_expired_claims(variant, self.expired_before(now))?;

        let mut freed = 0;
        for article in &stale {
            if self.pool.compare_and_set_allocation(
                variant,
                article.id,
                &AllocationGuard::of(article),
                &AllocationChange::Free { at: now },
            )? {
                freed += 1;
            }
        }

        if freed > 0 {
            info!("Expired {} stale claim(s) in {}", freed, variant.table());
        }
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::{ArticleStatus, NewArticle};
    use crate::store::SqliteStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn setup(ttl_secs: i64) -> (Arc<SqliteStore>, AllocationManager<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let manager = AllocationManager::new(store.clone(), Duration::seconds(ttl_secs));
        (store, manager)
    }

    fn add(store: &SqliteStore, title: &str, at: DateTime<Utc>) -> i64 {
        store
            .insert_article(
                PoolVariant::Raw,
                &NewArticle {
                    title: title.into(),
                    content: "body".into(),
                    status: Some(ArticleStatus::Screened),
                    ..Default::default()
                },
                at,
            )
            .unwrap()
    }

    #[test]
    fn test_second_claimant_gets_nothing() {
        let (store, manager) = setup(600);
        let id = add(&store, "only", t0());
        let filter = ArticleFilter::default();

        let claimed = manager
            .claim(PoolVariant::Raw, &filter, "u1", t0())
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.allocation_status, AllocationStatus::Claimed);
        assert_eq!(claimed.locked_by_user_id.as_deref(), Some("u1"));

        assert!(manager
            .claim(PoolVariant::Raw, &filter, "u2", t0() + Duration::seconds(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_claim_picks_oldest_first() {
        let (store, manager) = setup(600);
        add(&store, "newer", t0() + Duration::seconds(10));
        let older = add(&store, "older", t0());

        let claimed = manager
            .claim(
                PoolVariant::Raw,
                &ArticleFilter::default(),
                "u1",
                t0() + Duration::seconds(20),
            )
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, older);
    }

    #[test]
    fn test_claim_respects_category_filter() {
        let (store, manager) = setup(600);
        add(&store, "uncategorized", t0());
        let filter = ArticleFilter {
            category_id: Some(42),
            ..Default::default()
        };
        assert!(manager
            .claim(PoolVariant::Raw, &filter, "u1", t0())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_lease_expiry_boundary() {
        let (store, manager) = setup(60);
        let id = add(&store, "a", t0());
        manager
            .claim(PoolVariant::Raw, &ArticleFilter::default(), "u1", t0())
            .unwrap()
            .unwrap();

        assert_eq!(
            manager
                .expire_stale(PoolVariant::Raw, t0() + Duration::seconds(59))
                .unwrap(),
            0
        );
        assert_eq!(
            manager
                .expire_stale(PoolVariant::Raw, t0() + Duration::seconds(61))
                .unwrap(),
            1
        );

        let article = store.get_article(PoolVariant::Raw, id).unwrap().unwrap();
        assert_eq!(article.allocation_status, AllocationStatus::Free);
        assert_eq!(article.locked_by_user_id, None);
        assert_eq!(article.locked_time, None);
    }

    #[test]
    fn test_expired_claim_is_reclaimable_directly() {
        let (store, manager) = setup(60);
        let id = add(&store, "a", t0());
        let filter = ArticleFilter::default();
        manager.claim(PoolVariant::Raw, &filter, "u1", t0()).unwrap();

        assert!(manager
            .claim(PoolVariant::Raw, &filter, "u2", t0() + Duration::seconds(59))
            .unwrap()
            .is_none());
        let taken = manager
            .claim(PoolVariant::Raw, &filter, "u2", t0() + Duration::seconds(61))
            .unwrap()
            .unwrap();
        assert_eq!(taken.id, id);
        assert_eq!(taken.locked_by_user_id.as_deref(), Some("u2"));
    }

    #[test]
    fn test_release_by_non_holder_fails_without_mutation() {
        let (store, manager) = setup(600);
        let id = add(&store, "a", t0());
        manager
            .claim(PoolVariant::Raw, &ArticleFilter::default(), "u1", t0())
            .unwrap();
        let before = store.get_article(PoolVariant::Raw, id).unwrap().unwrap();

        let err = manager
            .release(
                PoolVariant::Raw,
                id,
                "u2",
                ReleaseOutcome::Consumed,
                t0() + Duration::seconds(5),
            )
            .unwrap_err();
        match err {
            FastfishError::LockOwnership {
                holder, requester, ..
            } => {
                assert_eq!(holder, "u1");
                assert_eq!(requester, "u2");
            }
            other => panic!("unexpected error: {}", other),
        }

        let after = store.get_article(PoolVariant::Raw, id).unwrap().unwrap();
        assert_eq!(after.allocation_status, before.allocation_status);
        assert_eq!(after.locked_time, before.locked_time);
        assert_eq!(after.published_count, 0);
    }

    #[test]
    fn test_release_consumed_and_requeue() {
        let (store, manager) = setup(600);
        let first = add(&store, "a", t0());
        let second = add(&store, "b", t0() + Duration::seconds(1));
        let filter = ArticleFilter::default();
        let later = t0() + Duration::seconds(30);

        manager.claim(PoolVariant::Raw, &filter, "u1", t0()).unwrap();
        let done = manager
            .release(
                PoolVariant::Raw,
                first,
                "u1",
                ReleaseOutcome::Consumed,
                later,
            )
            .unwrap();
        assert_eq!(done.allocation_status, AllocationStatus::Done);
        assert_eq!(done.published_count, 1);
        assert_eq!(done.last_publish_time, Some(later));
        assert_eq!(done.status, ArticleStatus::Published);

        manager.claim(PoolVariant::Raw, &filter, "u1", later).unwrap();
        let requeued = manager
            .release(
                PoolVariant::Raw,
                second,
                "u1",
                ReleaseOutcome::Requeue,
                later,
            )
            .unwrap();
        assert_eq!(requeued.allocation_status, AllocationStatus::Free);
        assert_eq!(requeued.published_count, 0);

        // Done rows never come back; the requeued one does
        let again = manager
            .claim(PoolVariant::Raw, &filter, "u2", later)
            .unwrap()
            .unwrap();
        assert_eq!(again.id, second);
    }

    #[test]
    fn test_release_after_expiry_by_other_consumer() {
        let (store, manager) = setup(60);
        let id = add(&store, "a", t0());
        manager
            .claim(PoolVariant::Raw, &ArticleFilter::default(), "u1", t0())
            .unwrap();

        let released = manager
            .release(
                PoolVariant::Raw,
                id,
                "u2",
                ReleaseOutcome::Requeue,
                t0() + Duration::seconds(120),
            )
            .unwrap();
        assert_eq!(released.allocation_status, AllocationStatus::Free);
    }

    #[test]
    fn test_release_unclaimed_article() {
        let (store, manager) = setup(600);
        let id = add(&store, "a", t0());
        assert!(matches!(
            manager.release(
                PoolVariant::Raw,
                id,
                "u1",
                ReleaseOutcome::Requeue,
                t0()
            ),
            Err(FastfishError::NotClaimed(_))
        ));
        assert!(matches!(
            manager.release(
                PoolVariant::Raw,
                999,
                "u1",
                ReleaseOutcome::Requeue,
                t0()
            ),
            Err(FastfishError::ArticleNotFound(999))
        ));
    }

    #[test]
    fn test_requester_id_is_trimmed_for_every_transition() {
        let (store, manager) = setup(600);
        let id = add(&store, "a", t0());
        let filter = ArticleFilter::default();

        let claimed = manager
            .claim(PoolVariant::Raw, &filter, " u1 ", t0())
            .unwrap()
            .unwrap();
        assert_eq!(claimed.holder(), Some("u1"));

        let renewed_at = t0() + Duration::seconds(10);
        let renewed = manager
            .extend(PoolVariant::Raw, id, " u1 ", renewed_at)
            .unwrap();
        assert_eq!(renewed.locked_time, Some(renewed_at));

        let done = manager
            .release(
                PoolVariant::Raw,
                id,
                "u1\t",
                ReleaseOutcome::Consumed,
                renewed_at,
            )
            .unwrap();
        assert_eq!(done.allocation_status, AllocationStatus::Done);
    }

    #[test]
    fn test_blank_requester_is_rejected() {
        let (store, manager) = setup(600);
        let id = add(&store, "a", t0());
        let filter = ArticleFilter::default();
        manager.claim(PoolVariant::Raw, &filter, "u1", t0()).unwrap();

        assert!(matches!(
            manager.claim(PoolVariant::Raw, &filter, "  ", t0()),
            Err(FastfishError::Other(_))
        ));
        assert!(matches!(
            manager.extend(PoolVariant::Raw, id, "  ", t0()),
            Err(FastfishError::Other(_))
        ));
        let article = store.get_article(PoolVariant::Raw, id).unwrap().unwrap();
        assert_eq!(article.holder(), Some("u1"));
    }

    #[test]
    fn test_extend_keeps_lease_alive() {
        let (store, manager) = setup(60);
        let id = add(&store, "a", t0());
        manager
            .claim(PoolVariant::Raw, &ArticleFilter::default(), "u1", t0())
            .unwrap();

        let renewed_at = t0() + Duration::seconds(50);
        let renewed = manager
            .extend(PoolVariant::Raw, id, "u1", renewed_at)
            .unwrap();
        assert_eq!(renewed.locked_time, Some(renewed_at));

        assert_eq!(
            manager
                .expire_stale(PoolVariant::Raw, t0() + Duration::seconds(100))
                .unwrap(),
            0
        );
        assert!(matches!(
            manager.extend(PoolVariant::Raw, id, "u2", renewed_at),
            Err(FastfishError::LockOwnership { .. })
        ));
    }

    #[test]
    fn test_stale_snapshot_cannot_free_fresh_claim() {
        let (store, manager) = setup(60);
        let id = add(&store, "a", t0());
        let filter = ArticleFilter::default();
        manager.claim(PoolVariant::Raw, &filter, "u1", t0()).unwrap();
        let stale = store.get_article(PoolVariant::Raw, id).unwrap().unwrap();

        // u2 reclaims after expiry; the old snapshot no longer matches
        manager
            .claim(PoolVariant::Raw, &filter, "u2", t0() + Duration::seconds(61))
            .unwrap()
            .unwrap();
        assert!(!store
            .compare_and_set_allocation(
                PoolVariant::Raw,
                id,
                &AllocationGuard::of(&stale),
                &AllocationChange::Free {
                    at: t0() + Duration::seconds(62)
                },
            )
            .unwrap());
        let current = store.get_article(PoolVariant::Raw, id).unwrap().unwrap();
        assert_eq!(current.holder(), Some("u2"));
    }
}
