use crate::config::LeaderElectionConfig;
use sqlx::PgPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Advisory lock key held by the replica that runs scheduled sync cycles
pub const SYNC_LEADER_LOCK_ID: i64 = 0x6d67_7379_6e63; // "mgsync"

/// Background task for leader election
///
/// Only the leader runs scheduled sync cycles, so replicas sharing a database do not fetch and
/// reconcile the same snapshot at the same time. Events and triggered cycles are served by
/// every replica.
///
/// PostgreSQL advisory locks are session-based, so we keep a dedicated connection for as long
/// as we hold the lock. On shutdown the lock is released explicitly so a follower can take over
/// without waiting for the connection to time out.
#[instrument(skip(pool, settings, is_leader, shutdown))]
pub async fn leader_election_task(
    pool: PgPool,
    settings: LeaderElectionConfig,
    is_leader: Arc<AtomicBool>,
    lock_id: i64,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(settings.interval);
    let mut leader_conn: Option<sqlx::pool::PoolConnection<sqlx::Postgres>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match leader_conn.as_mut() {
            None => match pool.acquire().await {
                Ok(mut conn) => {
                    match sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
                        .bind(lock_id)
                        .fetch_one(&mut *conn)
                        .await
                    {
                        Ok(true) => {
                            info!("Gained leadership");
                            is_leader.store(true, Ordering::Relaxed);
                            leader_conn = Some(conn);
                        }
                        Ok(false) => debug!("Following - will retry"),
                        Err(e) => tracing::error!("Failed to check leader lock: {}", e),
                    }
                }
                Err(e) => tracing::error!("Failed to acquire connection for leader election: {}", e),
            },
            Some(conn) => {
                // The lock lives as long as this session does
                match sqlx::query("SELECT 1").execute(&mut **conn).await {
                    Ok(_) => debug!("Leadership renewed (connection alive)"),
                    Err(e) => {
                        warn!("Lost leadership (connection died): {}", e);
                        is_leader.store(false, Ordering::Relaxed);
                        leader_conn = None;
                    }
                }
            }
        }
    }

    if let Some(mut conn) = leader_conn {
        is_leader.store(false, Ordering::Relaxed);
        match sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock_id)
            .fetch_one(&mut *conn)
            .await
        {
            Ok(_) => info!("Released leadership"),
            Err(e) => warn!("Failed to release leader lock: {}", e),
        }
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod postgres_tests {
    use super::*;
    use std::time::Duration;

    #[sqlx::test]
    async fn test_single_leader_and_handover(pool: PgPool) {
        let settings = LeaderElectionConfig {
            enabled: true,
            interval: Duration::from_millis(20),
        };
        let lock_id = 4242;

        let first = Arc::new(AtomicBool::new(false));
        let first_shutdown = CancellationToken::new();
        let first_task = tokio::spawn(leader_election_task(
            pool.clone(),
            settings.clone(),
            first.clone(),
            lock_id,
            first_shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(first.load(Ordering::Relaxed));

        let second = Arc::new(AtomicBool::new(false));
        let second_shutdown = CancellationToken::new();
        let second_task = tokio::spawn(leader_election_task(
            pool.clone(),
            settings,
            second.clone(),
            lock_id,
            second_shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.load(Ordering::Relaxed));

        first_shutdown.cancel();
        first_task.await.unwrap();
        assert!(!first.load(Ordering::Relaxed));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(second.load(Ordering::Relaxed));

        second_shutdown.cancel();
        second_task.await.unwrap();
    }
}
