/// A rule already present in the registry is skipped; a missing one is
/// created and recorded so the next run's fast path sees it. DB-backed,
/// skipped if MQS_DATABASE_URL is not set.
use async_trait::async_trait;
use qscan_index::{apply_rules, ApplyConfig, IndexCreateError, IndexCreator};
use qscan_schemas::{IndexRule, SortDirection};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingCreator {
    calls: AtomicUsize,
}

#[async_trait]
impl IndexCreator for CountingCreator {
    async fn create_index(&self, _rule: &IndexRule) -> Result<(), IndexCreateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn validate(&self, _rule: &IndexRule) -> Result<bool, IndexCreateError> {
        Ok(true)
    }
}

async fn connect() -> Option<sqlx::PgPool> {
    let url = std::env::var(qscan_db::ENV_DB_URL).ok()?;
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(4).connect(&url).await.ok()?;
    qscan_db::migrate(&pool).await.ok()?;
    Some(pool)
}

#[tokio::test]
async fn missing_rule_is_created_and_then_skipped_on_rerun() -> anyhow::Result<()> {
    let pool = match connect().await {
        Some(p) => p,
        None => {
            eprintln!("SKIP: MQS_DATABASE_URL not set");
            return Ok(());
        }
    };

    let collection = format!("scenario_collection_{}", uuid::Uuid::new_v4().simple());
    let rule = IndexRule {
        collection: collection.clone(),
        fields: vec![("scheduledAt".into(), SortDirection::Asc)],
        unique: false,
        name: None,
        priority: 1,
    };

    let creator = Arc::new(CountingCreator { calls: AtomicUsize::new(0) });
    let first = apply_rules(&pool, creator.clone(), &[rule.clone()], ApplyConfig::default()).await?;
    assert!(!first.skipped_fast_path);
    assert_eq!(first.created, 1);
    assert_eq!(creator.calls.load(Ordering::SeqCst), 1);

    let second = apply_rules(&pool, creator.clone(), &[rule], ApplyConfig::default()).await?;
    assert!(second.skipped_fast_path);
    assert_eq!(creator.calls.load(Ordering::SeqCst), 1, "no extra create_index call on rerun");

    Ok(())
}
