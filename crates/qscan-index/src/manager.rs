//! Index-manager apply-rules algorithm (S4.5): given the declared set of
//! [`IndexRule`]s, create whatever is missing and record it in the
//! registry so the next run's fast path can skip straight past it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use qscan_schemas::IndexRule;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::creator::{IndexCreateError, IndexCreator};
use crate::key::normalized_key_string;

#[derive(Debug, Clone)]
pub struct ApplyConfig {
    pub max_concurrent: usize,
    pub per_index_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            per_index_timeout: Duration::from_secs(5 * 60),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ApplyReport {
    pub skipped_fast_path: bool,
    pub already_applied: usize,
    pub created: usize,
    pub failed: Vec<(String, String)>,
}

/// Sorts missing rules with the most critical (lowest `priority`) first,
/// unique constraints before non-unique ones, and compound (more-field)
/// indexes before single-field ones within the same priority tier.
fn sort_rules(rules: &mut [IndexRule]) {
    rules.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.unique.cmp(&a.unique))
            .then(b.fields.len().cmp(&a.fields.len()))
    });
}

async fn applied_set(pool: &PgPool, collection: &str) -> Result<HashSet<String>> {
    let applied = qscan_db::index_registry_applied(pool, collection)
        .await
        .context("fetching applied index keys")?;
    Ok(applied.into_iter().collect())
}

/// Runs the apply-rules algorithm over the full declared rule set.
///
/// Step 1 is a fast-path sample: the most critical collection (the one
/// owning the lowest-priority rule) is checked first, and if every one
/// of its rules is already registered the whole run is skipped — this
/// assumes collections tend to be created together, so one up-to-date
/// collection is a strong signal the rest are too.
pub async fn apply_rules(
    pool: &PgPool,
    creator: Arc<dyn IndexCreator>,
    rules: &[IndexRule],
    config: ApplyConfig,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    if rules.is_empty() {
        return Ok(report);
    }

    let sample_collection = rules
        .iter()
        .min_by_key(|r| r.priority)
        .map(|r| r.collection.clone())
        .expect("rules is non-empty");
    let sample_applied = applied_set(pool, &sample_collection).await?;
    let sample_rules: Vec<&IndexRule> = rules.iter().filter(|r| r.collection == sample_collection).collect();
    if sample_rules
        .iter()
        .all(|r| sample_applied.contains(&normalized_key_string(r)))
    {
        report.skipped_fast_path = true;
        return Ok(report);
    }

    let mut by_collection: HashMap<String, Vec<IndexRule>> = HashMap::new();
    for rule in rules {
        by_collection.entry(rule.collection.clone()).or_default().push(rule.clone());
    }

    let mut missing: Vec<IndexRule> = Vec::new();
    for (collection, collection_rules) in &by_collection {
        let applied = if collection == &sample_collection {
            sample_applied.clone()
        } else {
            applied_set(pool, collection).await?
        };
        for rule in collection_rules {
            if applied.contains(&normalized_key_string(rule)) {
                report.already_applied += 1;
            } else {
                missing.push(rule.clone());
            }
        }
    }

    sort_rules(&mut missing);

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(missing.len());
    for rule in missing {
        let semaphore = semaphore.clone();
        let creator = creator.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let outcome = create_with_retry(creator.as_ref(), &rule, &config).await;
            (rule, outcome)
        }));
    }

    for handle in handles {
        let (rule, outcome) = handle.await.context("index-creation task panicked")?;
        match outcome {
            Ok(()) => {
                let key = normalized_key_string(&rule);
                match creator.validate(&rule).await {
                    Ok(true) => {
                        qscan_db::index_registry_mark_applied(pool, &rule.collection, &key).await?;
                        report.created += 1;
                    }
                    Ok(false) => {
                        report.failed.push((key, "created but validation found it missing".into()));
                    }
                    Err(e) => {
                        report.failed.push((key, format!("validation error: {e}")));
                    }
                }
            }
            Err(e) => {
                report.failed.push((normalized_key_string(&rule), e.to_string()));
            }
        }
    }

    Ok(report)
}

async fn create_with_retry(
    creator: &dyn IndexCreator,
    rule: &IndexRule,
    config: &ApplyConfig,
) -> Result<(), IndexCreateError> {
    let mut attempt = 0u32;
    loop {
        let result = timeout(config.per_index_timeout, creator.create_index(rule)).await;
        let err = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(IndexCreateError::AlreadyExists)) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => IndexCreateError::Timeout,
        };
        if !err.is_retryable() || attempt >= config.max_retries {
            return Err(err);
        }
        attempt += 1;
        tokio::time::sleep(config.backoff_base * 2u32.pow(attempt - 1)).await;
    }
}
