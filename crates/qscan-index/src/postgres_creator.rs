//! Postgres adapter for [`crate::creator::IndexCreator`]. `collection`
//! names a table with a `doc jsonb` column; fields are JSONB expression
//! indexes over that column, matching how `qscan-db` actually stores
//! job records, cache entries, and future document collections.

use async_trait::async_trait;
use qscan_schemas::{IndexRule, SortDirection};
use sqlx::PgPool;

use crate::creator::{IndexCreateError, IndexCreator};

pub struct PostgresIndexCreator {
    pool: PgPool,
}

impl PostgresIndexCreator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn derived_name(rule: &IndexRule) -> String {
    if let Some(name) = &rule.name {
        return name.clone();
    }
    let fields: Vec<String> = rule.fields.iter().map(|(f, _)| f.clone()).collect();
    format!("ix_{}_{}", rule.collection, fields.join("_"))
}

fn build_sql(rule: &IndexRule) -> String {
    let unique = if rule.unique { "unique " } else { "" };
    let name = derived_name(rule);
    let columns: Vec<String> = rule
        .fields
        .iter()
        .map(|(field, dir)| {
            let dir_sql = match dir {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            format!("(doc->>'{field}') {dir_sql}")
        })
        .collect();
    format!(
        "create {unique}index concurrently if not exists {name} on {} ({})",
        rule.collection,
        columns.join(", ")
    )
}

fn classify(err: &sqlx::Error) -> IndexCreateError {
    if let Some(db_err) = err.as_database_error() {
        let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
        // 42P07 = duplicate_table / duplicate relation (Postgres treats a
        // repeat "if not exists" as a no-op, but a bare name clash surfaces
        // this code if a non-index object already owns the name).
        if code == "42P07" || db_err.message().contains("already exists") {
            return IndexCreateError::AlreadyExists;
        }
        if code == "57P03" {
            return IndexCreateError::ShutdownInProgress;
        }
    }
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => IndexCreateError::Timeout,
        sqlx::Error::Io(_) => IndexCreateError::Network(err.to_string()),
        other => IndexCreateError::Other(other.to_string()),
    }
}

#[async_trait]
impl IndexCreator for PostgresIndexCreator {
    async fn create_index(&self, rule: &IndexRule) -> Result<(), IndexCreateError> {
        let sql = build_sql(rule);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .or_else(|e| {
                let classified = classify(&e);
                if classified == IndexCreateError::AlreadyExists {
                    Ok(())
                } else {
                    Err(classified)
                }
            })
    }

    async fn validate(&self, rule: &IndexRule) -> Result<bool, IndexCreateError> {
        let name = derived_name(rule);
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            select exists (
                select 1 from pg_indexes
                where schemaname = 'public' and indexname = $1
            )
            "#,
        )
        .bind(&name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(&e))?;
        Ok(exists)
    }
}
