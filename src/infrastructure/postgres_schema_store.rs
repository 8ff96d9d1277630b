use crate::infrastructure::schema_store::{DatabaseTarget, IndexSpec, SchemaStore, SchemaStoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Maps the document model onto Postgres: a database becomes a schema, a
/// collection a `(id TEXT, document JSONB)` table and an index an expression
/// index over `document->>field`.
#[derive(Clone)]
pub struct PostgresSchemaStore {
    pools: Arc<DashMap<String, PgPool>>,
    max_connections: u32,
}

impl PostgresSchemaStore {
    pub fn new(max_connections: u32) -> Self {
        Self {
            pools: Arc::new(DashMap::new()),
            max_connections: max_connections.max(1),
        }
    }

    async fn pool(&self, connection_string: &str) -> Result<PgPool, SchemaStoreError> {
        if let Some(pool) = self.pools.get(connection_string) {
            return Ok(pool.clone());
        }

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(connection_string)
            .await
            .map_err(|e| SchemaStoreError::Connection(e.to_string()))?;

        Ok(self
            .pools
            .entry(connection_string.to_string())
            .or_insert(pool)
            .clone())
    }

    async fn relation_exists(
        &self,
        pool: &PgPool,
        qualified: &str,
    ) -> Result<bool, SchemaStoreError> {
        let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(qualified)
            .fetch_one(pool)
            .await
            .map_err(|e| SchemaStoreError::Statement(e.to_string()))?;
        Ok(exists.is_some())
    }

    async fn execute(&self, pool: &PgPool, sql: &str) -> Result<(), SchemaStoreError> {
        debug!("Executing schema statement: {}", sql);
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| SchemaStoreError::Statement(e.to_string()))?;
        Ok(())
    }
}

/// Only plain identifiers are accepted, so quoting them is enough to build DDL.
pub fn quote_identifier(name: &str) -> Result<String, SchemaStoreError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(SchemaStoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

fn quote_literal(value: &str) -> Result<String, SchemaStoreError> {
    quote_identifier(value)?;
    Ok(format!("'{}'", value))
}

#[async_trait]
impl SchemaStore for PostgresSchemaStore {
    async fn ensure_database(&self, target: &DatabaseTarget) -> Result<bool, SchemaStoreError> {
        let pool = self.pool(&target.connection_string).await?;
        let schema = quote_identifier(&target.database_name)?;

        let existed: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(&target.database_name)
        .fetch_one(&pool)
        .await
        .map_err(|e| SchemaStoreError::Statement(e.to_string()))?;

        self.execute(&pool, &format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .await?;
        Ok(!existed)
    }

    async fn ensure_collection(
        &self,
        target: &DatabaseTarget,
        collection: &str,
    ) -> Result<bool, SchemaStoreError> {
        let pool = self.pool(&target.connection_string).await?;
        let qualified = format!(
            "{}.{}",
            quote_identifier(&target.database_name)?,
            quote_identifier(collection)?
        );

        let existed = self.relation_exists(&pool, &qualified).await?;
        self.execute(
            &pool,
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, document JSONB NOT NULL, created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
                qualified
            ),
        )
        .await?;
        Ok(!existed)
    }

    async fn ensure_index(
        &self,
        target: &DatabaseTarget,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<bool, SchemaStoreError> {
        let pool = self.pool(&target.connection_string).await?;
        let schema = quote_identifier(&target.database_name)?;
        let table = quote_identifier(collection)?;
        let index_name = quote_identifier(&index.name)?;

        let expressions = index
            .fields
            .iter()
            .map(|field| quote_literal(field).map(|lit| format!("(document->>{})", lit)))
            .collect::<Result<Vec<_>, _>>()?;
        if expressions.is_empty() {
            return Err(SchemaStoreError::InvalidIdentifier(format!(
                "index {} has no fields",
                index.name
            )));
        }

        let existed = self
            .relation_exists(&pool, &format!("{}.{}", schema, index_name))
            .await?;
        self.execute(
            &pool,
            &format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {}.{} ({})",
                if index.unique { "UNIQUE " } else { "" },
                index_name,
                schema,
                table,
                expressions.join(", ")
            ),
        )
        .await?;
        Ok(!existed)
    }
}
