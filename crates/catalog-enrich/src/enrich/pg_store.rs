//! PostgreSQL [`CatalogStore`]
//!
//! Each call issues one multi-row statement built with [`QueryBuilder`]. Statements
//! auto-commit; a sub-batch replayed after a transient error is harmless because every
//! insert is `ON CONFLICT DO NOTHING` and every update is a plain overwrite.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::models::{EnrichedRecord, JobCounts, JobStatus, WorkItem};
use super::store::{CatalogStore, ImageRow, JobFailure, LinkRow, NameKind, StoreResult};

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    db: PgPool,
}

impl PgCatalogStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn load_pending(&self) -> StoreResult<Vec<WorkItem>> {
        let rows = sqlx::query_as::<_, (i64, Option<String>, i64)>(
            r#"
            SELECT b.id, b.isbn, j.id
            FROM book_jobs j
            JOIN books b ON b.id = j.book_id
            WHERE j.enrichment_status = $1
            ORDER BY j.id
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(record_id, external_key, job_id)| WorkItem {
                record_id,
                external_key,
                job_id,
            })
            .collect())
    }

    async fn count_jobs(&self) -> StoreResult<JobCounts> {
        let (pending, completed) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE enrichment_status = 'pending'),
                COUNT(*) FILTER (WHERE enrichment_status = 'completed')
            FROM book_jobs
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        Ok(JobCounts { pending, completed })
    }

    async fn insert_names(&self, kind: NameKind, names: &[String]) -> StoreResult<u64> {
        if names.is_empty() {
            return Ok(0);
        }

        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} (name) ", kind.name_table()));
        query_builder.push_values(names, |mut b, name| {
            b.push_bind(name);
        });
        query_builder.push(" ON CONFLICT (name) DO NOTHING");

        let result = query_builder.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    async fn resolve_names(
        &self,
        kind: NameKind,
        names: &[String],
    ) -> StoreResult<Vec<(String, i64)>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT name, id FROM {} WHERE name IN (",
            kind.name_table()
        ));
        let mut separated = query_builder.separated(", ");
        for name in names {
            separated.push_bind(name);
        }
        separated.push_unseparated(")");

        let rows = query_builder
            .build_query_as::<(String, i64)>()
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }

    async fn update_books(&self, records: &[EnrichedRecord]) -> StoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            UPDATE books AS b SET
                description = COALESCE(v.description, b.description),
                price = COALESCE(v.price, b.price),
                published_date = COALESCE(v.published_date, b.published_date),
                subtitle = COALESCE(v.subtitle, b.subtitle),
                page_count = COALESCE(v.page_count, b.page_count),
                toc = COALESCE(v.toc, b.toc),
                updated_at = NOW()
            FROM ("#,
        );
        query_builder.push_values(records, |mut b, record| {
            b.push_bind(record.record_id)
                .push_bind(&record.description)
                .push_bind(record.price)
                .push_bind(record.published_date)
                .push_bind(&record.subtitle)
                .push_bind(record.page_count)
                .push_bind(&record.toc);
        });
        query_builder.push(
            ") AS v(id, description, price, published_date, subtitle, page_count, toc) \
             WHERE b.id = v.id",
        );

        let result = query_builder.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    async fn insert_links(&self, kind: NameKind, links: &[LinkRow]) -> StoreResult<u64> {
        if links.is_empty() {
            return Ok(0);
        }

        let columns = if kind.has_role() {
            format!("book_id, {}, role", kind.link_column())
        } else {
            format!("book_id, {}", kind.link_column())
        };
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} ({columns}) ", kind.link_table()));
        query_builder.push_values(links, |mut b, link| {
            b.push_bind(link.record_id).push_bind(link.target_id);
            if kind.has_role() {
                b.push_bind(&link.role);
            }
        });
        query_builder.push(" ON CONFLICT DO NOTHING");

        let result = query_builder.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    async fn insert_images(&self, images: &[ImageRow]) -> StoreResult<u64> {
        if images.is_empty() {
            return Ok(0);
        }

        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO book_images (book_id, url) ");
        query_builder.push_values(images, |mut b, image| {
            b.push_bind(image.record_id).push_bind(&image.url);
        });
        query_builder.push(" ON CONFLICT (book_id, url) DO NOTHING");

        let result = query_builder.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    async fn mark_completed(&self, job_ids: &[i64]) -> StoreResult<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "UPDATE book_jobs SET enrichment_status = ",
        );
        query_builder
            .push_bind(JobStatus::Completed.as_str())
            .push(", error_message = NULL, updated_at = NOW() WHERE id IN (");
        let mut separated = query_builder.separated(", ");
        for id in job_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = query_builder.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    async fn record_failures(&self, failures: &[JobFailure]) -> StoreResult<u64> {
        if failures.is_empty() {
            return Ok(0);
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            UPDATE book_jobs AS j SET
                error_message = v.message,
                enrichment_retry_count = j.enrichment_retry_count + 1,
                updated_at = NOW()
            FROM ("#,
        );
        query_builder.push_values(failures, |mut b, failure| {
            b.push_bind(failure.job_id).push_bind(&failure.message);
        });
        query_builder.push(") AS v(id, message) WHERE j.id = v.id AND j.enrichment_status = ");
        query_builder.push_bind(JobStatus::Pending.as_str());

        let result = query_builder.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }
}
