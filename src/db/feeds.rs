use chrono::{DateTime, Utc};

use super::{timestamp, Database, RssFeed};
use crate::config::FeedConfig;

const FEED_SELECT: &str = r#"
    SELECT f.*, c.slug AS category_slug
    FROM rss_feeds f
    LEFT JOIN categories c ON c.id = f.category_id
"#;

impl Database {
    /// Upsert configured feeds by URL. The active flag is only set on first
    /// insert so toggles made in the admin panel survive restarts.
    pub async fn sync_feeds(&self, configs: &[FeedConfig]) -> anyhow::Result<()> {
        let now = timestamp(Utc::now());
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO rss_feeds (name, url, category_id, is_active, created_at)
                VALUES (?, ?, (SELECT id FROM categories WHERE slug = ?), ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    name = excluded.name,
                    category_id = excluded.category_id
                "#,
            )
            .bind(&config.name)
            .bind(&config.url)
            .bind(&config.category)
            .bind(config.active)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_all_feeds(&self) -> anyhow::Result<Vec<RssFeed>> {
        let sql = format!("{} ORDER BY f.id", FEED_SELECT);
        let feeds = sqlx::query_as::<_, RssFeed>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_active_feeds(&self) -> anyhow::Result<Vec<RssFeed>> {
        let sql = format!("{} WHERE f.is_active = 1 ORDER BY f.id", FEED_SELECT);
        let feeds = sqlx::query_as::<_, RssFeed>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_active_feeds_for_category(
        &self,
        category_slug: &str,
    ) -> anyhow::Result<Vec<RssFeed>> {
        let sql = format!(
            "{} WHERE f.is_active = 1 AND c.slug = ? ORDER BY f.id",
            FEED_SELECT
        );
        let feeds = sqlx::query_as::<_, RssFeed>(&sql)
            .bind(category_slug)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<RssFeed>> {
        let sql = format!("{} WHERE f.id = ?", FEED_SELECT);
        let feed = sqlx::query_as::<_, RssFeed>(&sql)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Returns the new id, or None when the URL is already registered.
    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        category_id: Option<i64>,
    ) -> anyhow::Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO rss_feeds (name, url, category_id, is_active, created_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(name.trim())
        .bind(url.trim())
        .bind(category_id)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Returns the new active state, None if the feed is gone.
    pub async fn toggle_feed(&self, feed_id: i64) -> anyhow::Result<Option<bool>> {
        let state: Option<(bool,)> = sqlx::query_as(
            "UPDATE rss_feeds SET is_active = 1 - is_active WHERE id = ? RETURNING is_active",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state.map(|s| s.0))
    }

    pub async fn delete_feed(&self, feed_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM rss_feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a fetch attempt. A successful fetch clears the previous error.
    pub async fn update_feed_fetched(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE rss_feeds SET last_fetch = ?, last_error = ? WHERE id = ?")
            .bind(timestamp(at))
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
