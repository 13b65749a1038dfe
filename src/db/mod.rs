use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, TimeZone, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

mod categories;
mod feeds;
mod posts;
mod users;

pub use posts::{PostFilter, PostUpdate};

/// Render a timestamp the way every table stores it.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryStat {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub post_count: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub source_name: Option<String>,
    pub category_id: Option<i64>,
    pub author: String,
    pub tags: String,
    pub is_auto_generated: bool,
    pub is_published: bool,
    pub views: i64,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub category_name: Option<String>,
    pub category_slug: Option<String>,
    pub category_color: Option<String>,
}

impl Post {
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// The date readers see: source publication date when known.
    pub fn display_date(&self) -> &str {
        self.published_at.as_deref().unwrap_or(&self.created_at)
    }
}

/// A post about to be written. `tags` are joined with commas on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub source_name: Option<String>,
    pub category_id: Option<i64>,
    pub author: String,
    pub tags: Vec<String>,
    pub is_auto_generated: bool,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewPost {
    pub fn new(title: &str, slug: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            slug: slug.to_string(),
            content: content.to_string(),
            excerpt: None,
            image_url: None,
            source_url: None,
            source_name: None,
            category_id: None,
            author: DEFAULT_AUTHOR.to_string(),
            tags: Vec::new(),
            is_auto_generated: false,
            is_published: true,
            published_at: None,
        }
    }
}

pub const DEFAULT_AUTHOR: &str = "Mzansi Insights";

#[derive(Debug, Clone, FromRow)]
pub struct RssFeed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub category_id: Option<i64>,
    pub is_active: bool,
    pub last_fetch: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub category_slug: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteStats {
    pub total_posts: i64,
    pub published_posts: i64,
    pub today_posts: i64,
    pub total_views: i64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to ":memory:" is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                slug TEXT UNIQUE NOT NULL,
                description TEXT,
                icon TEXT,
                color TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                slug TEXT UNIQUE NOT NULL,
                content TEXT NOT NULL,
                excerpt TEXT,
                image_url TEXT,
                source_url TEXT,
                source_name TEXT,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                author TEXT NOT NULL DEFAULT 'Mzansi Insights',
                tags TEXT NOT NULL DEFAULT '',
                is_auto_generated INTEGER NOT NULL DEFAULT 0,
                is_published INTEGER NOT NULL DEFAULT 1,
                views INTEGER NOT NULL DEFAULT 0,
                published_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rss_feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_fetch TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_posts_category ON posts(category_id)",
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_posts_source_url
            ON posts(source_url) WHERE source_url IS NOT NULL AND source_url != ''
            "#,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Drop every table and recreate the schema.
    pub async fn reset(&self) -> anyhow::Result<()> {
        for table in ["posts", "rss_feeds", "categories", "users"] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&self.pool)
                .await?;
        }
        self.initialize().await
    }

    /// Liveness check used by the health endpoint.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> anyhow::Result<SiteStats> {
        let (day_start, day_end) = day_bounds(now, Utc.fix());
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(is_published), 0),
                COALESCE(SUM(CASE WHEN created_at >= ? AND created_at < ? THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(views), 0)
            FROM posts
            "#,
        )
        .bind(&day_start)
        .bind(&day_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(SiteStats {
            total_posts: row.0,
            published_posts: row.1,
            today_posts: row.2,
            total_views: row.3,
        })
    }
}

/// Start of `now`'s day in the given offset and of the following day, as
/// stored UTC timestamps.
pub(crate) fn day_bounds(now: DateTime<Utc>, offset: FixedOffset) -> (String, String) {
    let start = now
        .with_timezone(&offset)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(now);
    let end = start + chrono::Duration::days(1);
    (timestamp(start), timestamp(end))
}
