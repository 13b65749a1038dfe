use chrono::{DateTime, FixedOffset, Utc};

use super::{day_bounds, timestamp, Database, NewPost, Post};

const POST_SELECT: &str = r#"
    SELECT p.*, c.name AS category_name, c.slug AS category_slug, c.color AS category_color
    FROM posts p
    LEFT JOIN categories c ON c.id = p.category_id
"#;

/// Which posts a listing covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostFilter {
    Published,
    PublishedInCategory(i64),
    All,
}

impl PostFilter {
    fn clause(&self) -> &'static str {
        match self {
            PostFilter::Published => "WHERE p.is_published = 1",
            PostFilter::PublishedInCategory(_) => "WHERE p.is_published = 1 AND p.category_id = ?",
            PostFilter::All => "",
        }
    }

    fn category_id(&self) -> Option<i64> {
        match self {
            PostFilter::PublishedInCategory(id) => Some(*id),
            _ => None,
        }
    }
}

/// Editable fields of an existing post.
#[derive(Debug, Clone)]
pub struct PostUpdate {
    pub title: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub category_id: Option<i64>,
    pub tags: String,
    pub is_published: bool,
}

impl Database {
    /// Insert unless a post with the same slug or source URL exists.
    /// Returns the new id when a row was written.
    pub async fn insert_post_if_absent(
        &self,
        post: &NewPost,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<i64>> {
        let created_at = timestamp(now);
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO posts (
                title, slug, content, excerpt, image_url, source_url, source_name,
                category_id, author, tags, is_auto_generated, is_published,
                published_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.title)
        .bind(&post.slug)
        .bind(&post.content)
        .bind(&post.excerpt)
        .bind(&post.image_url)
        .bind(post.source_url.as_deref().filter(|url| !url.is_empty()))
        .bind(&post.source_name)
        .bind(post.category_id)
        .bind(&post.author)
        .bind(post.tags.join(","))
        .bind(post.is_auto_generated)
        .bind(post.is_published)
        .bind(post.published_at.map(timestamp))
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    pub async fn slug_exists(&self, slug: &str) -> anyhow::Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE slug = ?")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// First free slug among `base`, `base-2`, `base-3`, ...
    pub async fn unique_slug(&self, base: &str) -> anyhow::Result<String> {
        if !self.slug_exists(base).await? {
            return Ok(base.to_string());
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !self.slug_exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    pub async fn get_post(&self, post_id: i64) -> anyhow::Result<Option<Post>> {
        let sql = format!("{} WHERE p.id = ?", POST_SELECT);
        let post = sqlx::query_as::<_, Post>(&sql)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(post)
    }

    pub async fn get_post_by_slug(
        &self,
        slug: &str,
        published_only: bool,
    ) -> anyhow::Result<Option<Post>> {
        let sql = if published_only {
            format!("{} WHERE p.slug = ? AND p.is_published = 1", POST_SELECT)
        } else {
            format!("{} WHERE p.slug = ?", POST_SELECT)
        };
        let post = sqlx::query_as::<_, Post>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(post)
    }

    /// Newest first.
    pub async fn list_posts(
        &self,
        filter: PostFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Post>> {
        let sql = format!(
            "{} {} ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?",
            POST_SELECT,
            filter.clause()
        );
        let mut query = sqlx::query_as::<_, Post>(&sql);
        if let Some(category_id) = filter.category_id() {
            query = query.bind(category_id);
        }
        let posts = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        Ok(posts)
    }

    pub async fn count_posts(&self, filter: PostFilter) -> anyhow::Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM posts p {}", filter.clause());
        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        if let Some(category_id) = filter.category_id() {
            query = query.bind(category_id);
        }
        let count = query.fetch_one(&self.pool).await?;
        Ok(count.0)
    }

    /// Case-insensitive substring match on title, excerpt and content.
    pub async fn search_posts(&self, term: &str, limit: i64) -> anyhow::Result<Vec<Post>> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"{}
            WHERE p.is_published = 1 AND (
                instr(lower(p.title), ?) > 0
                OR instr(lower(COALESCE(p.excerpt, '')), ?) > 0
                OR instr(lower(p.content), ?) > 0
            )
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT ?"#,
            POST_SELECT
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(&term)
            .bind(&term)
            .bind(&term)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(posts)
    }

    /// Other published posts from the same category.
    pub async fn related_posts(&self, post: &Post, limit: i64) -> anyhow::Result<Vec<Post>> {
        let Some(category_id) = post.category_id else {
            return Ok(Vec::new());
        };
        let sql = format!(
            r#"{}
            WHERE p.is_published = 1 AND p.category_id = ? AND p.id != ?
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT ?"#,
            POST_SELECT
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(category_id)
            .bind(post.id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(posts)
    }

    /// Most viewed published posts.
    pub async fn trending_posts(&self, limit: i64) -> anyhow::Result<Vec<Post>> {
        let sql = format!(
            "{} WHERE p.is_published = 1 ORDER BY p.views DESC, p.created_at DESC LIMIT ?",
            POST_SELECT
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(posts)
    }

    pub async fn increment_views(&self, post_id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE posts SET views = views + 1 WHERE id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_post(
        &self,
        post_id: i64,
        update: &PostUpdate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET
                title = ?, content = ?, excerpt = ?, image_url = ?,
                category_id = ?, tags = ?, is_published = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.title)
        .bind(&update.content)
        .bind(&update.excerpt)
        .bind(&update.image_url)
        .bind(update.category_id)
        .bind(&update.tags)
        .bind(update.is_published)
        .bind(timestamp(now))
        .bind(post_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_post(&self, post_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip the published flag. Returns the new state, None if the post is gone.
    pub async fn toggle_post(&self, post_id: i64) -> anyhow::Result<Option<bool>> {
        let state: Option<(bool,)> = sqlx::query_as(
            "UPDATE posts SET is_published = 1 - is_published WHERE id = ? RETURNING is_published",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state.map(|s| s.0))
    }

    /// Auto-generated posts created on `now`'s local day.
    pub async fn count_auto_posts_today(
        &self,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> anyhow::Result<i64> {
        let (day_start, day_end) = day_bounds(now, offset);
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM posts
            WHERE is_auto_generated = 1 AND created_at >= ? AND created_at < ?
            "#,
        )
        .bind(&day_start)
        .bind(&day_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    pub async fn last_auto_post_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.latest_created_at("WHERE is_auto_generated = 1").await
    }

    pub async fn last_post_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.latest_created_at("").await
    }

    async fn latest_created_at(&self, clause: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let sql = format!("SELECT MAX(created_at) FROM posts {}", clause);
        let latest: (Option<String>,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(latest.0.and_then(|ts| {
            DateTime::parse_from_rfc3339(&ts)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
    }

    mod insert_tests {
        use super::*;

        #[tokio::test]
        async fn test_insert_and_fetch() {
            let db = create_seeded_db().await;
            let news = db.get_category_by_slug("news").await.unwrap().unwrap();

            let mut post = new_post("Parliament passes budget", "parliament-budget");
            post.category_id = Some(news.id);
            post.tags = vec!["budget".into(), "news".into()];
            post.published_at = Some(at(8));
            let id = db.insert_post_if_absent(&post, at(9)).await.unwrap();
            assert!(id.is_some());

            let stored = db.get_post(id.unwrap()).await.unwrap().unwrap();
            assert_eq!(stored.title, "Parliament passes budget");
            assert_eq!(stored.tags, "budget,news");
            assert_eq!(stored.category_slug.as_deref(), Some("news"));
            assert_eq!(stored.published_at.as_deref(), Some("2024-05-10T08:00:00Z"));
            assert_eq!(stored.created_at, "2024-05-10T09:00:00Z");
            assert_eq!(stored.author, "Mzansi Insights");
            assert_eq!(stored.views, 0);
            assert!(stored.is_published);
        }

        #[tokio::test]
        async fn test_duplicate_slug_is_ignored() {
            let db = create_test_db().await;
            let post = new_post("Same article", "same-article");

            assert!(db.insert_post_if_absent(&post, at(9)).await.unwrap().is_some());
            assert!(db.insert_post_if_absent(&post, at(10)).await.unwrap().is_none());
            assert_eq!(db.count_posts(PostFilter::All).await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_duplicate_source_url_is_ignored() {
            let db = create_test_db().await;
            let mut first = new_post("First title", "first-title");
            first.source_url = Some("https://example.com/a".into());
            let mut second = new_post("Second title", "second-title");
            second.source_url = Some("https://example.com/a".into());

            assert!(db.insert_post_if_absent(&first, at(9)).await.unwrap().is_some());
            assert!(db.insert_post_if_absent(&second, at(9)).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_empty_source_urls_do_not_collide() {
            let db = create_test_db().await;
            let mut first = new_post("First title", "first-title");
            first.source_url = Some(String::new());
            let mut second = new_post("Second title", "second-title");
            second.source_url = Some(String::new());

            assert!(db.insert_post_if_absent(&first, at(9)).await.unwrap().is_some());
            assert!(db.insert_post_if_absent(&second, at(9)).await.unwrap().is_some());
        }

        #[tokio::test]
        async fn test_unique_slug() {
            let db = create_test_db().await;
            assert_eq!(db.unique_slug("story").await.unwrap(), "story");

            db.insert_post_if_absent(&new_post("Story", "story"), at(9))
                .await
                .unwrap();
            assert_eq!(db.unique_slug("story").await.unwrap(), "story-2");

            db.insert_post_if_absent(&new_post("Story", "story-2"), at(9))
                .await
                .unwrap();
            assert_eq!(db.unique_slug("story").await.unwrap(), "story-3");
        }
    }

    mod listing_tests {
        use super::*;

        async fn three_posts(db: &Database) -> i64 {
            let sports = db.get_category_by_slug("sports").await.unwrap().unwrap();
            for (hour, slug) in [(7, "oldest"), (8, "middle"), (9, "newest")] {
                let mut post = new_post(&format!("Post {}", slug), slug);
                post.category_id = Some(sports.id);
                db.insert_post_if_absent(&post, at(hour)).await.unwrap();
            }
            sports.id
        }

        #[tokio::test]
        async fn test_list_newest_first_with_paging() {
            let db = create_seeded_db().await;
            three_posts(&db).await;

            let page1 = db.list_posts(PostFilter::Published, 2, 0).await.unwrap();
            let page2 = db.list_posts(PostFilter::Published, 2, 2).await.unwrap();

            let slugs: Vec<_> = page1.iter().map(|p| p.slug.as_str()).collect();
            assert_eq!(slugs, vec!["newest", "middle"]);
            assert_eq!(page2.len(), 1);
            assert_eq!(page2[0].slug, "oldest");
        }

        #[tokio::test]
        async fn test_unpublished_hidden_from_public_listing() {
            let db = create_seeded_db().await;
            three_posts(&db).await;
            let middle = db.get_post_by_slug("middle", false).await.unwrap().unwrap();
            db.toggle_post(middle.id).await.unwrap();

            assert_eq!(db.count_posts(PostFilter::Published).await.unwrap(), 2);
            assert_eq!(db.count_posts(PostFilter::All).await.unwrap(), 3);
            assert!(db.get_post_by_slug("middle", true).await.unwrap().is_none());
            assert!(db.get_post_by_slug("middle", false).await.unwrap().is_some());
        }

        #[tokio::test]
        async fn test_category_filter() {
            let db = create_seeded_db().await;
            let sports_id = three_posts(&db).await;
            let tech = db.get_category_by_slug("technology").await.unwrap().unwrap();
            let mut other = new_post("Tech post", "tech-post");
            other.category_id = Some(tech.id);
            db.insert_post_if_absent(&other, at(10)).await.unwrap();

            let filter = PostFilter::PublishedInCategory(sports_id);
            assert_eq!(db.count_posts(filter).await.unwrap(), 3);
            let posts = db.list_posts(filter, 10, 0).await.unwrap();
            assert!(posts.iter().all(|p| p.category_id == Some(sports_id)));
        }

        #[tokio::test]
        async fn test_related_excludes_self() {
            let db = create_seeded_db().await;
            three_posts(&db).await;
            let newest = db.get_post_by_slug("newest", true).await.unwrap().unwrap();

            let related = db.related_posts(&newest, 5).await.unwrap();
            let slugs: Vec<_> = related.iter().map(|p| p.slug.as_str()).collect();
            assert_eq!(slugs, vec!["middle", "oldest"]);
        }

        #[tokio::test]
        async fn test_trending_by_views() {
            let db = create_seeded_db().await;
            three_posts(&db).await;
            let oldest = db.get_post_by_slug("oldest", true).await.unwrap().unwrap();
            for _ in 0..3 {
                db.increment_views(oldest.id).await.unwrap();
            }

            let trending = db.trending_posts(2).await.unwrap();
            assert_eq!(trending[0].slug, "oldest");
            assert_eq!(trending[0].views, 3);
            assert_eq!(trending.len(), 2);
        }
    }

    mod search_tests {
        use super::*;

        #[tokio::test]
        async fn test_search_matches_title_and_content() {
            let db = create_test_db().await;
            db.insert_post_if_absent(
                &NewPost::new("SASSA grant dates", "sassa-dates", "Payment schedule."),
                at(9),
            )
            .await
            .unwrap();
            db.insert_post_if_absent(
                &NewPost::new("Weekend weather", "weather", "Grant money is not weather."),
                at(9),
            )
            .await
            .unwrap();
            db.insert_post_if_absent(&new_post("Rugby final", "rugby"), at(9))
                .await
                .unwrap();

            let results = db.search_posts("GRANT", 20).await.unwrap();
            assert_eq!(results.len(), 2);

            let results = db.search_posts("rugby", 20).await.unwrap();
            assert_eq!(results.len(), 1);
        }

        #[tokio::test]
        async fn test_blank_search_returns_nothing() {
            let db = create_test_db().await;
            db.insert_post_if_absent(&new_post("Anything", "anything"), at(9))
                .await
                .unwrap();
            assert!(db.search_posts("   ", 20).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_search_treats_wildcards_literally() {
            let db = create_test_db().await;
            db.insert_post_if_absent(&new_post("Plain title", "plain"), at(9))
                .await
                .unwrap();
            assert!(db.search_posts("%", 20).await.unwrap().is_empty());
        }
    }

    mod edit_tests {
        use super::*;

        #[tokio::test]
        async fn test_update_post() {
            let db = create_seeded_db().await;
            let id = db
                .insert_post_if_absent(&new_post("Draft", "draft"), at(9))
                .await
                .unwrap()
                .unwrap();
            let business = db.get_category_by_slug("business").await.unwrap().unwrap();

            let update = PostUpdate {
                title: "Final".into(),
                content: "Final content".into(),
                excerpt: Some("Final".into()),
                image_url: None,
                category_id: Some(business.id),
                tags: "markets".into(),
                is_published: false,
            };
            assert!(db.update_post(id, &update, at(11)).await.unwrap());

            let post = db.get_post(id).await.unwrap().unwrap();
            assert_eq!(post.title, "Final");
            assert_eq!(post.slug, "draft");
            assert_eq!(post.category_slug.as_deref(), Some("business"));
            assert_eq!(post.updated_at, "2024-05-10T11:00:00Z");
            assert!(!post.is_published);

            assert!(!db.update_post(999, &update, at(11)).await.unwrap());
        }

        #[tokio::test]
        async fn test_toggle_and_delete() {
            let db = create_test_db().await;
            let id = db
                .insert_post_if_absent(&new_post("Toggle me", "toggle-me"), at(9))
                .await
                .unwrap()
                .unwrap();

            assert_eq!(db.toggle_post(id).await.unwrap(), Some(false));
            assert_eq!(db.toggle_post(id).await.unwrap(), Some(true));

            assert!(db.delete_post(id).await.unwrap());
            assert_eq!(db.toggle_post(id).await.unwrap(), None);
            assert!(!db.delete_post(id).await.unwrap());
        }
    }

    mod auto_post_tests {
        use super::*;

        #[tokio::test]
        async fn test_count_auto_posts_today() {
            let db = create_test_db().await;
            let mut auto = new_post("Auto today", "auto-today");
            auto.is_auto_generated = true;
            let mut old = new_post("Auto yesterday", "auto-yesterday");
            old.is_auto_generated = true;

            db.insert_post_if_absent(&auto, at(9)).await.unwrap();
            db.insert_post_if_absent(&old, at(9) - Duration::days(1))
                .await
                .unwrap();
            db.insert_post_if_absent(&new_post("Manual", "manual"), at(9))
                .await
                .unwrap();

            let sast = FixedOffset::east_opt(2 * 3600).unwrap();
            assert_eq!(db.count_auto_posts_today(at(12), sast).await.unwrap(), 1);
            // 23:00 UTC is already the next day in Johannesburg
            assert_eq!(db.count_auto_posts_today(at(23), sast).await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_last_auto_post_at() {
            let db = create_test_db().await;
            assert!(db.last_auto_post_at().await.unwrap().is_none());
            assert!(db.last_post_at().await.unwrap().is_none());

            let mut auto = new_post("Auto", "auto");
            auto.is_auto_generated = true;
            db.insert_post_if_absent(&auto, at(7)).await.unwrap();
            db.insert_post_if_absent(&new_post("Manual", "manual"), at(9))
                .await
                .unwrap();

            assert_eq!(db.last_auto_post_at().await.unwrap(), Some(at(7)));
            assert_eq!(db.last_post_at().await.unwrap(), Some(at(9)));
        }
    }
}
