use super::{Category, CategoryStat, Database};
use crate::config::CategoryConfig;

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

impl Database {
    /// Insert categories that do not exist yet. Existing rows keep any admin edits.
    pub async fn seed_categories(&self, categories: &[CategoryConfig]) -> anyhow::Result<u64> {
        let mut inserted = 0;
        for category in categories {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO categories (name, slug, description, icon, color)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&category.name)
            .bind(&category.slug)
            .bind(non_empty(&category.description))
            .bind(non_empty(&category.icon))
            .bind(non_empty(&category.color))
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    pub async fn get_categories(&self) -> anyhow::Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    pub async fn get_category(&self, category_id: i64) -> anyhow::Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    pub async fn get_category_by_slug(&self, slug: &str) -> anyhow::Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    /// Categories with their published post counts, busiest first.
    pub async fn category_stats(&self) -> anyhow::Result<Vec<CategoryStat>> {
        let stats = sqlx::query_as::<_, CategoryStat>(
            r#"
            SELECT c.id, c.name, c.slug, c.description, c.icon, c.color,
                   COUNT(p.id) AS post_count
            FROM categories c
            LEFT JOIN posts p ON p.category_id = c.id AND p.is_published = 1
            GROUP BY c.id
            ORDER BY post_count DESC, c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }

    /// Returns the new id, or None when the name or slug is already taken.
    pub async fn create_category(&self, category: &CategoryConfig) -> anyhow::Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO categories (name, slug, description, icon, color)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(category.name.trim())
        .bind(category.slug.trim())
        .bind(non_empty(&category.description))
        .bind(non_empty(&category.icon))
        .bind(non_empty(&category.color))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Posts and feeds of a deleted category become uncategorized.
    pub async fn delete_category(&self, category_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{default_categories, CategoryConfig};
    use crate::db::test_support::*;
    use chrono::Utc;

    fn custom(name: &str, slug: &str) -> CategoryConfig {
        CategoryConfig {
            name: name.to_string(),
            slug: slug.to_string(),
            description: String::new(),
            icon: String::new(),
            color: String::new(),
        }
    }

    #[tokio::test]
    async fn test_seed_categories_is_idempotent() {
        let db = create_test_db().await;

        let first = db.seed_categories(&default_categories()).await.unwrap();
        let second = db.seed_categories(&default_categories()).await.unwrap();

        assert_eq!(first, 10);
        assert_eq!(second, 0);
        assert_eq!(db.get_categories().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_get_category_by_slug() {
        let db = create_seeded_db().await;

        let grants = db.get_category_by_slug("grants").await.unwrap().unwrap();
        assert_eq!(grants.name, "Grants");
        assert_eq!(grants.color.as_deref(), Some("#ff9e00"));

        assert!(db.get_category_by_slug("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_category_rejects_duplicates() {
        let db = create_seeded_db().await;

        let id = db.create_category(&custom("Travel", "travel")).await.unwrap();
        assert!(id.is_some());

        let dup_name = db.create_category(&custom("Travel", "trips")).await.unwrap();
        let dup_slug = db.create_category(&custom("Trips", "travel")).await.unwrap();
        assert!(dup_name.is_none());
        assert!(dup_slug.is_none());

        let travel = db.get_category(id.unwrap()).await.unwrap().unwrap();
        assert!(travel.description.is_none());
    }

    #[tokio::test]
    async fn test_category_stats_counts_published_only() {
        let db = create_seeded_db().await;
        let jobs = db.get_category_by_slug("jobs").await.unwrap().unwrap();

        let mut visible = new_post("Visible job post", "visible-job");
        visible.category_id = Some(jobs.id);
        let mut hidden = new_post("Hidden job post", "hidden-job");
        hidden.category_id = Some(jobs.id);
        hidden.is_published = false;
        db.insert_post_if_absent(&visible, Utc::now()).await.unwrap();
        db.insert_post_if_absent(&hidden, Utc::now()).await.unwrap();

        let stats = db.category_stats().await.unwrap();
        assert_eq!(stats.len(), 10);
        assert_eq!(stats[0].slug, "jobs");
        assert_eq!(stats[0].post_count, 1);
        assert!(stats[1..].iter().all(|s| s.post_count == 0));
    }

    #[tokio::test]
    async fn test_delete_category_uncategorizes_posts() {
        let db = create_seeded_db().await;
        let health = db.get_category_by_slug("health").await.unwrap().unwrap();

        let mut post = new_post("Clinic hours extended", "clinic-hours");
        post.category_id = Some(health.id);
        db.insert_post_if_absent(&post, Utc::now()).await.unwrap();

        assert!(db.delete_category(health.id).await.unwrap());
        assert!(!db.delete_category(health.id).await.unwrap());

        let post = db.get_post_by_slug("clinic-hours", false).await.unwrap().unwrap();
        assert!(post.category_id.is_none());
        assert!(post.category_name.is_none());
    }
}
