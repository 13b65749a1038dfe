use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AutoPostConfig;
use crate::db::Database;
use crate::fetcher::Fetcher;
use crate::generator::ContentGenerator;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CategoryOutcome {
    pub category: String,
    pub imported: usize,
    pub generated: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AutoPostReport {
    pub inserted: usize,
    /// Why the run did nothing, when a guard stopped it.
    pub skipped: Option<String>,
    pub categories: Vec<CategoryOutcome>,
}

impl AutoPostReport {
    fn skipped(reason: String) -> Self {
        info!("Auto-post skipped: {}", reason);
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

impl fmt::Display for AutoPostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.skipped {
            return write!(f, "Auto-post skipped: {}", reason);
        }
        write!(f, "Auto-post created {} posts", self.inserted)?;
        for outcome in &self.categories {
            write!(
                f,
                "; {}: {} imported, {} generated",
                outcome.category, outcome.imported, outcome.generated
            )?;
        }
        Ok(())
    }
}

pub struct AutoPoster {
    db: Arc<Database>,
    fetcher: Arc<Fetcher>,
    generator: ContentGenerator,
    settings: AutoPostConfig,
}

impl AutoPoster {
    pub fn new(db: Arc<Database>, fetcher: Arc<Fetcher>, settings: AutoPostConfig) -> Self {
        Self {
            db,
            fetcher,
            generator: ContentGenerator,
            settings,
        }
    }

    pub fn settings(&self) -> &AutoPostConfig {
        &self.settings
    }

    /// One auto-post pass. Imports from each category's feeds first and
    /// generates an article only for categories that got nothing.
    pub async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<AutoPostReport> {
        if !self.settings.enabled {
            return Ok(AutoPostReport::skipped("auto-posting is disabled".to_string()));
        }

        let offset = self.settings.local_offset()?;
        let today = self.db.count_auto_posts_today(now, offset).await?;
        if today >= self.settings.max_posts_per_day {
            return Ok(AutoPostReport::skipped(format!(
                "daily limit of {} posts reached",
                self.settings.max_posts_per_day
            )));
        }

        if let Some(last) = self.db.last_auto_post_at().await? {
            if now - last < Duration::hours(self.settings.min_interval_hours) {
                return Ok(AutoPostReport::skipped(format!(
                    "last auto post was less than {} hours ago",
                    self.settings.min_interval_hours
                )));
            }
        }

        let mut budget = (self.settings.max_posts_per_day - today) as usize;
        let mut report = AutoPostReport::default();

        for category in &self.settings.categories {
            if budget == 0 {
                info!("Daily auto-post budget used up");
                break;
            }
            let outcome = self.run_category(category, &mut budget, now).await?;
            report.inserted += outcome.imported + outcome.generated;
            report.categories.push(outcome);
        }

        info!("{}", report);
        Ok(report)
    }

    async fn run_category(
        &self,
        category: &str,
        budget: &mut usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CategoryOutcome> {
        let mut outcome = CategoryOutcome {
            category: category.to_string(),
            ..CategoryOutcome::default()
        };

        if self.settings.rss {
            for feed in self.db.get_active_feeds_for_category(category).await? {
                let wanted = self.settings.posts_per_category.saturating_sub(outcome.imported);
                let limit = wanted.min(*budget);
                if limit == 0 {
                    break;
                }
                match self.fetcher.import_feed_marked(&feed, limit, now, true).await {
                    Ok((_, inserted)) => {
                        outcome.imported += inserted;
                        *budget -= inserted;
                        let _ = self.db.update_feed_fetched(feed.id, now, None).await;
                    }
                    Err(e) => {
                        warn!("Auto-post import from '{}' failed: {}", feed.name, e);
                        let _ = self
                            .db
                            .update_feed_fetched(feed.id, now, Some(&e.to_string()))
                            .await;
                        outcome.errors.push(format!("{}: {}", feed.name, e));
                    }
                }
            }
        }

        if outcome.imported == 0 && self.settings.generation && *budget > 0 {
            let article = {
                let mut rng = rand::thread_rng();
                self.generator.generate(category, &mut rng)
            };
            let category_id = self
                .db
                .get_category_by_slug(&article.category)
                .await?
                .map(|c| c.id);
            let title = article.title.clone();
            match self
                .db
                .insert_post_if_absent(&article.into_new_post(category_id), now)
                .await
            {
                Ok(Some(_)) => {
                    info!("Generated '{}' for {}", title, category);
                    outcome.generated += 1;
                    *budget -= 1;
                }
                Ok(None) => info!("Generated article for {} already exists", category),
                Err(e) => {
                    warn!("Failed to store generated article for {}: {}", category, e);
                    outcome.errors.push(e.to_string());
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeedConfig, FetchConfig};
    use crate::db::{test_support::create_seeded_db, PostFilter};
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    async fn poster(settings: AutoPostConfig, feeds: Vec<FeedConfig>) -> (Arc<Database>, AutoPoster) {
        let db = create_seeded_db().await;
        db.sync_feeds(&feeds).await.unwrap();
        let db = Arc::new(db);
        let fetcher = Arc::new(Fetcher::new(db.clone(), FetchConfig::default()).unwrap());
        (db.clone(), AutoPoster::new(db, fetcher, settings))
    }

    fn generation_only() -> AutoPostConfig {
        AutoPostConfig {
            rss: false,
            ..AutoPostConfig::default()
        }
    }

    mod guard_tests {
        use super::*;

        #[tokio::test]
        async fn test_disabled_does_nothing() {
            let settings = AutoPostConfig {
                enabled: false,
                ..AutoPostConfig::default()
            };
            let (db, poster) = poster(settings, vec![]).await;

            let report = poster.run(at(10, 9)).await.unwrap();
            assert_eq!(report.inserted, 0);
            assert!(report.skipped.is_some());
            assert_eq!(db.count_posts(PostFilter::All).await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_daily_cap() {
            let settings = AutoPostConfig {
                max_posts_per_day: 2,
                ..generation_only()
            };
            let (db, poster) = poster(settings, vec![]).await;

            let report = poster.run(at(10, 9)).await.unwrap();
            assert_eq!(report.inserted, 2);
            assert_eq!(report.categories.len(), 2);

            let report = poster.run(at(10, 20)).await.unwrap();
            assert_eq!(report.inserted, 0);
            assert!(report.skipped.unwrap().contains("daily limit"));
            let offset = generation_only().local_offset().unwrap();
            assert_eq!(db.count_auto_posts_today(at(10, 21), offset).await.unwrap(), 2);
        }

        #[tokio::test]
        async fn test_daily_cap_resets_at_local_midnight() {
            let settings = AutoPostConfig {
                max_posts_per_day: 1,
                min_interval_hours: 1,
                ..generation_only()
            };
            let (_db, poster) = poster(settings, vec![]).await;

            // 23:00 SAST on the 10th
            let report = poster.run(at(10, 21)).await.unwrap();
            assert_eq!(report.inserted, 1);

            // 01:00 SAST on the 11th, same UTC date
            let report = poster.run(at(10, 23)).await.unwrap();
            assert!(report.skipped.is_none(), "{:?}", report.skipped);
            assert_eq!(report.inserted, 1);
        }

        #[tokio::test]
        async fn test_min_interval() {
            let settings = AutoPostConfig {
                max_posts_per_day: 10,
                ..generation_only()
            };
            let (_db, poster) = poster(settings, vec![]).await;

            assert_eq!(poster.run(at(10, 6)).await.unwrap().inserted, 3);

            let report = poster.run(at(10, 8)).await.unwrap();
            assert!(report.skipped.unwrap().contains("hours ago"));

            let report = poster.run(at(10, 10)).await.unwrap();
            assert!(report.skipped.is_none());
        }

        #[tokio::test]
        async fn test_next_day_allowed() {
            let (_db, poster) = poster(generation_only(), vec![]).await;

            assert_eq!(poster.run(at(10, 9)).await.unwrap().inserted, 3);
            assert!(poster.run(at(10, 15)).await.unwrap().skipped.is_some());
            assert!(poster.run(at(11, 9)).await.unwrap().skipped.is_none());
        }
    }

    mod source_tests {
        use super::*;

        const JOBS_RSS: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel>
            <title>Jobs</title><link>https://jobs.example</link><description>d</description>
            <item><title>Mining company hiring engineers</title>
            <link>https://jobs.example/1</link>
            <description>A major mining company in Limpopo is hiring engineers and artisans for a new platinum project, with applications closing at the end of the month.</description></item>
            <item><title>Retailer opens graduate programme</title>
            <link>https://jobs.example/2</link>
            <description>A national retailer has opened applications for its graduate programme, offering placements in logistics, finance and marketing across the country.</description></item>
            </channel></rss>"#;

        fn jobs_feed(url: String) -> FeedConfig {
            FeedConfig {
                name: "Jobs Feed".to_string(),
                url,
                category: "jobs".to_string(),
                active: true,
            }
        }

        #[tokio::test]
        async fn test_generation_fills_every_category() {
            let (db, poster) = poster(generation_only(), vec![]).await;

            let report = poster.run(at(10, 9)).await.unwrap();

            assert_eq!(report.inserted, 3);
            assert!(report.categories.iter().all(|c| c.generated == 1));
            let posts = db.list_posts(PostFilter::All, 10, 0).await.unwrap();
            assert!(posts.iter().all(|p| p.is_auto_generated));
            assert!(posts.iter().all(|p| p.author == "Auto Content Generator"));

            let mut slugs: Vec<_> = posts.iter().filter_map(|p| p.category_slug.clone()).collect();
            slugs.sort();
            assert_eq!(slugs, vec!["entertainment", "grants", "jobs"]);
        }

        #[tokio::test]
        async fn test_rss_preferred_over_generation() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/jobs"))
                .respond_with(ResponseTemplate::new(200).set_body_string(JOBS_RSS))
                .mount(&server)
                .await;
            let (db, poster) = poster(
                AutoPostConfig::default(),
                vec![jobs_feed(format!("{}/jobs", server.uri()))],
            )
            .await;

            let report = poster.run(at(10, 9)).await.unwrap();

            let jobs = report.categories.iter().find(|c| c.category == "jobs").unwrap();
            assert_eq!(jobs.imported, 1);
            assert_eq!(jobs.generated, 0);
            assert_eq!(report.inserted, 3);

            let imported = db
                .list_posts(PostFilter::All, 10, 0)
                .await
                .unwrap()
                .into_iter()
                .find(|p| p.source_name.as_deref() == Some("Jobs Feed"))
                .unwrap();
            assert!(imported.is_auto_generated);
        }

        #[tokio::test]
        async fn test_failed_feed_falls_back_to_generation() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;
            let (db, poster) = poster(
                AutoPostConfig::default(),
                vec![jobs_feed(format!("{}/jobs", server.uri()))],
            )
            .await;

            let report = poster.run(at(10, 9)).await.unwrap();

            let jobs = report.categories.iter().find(|c| c.category == "jobs").unwrap();
            assert_eq!(jobs.imported, 0);
            assert_eq!(jobs.generated, 1);
            assert_eq!(jobs.errors.len(), 1);

            let feed = db.get_all_feeds().await.unwrap().remove(0);
            assert!(feed.last_error.is_some());
        }

        #[test]
        fn test_report_display() {
            let report = AutoPostReport {
                inserted: 1,
                skipped: None,
                categories: vec![CategoryOutcome {
                    category: "jobs".to_string(),
                    imported: 1,
                    generated: 0,
                    errors: vec![],
                }],
            };
            assert_eq!(
                report.to_string(),
                "Auto-post created 1 posts; jobs: 1 imported, 0 generated"
            );

            let skipped = AutoPostReport::skipped("daily limit of 3 posts reached".to_string());
            assert_eq!(
                skipped.to_string(),
                "Auto-post skipped: daily limit of 3 posts reached"
            );
        }
    }
}
