use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::FetchConfig;
use crate::db::{Database, RssFeed};
use crate::ingest::{entry_to_post, sample_articles, FeedSource};
use crate::text::{collapse_whitespace, make_excerpt, strip_tags, text_to_html, truncate_chars};

const ARTICLE_TEXT_MAX: usize = 1500;
/// Scraped text replaces feed content shorter than this.
const SHORT_CONTENT: usize = 300;

static CONTENT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article", "main", ".content", ".article", ".post-content"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Elements whose text is page chrome rather than article body.
const NOISE_ELEMENTS: &[&str] = &["script", "style", "nav", "footer", "header", "noscript"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStatus {
    pub refreshing: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_count: usize,
}

pub struct Fetcher {
    client: Client,
    db: Arc<Database>,
    settings: FetchConfig,
    refreshing: Arc<RwLock<bool>>,
    last_run: RwLock<Option<(DateTime<Utc>, usize)>>,
}

impl Fetcher {
    pub fn new(db: Arc<Database>, settings: FetchConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout))
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            db,
            settings,
            refreshing: Arc::new(RwLock::new(false)),
            last_run: RwLock::new(None),
        })
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    pub async fn status(&self) -> FetchStatus {
        let last = *self.last_run.read().await;
        FetchStatus {
            refreshing: self.is_refreshing().await,
            last_run: last.map(|(at, _)| at),
            last_count: last.map(|(_, count)| count).unwrap_or(0),
        }
    }

    async fn get_body(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<feed_rs::model::Feed, FetchError> {
        let bytes = self.get_body(url).await?;
        parser::parse(&bytes[..]).map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// Main text of an article page, without navigation and page chrome.
    pub async fn fetch_article_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.get_body(url).await?;
        Ok(extract_article_text(&String::from_utf8_lossy(&bytes)))
    }

    /// Fetch one feed and store up to `limit` of its entries.
    /// Returns `(entries_seen, inserted)`.
    pub async fn import_feed(
        &self,
        feed: &RssFeed,
        limit: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(usize, usize)> {
        self.import_feed_marked(feed, limit, now, false).await
    }

    /// Like `import_feed`, flagging stored posts as produced by the auto-poster.
    pub async fn import_feed_marked(
        &self,
        feed: &RssFeed,
        limit: usize,
        now: DateTime<Utc>,
        auto_generated: bool,
    ) -> anyhow::Result<(usize, usize)> {
        info!("Fetching feed: {} ({})", feed.name, feed.url);
        let parsed = self.fetch_feed(&feed.url).await?;

        let source = FeedSource {
            name: feed.name.clone(),
            category_slug: feed
                .category_slug
                .clone()
                .unwrap_or_else(|| "news".to_string()),
            category_id: feed.category_id,
        };

        let mut seen = 0;
        let mut inserted = 0;
        for entry in parsed.entries.iter().take(limit) {
            seen += 1;
            let Some(mut post) = entry_to_post(entry, &source, &self.settings, now) else {
                debug!("Skipping entry without a usable title in '{}'", feed.name);
                continue;
            };
            post.is_auto_generated = auto_generated;

            let current_len = strip_tags(&post.content).chars().count();
            if self.settings.fetch_full_article && current_len < SHORT_CONTENT {
                if self.db.slug_exists(&post.slug).await? {
                    continue;
                }
                if let Some(url) = post.source_url.clone() {
                    match self.fetch_article_text(&url).await {
                        Ok(text) if text.chars().count() > current_len => {
                            post.excerpt =
                                Some(make_excerpt(&text, self.settings.excerpt_max_length));
                            post.content = text_to_html(&text);
                        }
                        Ok(_) => {}
                        Err(e) => debug!("Could not scrape {}: {}", url, e),
                    }
                }
            }

            match self.db.insert_post_if_absent(&post, now).await {
                Ok(Some(_)) => {
                    debug!("Saved: {}", post.title);
                    inserted += 1;
                }
                Ok(None) => debug!("Already stored: {}", post.title),
                Err(e) => warn!("Failed to store '{}': {}", post.title, e),
            }
        }

        info!("Added {} new posts from '{}'", inserted, feed.name);
        Ok((seen, inserted))
    }

    /// Insert the built-in sample articles. Already stored samples are skipped.
    pub async fn insert_samples(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut inserted = 0;
        for mut sample in sample_articles(now, &self.settings) {
            sample.post.category_id = self
                .db
                .get_category_by_slug(sample.category)
                .await?
                .map(|c| c.id);
            if self.db.insert_post_if_absent(&sample.post, now).await?.is_some() {
                inserted += 1;
            }
        }
        info!("Inserted {} sample articles", inserted);
        Ok(inserted)
    }

    /// Refresh every active feed. Returns the number of new posts, or 0 when
    /// another refresh is already running.
    pub async fn refresh_all_feeds(&self) -> anyhow::Result<usize> {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return Ok(0);
            }
            *refreshing = true;
        }

        let result = self.do_refresh_all(Utc::now()).await;

        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        result
    }

    async fn do_refresh_all(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let feeds = self.db.get_active_feeds().await?;
        info!("Refreshing {} feeds", feeds.len());

        let mut total_seen = 0;
        let mut total_inserted = 0;
        for feed in feeds {
            let remaining = self
                .settings
                .max_articles_per_run
                .saturating_sub(total_inserted);
            if remaining == 0 {
                info!("Reached {} new posts, stopping run", total_inserted);
                break;
            }
            let limit = self.settings.max_entries_per_feed.min(remaining);

            match self.import_feed(&feed, limit, now).await {
                Ok((seen, inserted)) => {
                    total_seen += seen;
                    total_inserted += inserted;
                    let _ = self.db.update_feed_fetched(feed.id, now, None).await;
                }
                Err(e) => {
                    error!("Failed to refresh feed '{}': {}", feed.name, e);
                    let _ = self
                        .db
                        .update_feed_fetched(feed.id, now, Some(&e.to_string()))
                        .await;
                }
            }
        }

        if total_seen == 0 && self.settings.sample_fallback {
            info!("No entries from any feed, using sample articles");
            total_inserted += self.insert_samples(now).await?;
        }

        *self.last_run.write().await = Some((now, total_inserted));
        info!("Feed refresh complete: {} new posts", total_inserted);
        Ok(total_inserted)
    }
}

/// Text of the main content container of a page, or of the body when the
/// page has no recognizable container.
pub fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let container = CONTENT_SELECTORS
        .iter()
        .find_map(|selector| document.select(selector).next())
        .or_else(|| document.select(&BODY_SELECTOR).next());

    let Some(container) = container else {
        return String::new();
    };

    let mut text = String::new();
    for node in container.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let is_noise = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map_or(false, |element| NOISE_ELEMENTS.contains(&element.name()))
        });
        if !is_noise {
            text.push_str(fragment);
            text.push(' ');
        }
    }

    truncate_chars(&collapse_whitespace(&text), ARTICLE_TEXT_MAX)
}
