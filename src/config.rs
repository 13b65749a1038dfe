use anyhow::Context;
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub autopost: AutoPostConfig,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    pub posts_per_page: i64,
    pub contact_email: String,
    pub contact_phone: String,
    pub address: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "Mzansi Insights".to_string(),
            description: "South African News & Updates - Aggregated from Trusted Sources"
                .to_string(),
            url: "http://localhost:5000".to_string(),
            posts_per_page: 12,
            contact_email: "editor@mzansi-insights.local".to_string(),
            contact_phone: String::new(),
            address: "Johannesburg, South Africa".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub database_url: String,
    pub secret_key: String,
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            database_url: "sqlite:data/posts.db?mode=rwc".to_string(),
            secret_key: "dev-key-please-change-in-production".to_string(),
            static_dir: "static".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin123".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    /// Refresh interval in minutes
    pub refresh_interval: u64,
    /// Request timeout in seconds
    pub request_timeout: u64,
    pub user_agent: String,
    pub max_entries_per_feed: usize,
    pub max_articles_per_run: usize,
    pub content_max_length: usize,
    pub excerpt_max_length: usize,
    /// Scrape the article page when a feed only carries a short summary
    pub fetch_full_article: bool,
    pub sample_fallback: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            request_timeout: 15,
            user_agent: "Mozilla/5.0 (compatible; MzansiInsights/1.0; +RSS aggregator)"
                .to_string(),
            max_entries_per_feed: 10,
            max_articles_per_run: 40,
            content_max_length: 2000,
            excerpt_max_length: 250,
            fetch_full_article: false,
            sample_fallback: true,
        }
    }
}

fn default_refresh_interval() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AutoPostConfig {
    pub enabled: bool,
    /// Local time of day, "HH:MM"
    pub time: String,
    /// Offset of local time from UTC in hours (SAST is +2)
    pub utc_offset_hours: i32,
    pub posts_per_category: usize,
    pub max_posts_per_day: i64,
    pub min_interval_hours: i64,
    pub rss: bool,
    pub generation: bool,
    pub categories: Vec<String>,
}

impl Default for AutoPostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time: "09:00".to_string(),
            utc_offset_hours: 2,
            posts_per_category: 1,
            max_posts_per_day: 3,
            min_interval_hours: 4,
            rss: true,
            generation: true,
            categories: vec![
                "grants".to_string(),
                "jobs".to_string(),
                "entertainment".to_string(),
            ],
        }
    }
}

impl AutoPostConfig {
    /// The local time zone the daily schedule and cap are reckoned in.
    pub fn local_offset(&self) -> anyhow::Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .with_context(|| format!("invalid UTC offset {}", self.utc_offset_hours))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CategoryConfig {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
}

fn category(name: &str, slug: &str, description: &str, icon: &str, color: &str) -> CategoryConfig {
    CategoryConfig {
        name: name.to_string(),
        slug: slug.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        color: color.to_string(),
    }
}

pub fn default_categories() -> Vec<CategoryConfig> {
    vec![
        category("News", "news", "Breaking news and current events", "newspaper", "#4361ee"),
        category("Business", "business", "Business and economic news", "chart-line", "#7209b7"),
        category("Technology", "technology", "Tech news and innovation", "laptop-code", "#3498db"),
        category("Sports", "sports", "Sports news and updates", "running", "#2ecc71"),
        category("Entertainment", "entertainment", "Entertainment news", "film", "#ef476f"),
        category("Jobs", "jobs", "Employment opportunities", "briefcase", "#06d6a0"),
        category("Grants", "grants", "Grants and SASSA information", "hand-holding-usd", "#ff9e00"),
        category("Government", "government", "Government updates", "landmark", "#2c3e50"),
        category("Health", "health", "Health and wellness", "heartbeat", "#e74c3c"),
        category("Education", "education", "Education news", "graduation-cap", "#9b59b6"),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    /// Category slug the feed's articles are filed under
    #[serde(default = "default_feed_category")]
    pub category: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_feed_category() -> String {
    "news".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            server: ServerConfig::default(),
            admin: AdminConfig::default(),
            fetch: FetchConfig::default(),
            autopost: AutoPostConfig::default(),
            categories: default_categories(),
            feeds: Vec::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.server.database_url = url;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind = format!("{}:{}", host, port);
        }
        if let Some(username) = lookup("ADMIN_USERNAME") {
            self.admin.username = username;
        }
        if let Some(password) = lookup("ADMIN_PASSWORD") {
            self.admin.password = password;
        }
        if let Some(secret) = lookup("SECRET_KEY") {
            self.server.secret_key = secret;
        }
        if let Some(minutes) = lookup("NEWS_REFRESH_MINUTES").and_then(|m| m.parse::<u64>().ok())
        {
            self.fetch.refresh_interval = minutes;
        }
    }
}
