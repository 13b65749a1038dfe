//! Turning parsed feed entries (and the built-in samples) into posts.

use chrono::{DateTime, Duration, Utc};
use feed_rs::model::Entry;

use crate::config::FetchConfig;
use crate::db::NewPost;
use crate::text::{
    clean_html, collapse_whitespace, extract_tags, first_image_src, make_excerpt, source_slug,
    text_to_html,
};

const MIN_TITLE_LEN: usize = 10;
const MIN_CANDIDATE_LEN: usize = 50;
const MIN_CONTENT_LEN: usize = 100;
const MAX_TAGS: usize = 5;
const UNKNOWN_AUTHOR: &str = "Unknown";
const SAMPLE_AUTHOR: &str = "Mzansi Insights";

/// Where an entry came from: the feed's display name and its category.
#[derive(Debug, Clone)]
pub struct FeedSource {
    pub name: String,
    pub category_slug: String,
    pub category_id: Option<i64>,
}

/// Stock image shown when an article carries none of its own.
pub fn category_fallback_image(category_slug: &str) -> &'static str {
    match category_slug {
        "business" => "https://images.unsplash.com/photo-1497366754035-f200968a6e72?w=800&auto=format&fit=crop",
        "technology" => "https://images.unsplash.com/photo-1519389950473-47ba0277781c?w=800&auto=format&fit=crop",
        "sports" => "https://images.unsplash.com/photo-1546519638-68e109498ffc?w=800&auto=format&fit=crop",
        "entertainment" => "https://images.unsplash.com/photo-1493225457124-a3eb161ffa5f?w=800&auto=format&fit=crop",
        "jobs" => "https://images.unsplash.com/photo-1521791136064-7986c2920216?w=800&auto=format&fit=crop",
        "grants" => "https://images.unsplash.com/photo-1554224155-6726b3ff858f?w=800&auto=format&fit=crop",
        "health" => "https://images.unsplash.com/photo-1576091160399-112ba8d25d1f?w=800&auto=format&fit=crop",
        "education" => "https://images.unsplash.com/photo-1523050854058-8df90110c9f1?w=800&auto=format&fit=crop",
        "government" => "https://images.unsplash.com/photo-1551135049-8a33b2fb2f5a?w=800&auto=format&fit=crop",
        _ => "https://images.unsplash.com/photo-1588681664899-f142ff2dc9b1?w=800&auto=format&fit=crop",
    }
}

fn entry_title(entry: &Entry) -> Option<String> {
    let raw = entry.title.as_ref()?.content.as_str();
    let title = collapse_whitespace(&html_escape::decode_html_entities(raw));
    (title.chars().count() >= MIN_TITLE_LEN).then_some(title)
}

/// Raw body of the entry: full content, then summary, then the title.
/// The first candidate with more than a few words of text wins.
fn entry_body(entry: &Entry, title: &str) -> String {
    let candidates = [
        entry.content.as_ref().and_then(|c| c.body.as_deref()),
        entry.summary.as_ref().map(|s| s.content.as_str()),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|body| body.trim().chars().count() > MIN_CANDIDATE_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| title.to_string())
}

fn entry_image(entry: &Entry, raw_body: &str) -> Option<String> {
    let media_image = entry
        .media
        .iter()
        .flat_map(|media| media.content.iter())
        .find(|content| {
            content
                .content_type
                .as_ref()
                .map_or(false, |mime| mime.to_string().starts_with("image/"))
        })
        .and_then(|content| content.url.as_ref())
        .map(|url| url.to_string());

    media_image
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|media| media.thumbnails.iter())
                .next()
                .map(|thumbnail| thumbnail.image.uri.clone())
        })
        .or_else(|| first_image_src(raw_body))
}

/// Build the post body shared by feed entries and samples.
fn finish_post(
    title: String,
    raw_body: &str,
    source: &FeedSource,
    settings: &FetchConfig,
) -> NewPost {
    let mut content = clean_html(raw_body, settings.content_max_length);
    if content.chars().count() < MIN_CONTENT_LEN {
        content = format!("{}. Read more on the source website.", title);
    }

    let excerpt = make_excerpt(&content, settings.excerpt_max_length);
    let mut tags = extract_tags(&format!("{} {}", title, content), MAX_TAGS);
    if !tags.contains(&source.category_slug) {
        tags.push(source.category_slug.clone());
    }

    let mut post = NewPost::new(
        &title,
        &source_slug(&title, &source.name),
        &text_to_html(&content),
    );
    post.excerpt = Some(excerpt);
    post.source_name = Some(source.name.clone());
    post.category_id = source.category_id;
    post.tags = tags;
    post
}

/// Convert one feed entry. Returns None for entries without a usable title.
pub fn entry_to_post(
    entry: &Entry,
    source: &FeedSource,
    settings: &FetchConfig,
    now: DateTime<Utc>,
) -> Option<NewPost> {
    let title = entry_title(entry)?;
    let raw_body = entry_body(entry, &title);

    let image = entry_image(entry, &raw_body)
        .unwrap_or_else(|| category_fallback_image(&source.category_slug).to_string());
    let author = entry
        .authors
        .first()
        .map(|person| person.name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string();
    let published = entry
        .published
        .or(entry.updated)
        .unwrap_or(now);

    let mut post = finish_post(title, &raw_body, source, settings);
    post.image_url = Some(image);
    post.source_url = entry.links.first().map(|link| link.href.clone());
    post.author = author;
    post.published_at = Some(published);
    Some(post)
}

/// A built-in article filed under a category slug.
#[derive(Debug, Clone)]
pub struct SampleArticle {
    pub category: &'static str,
    pub post: NewPost,
}

const SAMPLES: &[(&str, &str, &str, &str)] = &[
    (
        "South African Economy Shows Signs of Recovery",
        "The South African economy is showing positive signs of recovery with GDP growth exceeding expectations. Key sectors including mining, manufacturing, and tourism are driving this growth.",
        "business",
        "Mzansi Insights Analysis",
    ),
    (
        "New Job Opportunities in Tech Sector",
        "The technology sector in South Africa is booming, creating thousands of new job opportunities. Companies are seeking skilled professionals in software development, data science, and cybersecurity.",
        "jobs",
        "Mzansi Insights Report",
    ),
    (
        "Government Announces New Grant Programs",
        "The South African government has announced new grant programs to support small businesses and vulnerable households. Applications open next month.",
        "grants",
        "Mzansi Insights Update",
    ),
    (
        "Local Sports Team Wins Championship",
        "A local sports team has brought home the championship trophy after an exciting season. The victory has brought the community together in celebration.",
        "sports",
        "Mzansi Insights Sports",
    ),
    (
        "Tech Innovation Hub Opens in Johannesburg",
        "A new technology innovation hub has opened in Johannesburg, providing resources and support for tech startups and entrepreneurs.",
        "technology",
        "Mzansi Insights Tech",
    ),
    (
        "Entertainment Industry Thrives Post-Pandemic",
        "The South African entertainment industry is experiencing a strong comeback with new film productions, music festivals, and cultural events.",
        "entertainment",
        "Mzansi Insights Entertainment",
    ),
    (
        "Healthcare Initiatives Improve Access",
        "New healthcare initiatives are improving access to medical services in rural areas across South Africa.",
        "health",
        "Mzansi Insights Health",
    ),
    (
        "Education Reforms Announced",
        "The Department of Education has announced new reforms aimed at improving the quality of education across all levels.",
        "education",
        "Mzansi Insights Education",
    ),
];

const SAMPLE_FOOTER: &str = " This is sample content to demonstrate the Mzansi Insights platform. \
In a production environment, this would be replaced with real news articles from trusted South African sources.";

/// Sample articles used when no feed returns anything. Slugs are stable across
/// calls, so inserting them twice is a no-op. Category ids are left for the
/// caller to resolve.
pub fn sample_articles(now: DateTime<Utc>, settings: &FetchConfig) -> Vec<SampleArticle> {
    SAMPLES
        .iter()
        .enumerate()
        .map(|(i, (title, body, category, source_name))| {
            let source = FeedSource {
                name: source_name.to_string(),
                category_slug: category.to_string(),
                category_id: None,
            };
            let raw_body = format!("{}{}", body, SAMPLE_FOOTER);
            let mut post = finish_post(title.to_string(), &raw_body, &source, settings);
            post.author = SAMPLE_AUTHOR.to_string();
            post.image_url = Some(category_fallback_image(category).to_string());
            post.source_url = Some(format!("https://mzansi-insights.local/article/sample-{}", i + 1));
            post.published_at = Some(now - Duration::hours(i as i64 + 1));
            SampleArticle {
                category: *category,
                post,
            }
        })
        .collect()
}
