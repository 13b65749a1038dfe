use std::sync::Arc;

use askama::Template;
use axum::{
    http::{header::SET_COOKIE, StatusCode},
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::{clear_cookie, Flash, SessionKeys, FLASH_COOKIE};
use crate::autopost::AutoPoster;
use crate::config::{Config, SiteConfig};
use crate::db::{Category, Database, Post};
use crate::fetcher::Fetcher;
use crate::text::{clean_html, format_date, make_excerpt, reading_time, time_ago};

pub mod admin;
pub mod api;
pub mod pages;
pub mod public;

const CARD_EXCERPT_LENGTH: usize = 200;

pub struct AppState {
    pub db: Arc<Database>,
    pub fetcher: Arc<Fetcher>,
    pub poster: Arc<AutoPoster>,
    pub config: Arc<Config>,
    pub sessions: SessionKeys,
}

pub fn app(state: Arc<AppState>) -> Router {
    let static_dir = state.config.server.static_dir.clone();

    Router::new()
        .route("/", get(public::index))
        .route("/post/:slug", get(public::post_detail))
        .route("/category/:slug", get(public::category))
        .route("/search", get(public::search))
        .route("/about", get(pages::about))
        .route("/contact", get(pages::contact))
        .route("/privacy", get(pages::privacy))
        .route("/terms", get(pages::terms))
        .route("/admin", get(admin::index))
        .route("/admin/login", get(admin::login_form).post(admin::login))
        .route("/admin/logout", get(admin::logout))
        .route("/admin/dashboard", get(admin::dashboard))
        .route("/admin/run-auto-post", post(admin::run_auto_post))
        .route("/admin/refresh", post(admin::refresh))
        .route("/admin/posts/new", get(admin::new_post_form).post(admin::create_post))
        .route("/admin/posts/:id/edit", get(admin::edit_post_form).post(admin::update_post))
        .route("/admin/posts/:id/delete", post(admin::delete_post))
        .route("/admin/posts/:id/toggle", post(admin::toggle_post))
        .route("/admin/categories", get(admin::categories).post(admin::create_category))
        .route("/admin/categories/:id/delete", post(admin::delete_category))
        .route("/admin/feeds", get(admin::feeds).post(admin::create_feed))
        .route("/admin/feeds/:id/toggle", post(admin::toggle_feed))
        .route("/admin/feeds/:id/delete", post(admin::delete_feed))
        .route("/health", get(api::health))
        .route("/api/stats", get(api::stats))
        .nest_service("/static", ServeDir::new(static_dir))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound
}

// Wrapper for HTML responses
pub struct HtmlTemplate<T>(pub T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

#[derive(Template)]
#[template(path = "404.html")]
pub struct NotFoundTemplate;

pub enum AppError {
    NotFound,
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => {
                (StatusCode::NOT_FOUND, HtmlTemplate(NotFoundTemplate)).into_response()
            }
            AppError::Internal(err) => {
                error!("Request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error: {}", err),
                )
                    .into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}

/// Shared chrome for public pages.
pub struct Layout {
    pub site: SiteConfig,
    pub nav: Vec<Category>,
    pub year: i32,
}

impl Layout {
    pub async fn load(state: &AppState) -> anyhow::Result<Self> {
        Ok(Self {
            site: state.config.site.clone(),
            nav: state.db.get_categories().await?,
            year: Utc::now().year(),
        })
    }
}

/// A post prepared for display.
pub struct PostView {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub content: String,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub source_name: Option<String>,
    pub category_id: Option<i64>,
    pub category_name: String,
    pub category_slug: Option<String>,
    pub category_color: String,
    pub author: String,
    pub tags: Vec<String>,
    pub date: String,
    pub ago: String,
    pub views: i64,
    pub reading_time: usize,
    pub is_published: bool,
    pub is_auto_generated: bool,
}

impl PostView {
    pub fn new(post: Post, now: DateTime<Utc>) -> Self {
        let tags = post.tag_list().into_iter().map(str::to_string).collect();
        let date = format_date(post.display_date());
        let ago = time_ago(post.display_date(), now);
        let excerpt = match post.excerpt {
            Some(excerpt) if !excerpt.trim().is_empty() => excerpt,
            _ => make_excerpt(&clean_html(&post.content, 1000), CARD_EXCERPT_LENGTH),
        };

        Self {
            id: post.id,
            reading_time: reading_time(&post.content),
            title: post.title,
            slug: post.slug,
            excerpt,
            content: post.content,
            image_url: post.image_url.filter(|url| !url.is_empty()),
            source_url: post.source_url,
            source_name: post.source_name,
            category_id: post.category_id,
            category_name: post.category_name.unwrap_or_else(|| "Uncategorized".to_string()),
            category_slug: post.category_slug,
            category_color: post.category_color.unwrap_or_else(|| "#4361ee".to_string()),
            author: post.author,
            tags,
            date,
            ago,
            views: post.views,
            is_published: post.is_published,
            is_auto_generated: post.is_auto_generated,
        }
    }

    pub fn many(posts: Vec<Post>, now: DateTime<Utc>) -> Vec<Self> {
        posts.into_iter().map(|post| PostView::new(post, now)).collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "first_page")]
    pub page: i64,
}

fn first_page() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    pub page: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, total: i64, per_page: i64) -> Self {
        let per_page = per_page.max(1);
        let total_pages = ((total + per_page - 1) / per_page).max(1);
        Self {
            page: page.clamp(1, total_pages),
            total_pages,
        }
    }

    pub fn offset(&self, per_page: i64) -> i64 {
        (self.page - 1) * per_page.max(1)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn prev(&self) -> i64 {
        self.page - 1
    }

    pub fn next(&self) -> i64 {
        self.page + 1
    }
}

/// Render a page and drop the flash cookie it displayed.
pub fn render_flashed<T: Template>(template: T, shown: bool) -> Response {
    if shown {
        (
            AppendHeaders([(SET_COOKIE, clear_cookie(FLASH_COOKIE))]),
            HtmlTemplate(template),
        )
            .into_response()
    } else {
        HtmlTemplate(template).into_response()
    }
}

pub fn redirect_with_flash(to: &str, flash: Flash) -> Response {
    (
        AppendHeaders([(SET_COOKIE, flash.to_cookie())]),
        Redirect::to(to),
    )
        .into_response()
}
