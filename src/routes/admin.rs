use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    Form,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use super::{redirect_with_flash, render_flashed, AppError, AppState, PostView};
use crate::auth::{clear_cookie, cookie_value, verify_password, AdminUser, Flash, SESSION_COOKIE};
use crate::config::CategoryConfig;
use crate::db::{timestamp, Category, CategoryStat, NewPost, PostFilter, PostUpdate, RssFeed, SiteStats};
use crate::text::{clean_html, first_image_src, make_excerpt, slugify, time_ago};

const RECENT_POSTS: i64 = 20;
const DEFAULT_CATEGORY_COLOR: &str = "#4361ee";
const DEFAULT_CATEGORY_ICON: &str = "folder";

#[derive(Template)]
#[template(path = "admin/login.html")]
pub struct LoginTemplate {
    pub site_name: String,
    pub flash: Option<Flash>,
}

#[derive(Template)]
#[template(path = "admin/dashboard.html")]
pub struct DashboardTemplate {
    pub site_name: String,
    pub username: String,
    pub flash: Option<Flash>,
    pub stats: SiteStats,
    pub recent: Vec<PostView>,
    pub categories: Vec<CategoryStat>,
    pub feed_count: usize,
    pub active_feeds: usize,
    pub refreshing: bool,
    pub last_refresh: String,
    pub last_refresh_count: usize,
    pub automation: bool,
    pub autopost_time: String,
}

/// Values shown in the post editor.
#[derive(Debug, Clone, Default)]
pub struct PostFormValues {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub image_url: String,
    pub category_id: Option<i64>,
    pub tags: String,
    pub is_published: bool,
}

impl PostFormValues {
    pub fn is_category(&self, category: &Category) -> bool {
        self.category_id == Some(category.id)
    }
}

#[derive(Template)]
#[template(path = "admin/post_form.html")]
pub struct PostFormTemplate {
    pub site_name: String,
    pub username: String,
    pub flash: Option<Flash>,
    pub heading: String,
    pub action: String,
    pub form: PostFormValues,
    pub categories: Vec<Category>,
}

#[derive(Template)]
#[template(path = "admin/categories.html")]
pub struct CategoriesTemplate {
    pub site_name: String,
    pub username: String,
    pub flash: Option<Flash>,
    pub categories: Vec<CategoryStat>,
}

#[derive(Template)]
#[template(path = "admin/feeds.html")]
pub struct FeedsTemplate {
    pub site_name: String,
    pub username: String,
    pub flash: Option<Flash>,
    pub feeds: Vec<RssFeed>,
    pub categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PostForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub tags: String,
    pub is_published: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub category_id: String,
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Resolve a submitted category id. An empty field means no category;
/// `None` means the id names no existing category.
async fn submitted_category(state: &AppState, raw: &str) -> anyhow::Result<Option<Option<i64>>> {
    match parse_id(raw) {
        None => Ok(Some(None)),
        Some(id) => Ok(state.db.get_category(id).await?.map(|category| Some(category.id))),
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn index() -> Redirect {
    Redirect::to("/admin/dashboard")
}

pub async fn login_form(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let signed_in = cookie_value(&headers, SESSION_COOKIE)
        .map(|cookie| state.sessions.verify(&cookie, Utc::now()).is_ok())
        .unwrap_or(false);
    if signed_in {
        return Redirect::to("/admin/dashboard").into_response();
    }

    let flash = Flash::from_headers(&headers);
    let shown = flash.is_some();
    render_flashed(
        LoginTemplate {
            site_name: state.config.site.name.clone(),
            flash,
        },
        shown,
    )
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let username = form.username.trim().to_string();
    let user = state.db.get_user_by_username(&username).await?;

    let Some(user) = user else {
        warn!("Login attempt for unknown user '{}'", username);
        return Ok(redirect_with_flash("/admin/login", Flash::error("Invalid username or password")));
    };

    let password = form.password;
    let hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await?
        .unwrap_or(false);
    if !valid {
        warn!("Failed login for '{}'", username);
        return Ok(redirect_with_flash("/admin/login", Flash::error("Invalid username or password")));
    }

    let session = state.sessions.session_cookie(user.id, Utc::now())?;
    info!("Admin '{}' logged in", user.username);
    Ok((
        AppendHeaders([
            (SET_COOKIE, session),
            (SET_COOKIE, Flash::success("Logged in successfully").to_cookie()),
        ]),
        Redirect::to("/admin/dashboard"),
    )
        .into_response())
}

pub async fn logout() -> Response {
    (
        AppendHeaders([
            (SET_COOKIE, clear_cookie(SESSION_COOKIE)),
            (SET_COOKIE, Flash::success("You have been logged out").to_cookie()),
        ]),
        Redirect::to("/admin/login"),
    )
        .into_response()
}

pub async fn dashboard(
    user: AdminUser,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let now = Utc::now();
    let stats = state.db.stats(now).await?;
    let recent = state.db.list_posts(PostFilter::All, RECENT_POSTS, 0).await?;
    let categories = state.db.category_stats().await?;
    let feeds = state.db.get_all_feeds().await?;
    let fetch = state.fetcher.status().await;

    let flash = Flash::from_headers(&headers);
    let shown = flash.is_some();
    Ok(render_flashed(
        DashboardTemplate {
            site_name: state.config.site.name.clone(),
            username: user.username,
            flash,
            stats,
            recent: PostView::many(recent, now),
            categories,
            feed_count: feeds.len(),
            active_feeds: feeds.iter().filter(|f| f.is_active).count(),
            refreshing: fetch.refreshing,
            last_refresh: fetch
                .last_run
                .map(|at| time_ago(&timestamp(at), now))
                .unwrap_or_else(|| "Never".to_string()),
            last_refresh_count: fetch.last_count,
            automation: state.poster.settings().enabled,
            autopost_time: state.poster.settings().time.clone(),
        },
        shown,
    ))
}

pub async fn run_auto_post(_user: AdminUser, State(state): State<Arc<AppState>>) -> Response {
    let flash = match state.poster.run(Utc::now()).await {
        Ok(report) => Flash::success(report.to_string()),
        Err(e) => {
            error!("Manual auto-post failed: {:#}", e);
            Flash::error(format!("Auto-post failed: {}", e))
        }
    };
    redirect_with_flash("/admin/dashboard", flash)
}

pub async fn refresh(_user: AdminUser, State(state): State<Arc<AppState>>) -> Response {
    if state.fetcher.is_refreshing().await {
        return redirect_with_flash(
            "/admin/dashboard",
            Flash::error("A feed refresh is already running"),
        );
    }

    let flash = match state.fetcher.refresh_all_feeds().await {
        Ok(count) => Flash::success(format!("Feed refresh added {} new posts", count)),
        Err(e) => {
            error!("Manual refresh failed: {:#}", e);
            Flash::error(format!("Feed refresh failed: {}", e))
        }
    };
    redirect_with_flash("/admin/dashboard", flash)
}

pub async fn new_post_form(
    user: AdminUser,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let flash = Flash::from_headers(&headers);
    let shown = flash.is_some();
    Ok(render_flashed(
        PostFormTemplate {
            site_name: state.config.site.name.clone(),
            username: user.username,
            flash,
            heading: "New Post".to_string(),
            action: "/admin/posts/new".to_string(),
            form: PostFormValues {
                is_published: true,
                ..PostFormValues::default()
            },
            categories: state.db.get_categories().await?,
        },
        shown,
    ))
}

pub async fn create_post(
    user: AdminUser,
    State(state): State<Arc<AppState>>,
    Form(form): Form<PostForm>,
) -> Result<Response, AppError> {
    let title = form.title.trim();
    let content = form.content.trim();
    if title.is_empty() || content.is_empty() {
        return Ok(redirect_with_flash(
            "/admin/posts/new",
            Flash::error("Title and content are required"),
        ));
    }

    let Some(category_id) = submitted_category(&state, &form.category_id).await? else {
        return Ok(redirect_with_flash("/admin/posts/new", Flash::error("Invalid category")));
    };

    let now = Utc::now();
    let slug = state.db.unique_slug(&slugify(title)).await?;
    let mut post = NewPost::new(title, &slug, content);
    post.excerpt = Some(non_empty(&form.excerpt).unwrap_or_else(|| {
        make_excerpt(
            &clean_html(content, content.len()),
            state.config.fetch.excerpt_max_length,
        )
    }));
    post.image_url = non_empty(&form.image_url).or_else(|| first_image_src(content));
    post.category_id = category_id;
    post.tags = split_tags(&form.tags);
    post.is_published = form.is_published.is_some();
    post.published_at = Some(now);

    match state.db.insert_post_if_absent(&post, now).await? {
        Some(id) => {
            info!("Admin '{}' created post {} '{}'", user.username, id, post.title);
            Ok(redirect_with_flash("/admin/dashboard", Flash::success("Post created successfully")))
        }
        None => Ok(redirect_with_flash(
            "/admin/posts/new",
            Flash::error("A post with that slug already exists"),
        )),
    }
}

pub async fn edit_post_form(
    user: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let post = state.db.get_post(post_id).await?.ok_or(AppError::NotFound)?;

    let flash = Flash::from_headers(&headers);
    let shown = flash.is_some();
    Ok(render_flashed(
        PostFormTemplate {
            site_name: state.config.site.name.clone(),
            username: user.username,
            flash,
            heading: "Edit Post".to_string(),
            action: format!("/admin/posts/{}/edit", post.id),
            form: PostFormValues {
                title: post.title,
                content: post.content,
                excerpt: post.excerpt.unwrap_or_default(),
                image_url: post.image_url.unwrap_or_default(),
                category_id: post.category_id,
                tags: post.tags,
                is_published: post.is_published,
            },
            categories: state.db.get_categories().await?,
        },
        shown,
    ))
}

pub async fn update_post(
    _user: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
    Form(form): Form<PostForm>,
) -> Result<Response, AppError> {
    let edit_url = format!("/admin/posts/{}/edit", post_id);
    let title = form.title.trim();
    let content = form.content.trim();
    if title.is_empty() || content.is_empty() {
        return Ok(redirect_with_flash(&edit_url, Flash::error("Title and content are required")));
    }
    let Some(category_id) = submitted_category(&state, &form.category_id).await? else {
        return Ok(redirect_with_flash(&edit_url, Flash::error("Invalid category")));
    };

    let update = PostUpdate {
        title: title.to_string(),
        content: content.to_string(),
        excerpt: non_empty(&form.excerpt),
        image_url: non_empty(&form.image_url),
        category_id,
        tags: split_tags(&form.tags).join(","),
        is_published: form.is_published.is_some(),
    };
    if !state.db.update_post(post_id, &update, Utc::now()).await? {
        return Err(AppError::NotFound);
    }
    Ok(redirect_with_flash("/admin/dashboard", Flash::success("Post updated successfully")))
}

pub async fn delete_post(
    _user: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> Result<Response, AppError> {
    if !state.db.delete_post(post_id).await? {
        return Err(AppError::NotFound);
    }
    Ok(redirect_with_flash("/admin/dashboard", Flash::success("Post deleted")))
}

pub async fn toggle_post(
    _user: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> Result<Response, AppError> {
    let published = state.db.toggle_post(post_id).await?.ok_or(AppError::NotFound)?;
    let message = if published { "Post published" } else { "Post unpublished" };
    Ok(redirect_with_flash("/admin/dashboard", Flash::success(message)))
}

pub async fn categories(
    user: AdminUser,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let flash = Flash::from_headers(&headers);
    let shown = flash.is_some();
    Ok(render_flashed(
        CategoriesTemplate {
            site_name: state.config.site.name.clone(),
            username: user.username,
            flash,
            categories: state.db.category_stats().await?,
        },
        shown,
    ))
}

pub async fn create_category(
    _user: AdminUser,
    State(state): State<Arc<AppState>>,
    Form(form): Form<CategoryForm>,
) -> Result<Response, AppError> {
    let Some(name) = non_empty(&form.name) else {
        return Ok(redirect_with_flash("/admin/categories", Flash::error("Category name is required")));
    };

    let category = CategoryConfig {
        slug: slugify(&name),
        description: form.description.trim().to_string(),
        icon: non_empty(&form.icon).unwrap_or_else(|| DEFAULT_CATEGORY_ICON.to_string()),
        color: non_empty(&form.color).unwrap_or_else(|| DEFAULT_CATEGORY_COLOR.to_string()),
        name,
    };

    let flash = match state.db.create_category(&category).await? {
        Some(_) => Flash::success(format!("Category '{}' created", category.name)),
        None => Flash::error("Category already exists"),
    };
    Ok(redirect_with_flash("/admin/categories", flash))
}

pub async fn delete_category(
    _user: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(category_id): Path<i64>,
) -> Result<Response, AppError> {
    if !state.db.delete_category(category_id).await? {
        return Err(AppError::NotFound);
    }
    Ok(redirect_with_flash("/admin/categories", Flash::success("Category deleted")))
}

pub async fn feeds(
    user: AdminUser,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let flash = Flash::from_headers(&headers);
    let shown = flash.is_some();
    Ok(render_flashed(
        FeedsTemplate {
            site_name: state.config.site.name.clone(),
            username: user.username,
            flash,
            feeds: state.db.get_all_feeds().await?,
            categories: state.db.get_categories().await?,
        },
        shown,
    ))
}

pub async fn create_feed(
    _user: AdminUser,
    State(state): State<Arc<AppState>>,
    Form(form): Form<FeedForm>,
) -> Result<Response, AppError> {
    let url = match reqwest::Url::parse(form.url.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => {
            return Ok(redirect_with_flash(
                "/admin/feeds",
                Flash::error("Feed URL must be an http or https address"),
            ))
        }
    };
    let Some(category_id) = submitted_category(&state, &form.category_id).await? else {
        return Ok(redirect_with_flash("/admin/feeds", Flash::error("Invalid category")));
    };
    let name = non_empty(&form.name)
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string());

    let flash = match state.db.create_feed(&name, url.as_str(), category_id).await?
    {
        Some(_) => Flash::success(format!("Feed '{}' added", name)),
        None => Flash::error("That feed URL is already registered"),
    };
    Ok(redirect_with_flash("/admin/feeds", flash))
}

pub async fn toggle_feed(
    _user: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<Response, AppError> {
    let active = state.db.toggle_feed(feed_id).await?.ok_or(AppError::NotFound)?;
    let message = if active { "Feed activated" } else { "Feed paused" };
    Ok(redirect_with_flash("/admin/feeds", Flash::success(message)))
}

pub async fn delete_feed(
    _user: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<Response, AppError> {
    if !state.db.delete_feed(feed_id).await? {
        return Err(AppError::NotFound);
    }
    Ok(redirect_with_flash("/admin/feeds", Flash::success("Feed deleted")))
}
