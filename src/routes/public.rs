use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use super::{AppError, AppState, HtmlTemplate, Layout, PageQuery, Pagination, PostView};
use crate::db::{Category, CategoryStat, PostFilter};

const TRENDING_COUNT: i64 = 5;
const RELATED_COUNT: i64 = 4;
const SEARCH_LIMIT: i64 = 20;

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub layout: Layout,
    pub posts: Vec<PostView>,
    pub trending: Vec<PostView>,
    pub categories: Vec<CategoryStat>,
    pub pagination: Pagination,
}

#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub layout: Layout,
    pub post: PostView,
    pub related: Vec<PostView>,
}

#[derive(Template)]
#[template(path = "category.html")]
pub struct CategoryTemplate {
    pub layout: Layout,
    pub category: Category,
    pub posts: Vec<PostView>,
    pub total: i64,
    pub pagination: Pagination,
}

#[derive(Template)]
#[template(path = "search.html")]
pub struct SearchTemplate {
    pub layout: Layout,
    pub query: String,
    pub posts: Vec<PostView>,
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let per_page = state.config.site.posts_per_page;

    let total = state.db.count_posts(PostFilter::Published).await?;
    let pagination = Pagination::new(query.page, total, per_page);
    let posts = state
        .db
        .list_posts(PostFilter::Published, per_page, pagination.offset(per_page))
        .await?;
    let trending = state.db.trending_posts(TRENDING_COUNT).await?;
    let categories = state.db.category_stats().await?;

    Ok(HtmlTemplate(IndexTemplate {
        layout: Layout::load(&state).await?,
        posts: PostView::many(posts, now),
        trending: PostView::many(trending, now),
        categories,
        pagination,
    }))
}

pub async fn post_detail(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut post = state
        .db
        .get_post_by_slug(&slug, true)
        .await?
        .ok_or(AppError::NotFound)?;

    state.db.increment_views(post.id).await?;
    post.views += 1;

    let now = Utc::now();
    let related = state.db.related_posts(&post, RELATED_COUNT).await?;

    Ok(HtmlTemplate(PostTemplate {
        layout: Layout::load(&state).await?,
        post: PostView::new(post, now),
        related: PostView::many(related, now),
    }))
}

pub async fn category(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let category = state
        .db
        .get_category_by_slug(&slug)
        .await?
        .ok_or(AppError::NotFound)?;

    let per_page = state.config.site.posts_per_page;
    let filter = PostFilter::PublishedInCategory(category.id);
    let total = state.db.count_posts(filter).await?;
    let pagination = Pagination::new(query.page, total, per_page);
    let posts = state
        .db
        .list_posts(filter, per_page, pagination.offset(per_page))
        .await?;

    Ok(HtmlTemplate(CategoryTemplate {
        layout: Layout::load(&state).await?,
        category,
        posts: PostView::many(posts, Utc::now()),
        total,
        pagination,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let term = query.q.trim().to_string();
    let posts = if term.is_empty() {
        Vec::new()
    } else {
        state.db.search_posts(&term, SEARCH_LIMIT).await?
    };

    Ok(HtmlTemplate(SearchTemplate {
        layout: Layout::load(&state).await?,
        query: term,
        posts: PostView::many(posts, Utc::now()),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    mod index_tests {
        use super::*;

        #[tokio::test]
        async fn test_index_empty() {
            let (app, _state) = create_test_app().await;

            let response = app.oneshot(get("/")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let body = body_string(response).await;
            assert!(body.contains("Mzansi Insights"));
            assert!(body.contains("No articles yet"));
        }

        #[tokio::test]
        async fn test_index_lists_posts_and_categories() {
            let (app, state) = create_test_app().await;
            insert_post(&state, "Rand strengthens against dollar", "rand-strengthens", "business")
                .await;

            let response = app.oneshot(get("/")).await.unwrap();
            let body = body_string(response).await;
            assert!(body.contains("Rand strengthens against dollar"));
            assert!(body.contains("/post/rand-strengthens"));
            assert!(body.contains("/category/business"));
        }

        #[tokio::test]
        async fn test_index_pagination() {
            let (app, state) = create_test_app().await;
            for i in 0..7 {
                insert_post(&state, &format!("Matric results story {}", i), &format!("matric-{}", i), "education")
                    .await;
            }

            let response = app.clone().oneshot(get("/")).await.unwrap();
            let body = body_string(response).await;
            assert!(body.contains("?page=2"));
            assert!(body.contains("Page 1 of 2"));

            let response = app.oneshot(get("/?page=2")).await.unwrap();
            let body = body_string(response).await;
            assert!(body.contains("Page 2 of 2"));
            assert!(body.contains("?page=1"));
        }

        #[tokio::test]
        async fn test_unpublished_posts_hidden() {
            let (app, state) = create_test_app().await;
            let id = insert_post(&state, "Draft article about SASSA", "draft-sassa", "grants").await;
            state.db.toggle_post(id).await.unwrap();

            let response = app.oneshot(get("/")).await.unwrap();
            let body = body_string(response).await;
            assert!(!body.contains("Draft article about SASSA"));
        }
    }

    mod post_tests {
        use super::*;

        #[tokio::test]
        async fn test_post_page_counts_views() {
            let (app, state) = create_test_app().await;
            let id = insert_post(&state, "Springboks win the final", "springboks-win", "sports").await;

            let response = app.clone().oneshot(get("/post/springboks-win")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_string(response).await;
            assert!(body.contains("Springboks win the final"));
            assert!(body.contains("Eskom"));

            app.oneshot(get("/post/springboks-win")).await.unwrap();
            let post = state.db.get_post(id).await.unwrap().unwrap();
            assert_eq!(post.views, 2);
        }

        #[tokio::test]
        async fn test_related_posts_shown() {
            let (app, state) = create_test_app().await;
            insert_post(&state, "Proteas tour announced", "proteas-tour", "sports").await;
            insert_post(&state, "Bafana Bafana squad named", "bafana-squad", "sports").await;

            let response = app.oneshot(get("/post/proteas-tour")).await.unwrap();
            let body = body_string(response).await;
            assert!(body.contains("/post/bafana-squad"));
        }

        #[tokio::test]
        async fn test_feed_markup_rendered_as_text() {
            use crate::config::FeedConfig;
            use crate::db::PostFilter;
            use wiremock::matchers::{method, path};
            use wiremock::{Mock, MockServer, ResponseTemplate};

            let server = MockServer::start().await;
            let rss = r#"<?xml version="1.0"?><rss version="2.0"><channel>
                <title>Hostile</title><link>https://hostile.example</link><description>d</description>
                <item><title>Eskom announces stage 2 load shedding</title>
                <link>https://hostile.example/eskom</link>
                <description>&lt;p&gt;&amp;lt;img src=x onerror=alert(1)&amp;gt; Eskom has announced that stage two load shedding will be implemented from 16:00 today until further notice.&lt;/p&gt;</description>
                </item></channel></rss>"#;
            Mock::given(method("GET"))
                .and(path("/feed.xml"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss))
                .mount(&server)
                .await;

            let (app, state) = create_test_app().await;
            state
                .db
                .sync_feeds(&[FeedConfig {
                    name: "Hostile".to_string(),
                    url: format!("{}/feed.xml", server.uri()),
                    category: "news".to_string(),
                    active: true,
                }])
                .await
                .unwrap();
            assert_eq!(state.fetcher.refresh_all_feeds().await.unwrap(), 1);
            let post = state
                .db
                .list_posts(PostFilter::All, 1, 0)
                .await
                .unwrap()
                .remove(0);

            let response = app
                .oneshot(get(&format!("/post/{}", post.slug)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_string(response).await;
            assert!(body.contains("&lt;img"));
            assert!(!body.contains("<img src=x onerror"));
        }

        #[tokio::test]
        async fn test_missing_post_is_404() {
            let (app, _state) = create_test_app().await;

            let response = app.oneshot(get("/post/nope")).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_unpublished_post_is_404() {
            let (app, state) = create_test_app().await;
            let id = insert_post(&state, "Embargoed budget speech", "embargoed", "government").await;
            state.db.toggle_post(id).await.unwrap();

            let response = app.oneshot(get("/post/embargoed")).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    mod category_tests {
        use super::*;

        #[tokio::test]
        async fn test_category_page() {
            let (app, state) = create_test_app().await;
            insert_post(&state, "New learnerships open", "learnerships", "jobs").await;
            insert_post(&state, "Petrol price drops", "petrol-price", "business").await;

            let response = app.oneshot(get("/category/jobs")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_string(response).await;
            assert!(body.contains("New learnerships open"));
            assert!(!body.contains("Petrol price drops"));
        }

        #[tokio::test]
        async fn test_unknown_category_is_404() {
            let (app, _state) = create_test_app().await;

            let response = app.oneshot(get("/category/astrology")).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    mod search_tests {
        use super::*;

        #[tokio::test]
        async fn test_search_finds_title() {
            let (app, state) = create_test_app().await;
            insert_post(&state, "Load shedding suspended", "load-shedding", "news").await;
            insert_post(&state, "Cape Town water update", "water-update", "news").await;

            let response = app.oneshot(get("/search?q=LOAD+shedding")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_string(response).await;
            assert!(body.contains("Load shedding suspended"));
            assert!(!body.contains("Cape Town water update"));
        }

        #[tokio::test]
        async fn test_empty_search() {
            let (app, _state) = create_test_app().await;

            let response = app.oneshot(get("/search")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_string(response).await;
            assert!(body.contains("Enter a search term"));
        }

        #[tokio::test]
        async fn test_search_escapes_query() {
            let (app, _state) = create_test_app().await;

            let response = app
                .oneshot(get("/search?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E"))
                .await
                .unwrap();
            let body = body_string(response).await;
            assert!(!body.contains("<script>alert(1)</script>"));
        }
    }
}
