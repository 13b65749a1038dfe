//! Static information pages, written in Markdown and rendered on request.

use std::sync::Arc;

use askama::Template;
use axum::{extract::State, response::IntoResponse};
use pulldown_cmark::{html, Options, Parser};

use super::{AppError, AppState, HtmlTemplate, Layout};
use crate::config::SiteConfig;

const ABOUT: &str = r#"
**{name}** brings together South African news from trusted sources in one place.

We follow national and local publishers, file every story under a clear category
and link back to the original article so you can read the full report at the source.

## What we cover

- Breaking news and government updates
- Business, technology and sport
- Jobs, learnerships and grant information, including SASSA updates
- Health, education and entertainment

Some posts on grants, jobs and entertainment are written automatically from
public information. These are marked as auto-generated.
"#;

const CONTACT: &str = r#"
We would like to hear from you. Send story tips, corrections or partnership
enquiries using the details below.

- **Email:** {email}
- **Phone:** {phone}
- **Address:** {address}

Corrections are reviewed within two working days.
"#;

const PRIVACY: &str = r#"
**{name}** does not require an account to read articles.

## What we collect

- Anonymous page view counts per article
- Standard web server logs, kept for troubleshooting

## Cookies

Only the admin panel sets cookies, to keep editors signed in. Readers are not tracked.

## Contact

Questions about this policy can be sent to {email}.
"#;

const TERMS: &str = r#"
By using **{name}** you agree to the following terms.

1. Articles from external publishers remain the property of their owners.
   We show a summary and link to the source.
2. Auto-generated posts are provided for information only. Always confirm
   deadlines and requirements with the official source.
3. We may change or remove content at any time.

Questions about these terms can be sent to {email}.
"#;

#[derive(Template)]
#[template(path = "page.html")]
pub struct PageTemplate {
    pub layout: Layout,
    pub title: String,
    pub body: String,
}

/// Fill the site placeholders, then render Markdown to HTML.
pub fn render_page(markdown: &str, site: &SiteConfig) -> String {
    let phone = if site.contact_phone.is_empty() {
        "Not listed"
    } else {
        site.contact_phone.as_str()
    };
    let filled = markdown
        .replace("{name}", &site.name)
        .replace("{email}", &site.contact_email)
        .replace("{phone}", phone)
        .replace("{address}", &site.address);

    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(&filled, Options::empty()));
    out
}

async fn page(state: &AppState, title: &str, markdown: &str) -> Result<HtmlTemplate<PageTemplate>, AppError> {
    let layout = Layout::load(state).await?;
    let body = render_page(markdown, &layout.site);
    Ok(HtmlTemplate(PageTemplate {
        layout,
        title: title.to_string(),
        body,
    }))
}

pub async fn about(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    page(&state, "About Us", ABOUT).await
}

pub async fn contact(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    page(&state, "Contact Us", CONTACT).await
}

pub async fn privacy(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    page(&state, "Privacy Policy", PRIVACY).await
}

pub async fn terms(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    page(&state, "Terms of Service", TERMS).await
}
