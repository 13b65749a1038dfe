//! Template-filled articles for the auto-post categories.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::db::NewPost;
use crate::text::{clean_html, short_hash, slugify, truncate_chars};

pub const GENERATOR_AUTHOR: &str = "Auto Content Generator";
const EXCERPT_MAX: usize = 150;
const DEFAULT_EXCERPT: &str = "Latest update from South Africa...";

struct Template {
    title: &'static str,
    body: &'static str,
    slots: &'static [(&'static str, &'static [&'static str])],
}

const GRANTS: Template = Template {
    title: "New Government Funding Program Launched",
    body: r#"<h2>Latest Funding Opportunity</h2>
<p>The South African government has introduced a new funding program aimed at supporting {target_audience}.</p>
<h3>Program Details</h3>
<p>This initiative focuses on providing financial assistance for {purpose}. Eligible applicants can receive up to R{amount} in support.</p>
<h3>Eligibility Criteria</h3>
<p>To qualify, applicants must meet the following requirements:</p>
<ul>
<li>South African citizen or permanent resident</li>
<li>{requirement1}</li>
<li>{requirement2}</li>
</ul>
<h3>Application Process</h3>
<p>Applications can be submitted through the official government portal. The deadline for submissions is {deadline}.</p>
<h3>Additional Support</h3>
<p>For more information and application assistance, visit the official government website or contact the support hotline.</p>"#,
    slots: &[
        ("target_audience", &["students", "small businesses", "entrepreneurs", "artists"]),
        ("purpose", &["education expenses", "business development", "housing needs", "skill training"]),
        ("amount", &["15000", "25000", "50000", "100000"]),
        ("requirement1", &["Minimum age of 18 years", "Proof of income below threshold", "Business registration documents", "Academic transcripts"]),
        ("requirement2", &["Residence in specific provinces", "Membership in relevant associations", "Completion of prerequisite courses", "Business plan submission"]),
        ("deadline", &["March 31", "April 15", "May 30", "June 30"]),
    ],
};

const JOBS: Template = Template {
    title: "Career Opportunities in Growing Sector",
    body: r#"<h2>Employment Update: {sector} Sector</h2>
<p>The {sector} industry in South Africa is experiencing significant growth, creating new job opportunities.</p>
<h3>Available Positions</h3>
<p>Companies are currently hiring for various roles including:</p>
<ul>
<li>{position1}</li>
<li>{position2}</li>
<li>{position3}</li>
</ul>
<h3>Salary Information</h3>
<p>Competitive salary packages ranging from R{salary_low} to R{salary_high} are being offered, depending on experience and qualifications.</p>
<h3>Required Skills</h3>
<p>Successful candidates typically possess skills in {skill1}, {skill2}, and {skill3}.</p>
<h3>How to Apply</h3>
<p>Interested candidates should submit their CVs through company websites or recruitment portals.</p>"#,
    slots: &[
        ("sector", &["Technology", "Healthcare", "Renewable Energy", "Finance", "Education"]),
        ("position1", &["Software Developer", "Data Analyst", "Project Manager", "Marketing Specialist"]),
        ("position2", &["IT Support", "Sales Representative", "Content Creator", "Administrative Assistant"]),
        ("position3", &["Graphic Designer", "Account Manager", "Quality Assurance", "Customer Service"]),
        ("salary_low", &["25000", "30000", "35000", "40000"]),
        ("salary_high", &["60000", "80000", "100000", "120000"]),
        ("skill1", &["Python programming", "Digital marketing", "Project management", "Data analysis"]),
        ("skill2", &["Communication skills", "Team collaboration", "Problem solving", "Creative thinking"]),
        ("skill3", &["Attention to detail", "Time management", "Customer service", "Technical writing"]),
    ],
};

const ENTERTAINMENT: Template = Template {
    title: "Local Entertainment Industry Update",
    body: r#"<h2>Entertainment News: {event_type}</h2>
<p>The South African entertainment scene is buzzing with the latest {event_type} developments.</p>
<h3>Recent Achievements</h3>
<p>Local artists and creators have been recognized for their work in {field}, showcasing the talent within South Africa's creative community.</p>
<h3>Upcoming Events</h3>
<p>Several exciting events are scheduled, including {event1} and {event2}. These gatherings provide opportunities to experience diverse cultural expressions.</p>
<h3>Industry Growth</h3>
<p>The entertainment sector continues to expand, with increased investment in {area1} and {area2}. This growth creates more opportunities for local talent.</p>
<h3>Support Local</h3>
<p>By supporting South African entertainment, you contribute to the growth of the creative economy and help showcase local talent on a global stage.</p>"#,
    slots: &[
        ("event_type", &["music release", "film production", "art exhibition", "cultural festival"]),
        ("field", &["music composition", "film directing", "visual arts", "performance art"]),
        ("event1", &["local music festival", "film screening", "art gallery opening", "theater production"]),
        ("event2", &["cultural celebration", "talent showcase", "creative workshop", "industry networking"]),
        ("area1", &["digital content creation", "live performances", "film production", "music recording"]),
        ("area2", &["streaming platforms", "event management", "artist development", "creative technology"]),
    ],
};

/// Categories with a template. Anything else is generated as `grants`.
pub const GENERATED_CATEGORIES: &[&str] = &["grants", "jobs", "entertainment"];

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArticle {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub category: String,
    pub author: String,
    pub tags: Vec<String>,
    pub auto_generated: bool,
}

impl GeneratedArticle {
    pub fn into_new_post(self, category_id: Option<i64>) -> NewPost {
        let mut post = NewPost::new(&self.title, &self.slug, &self.content);
        post.excerpt = Some(self.excerpt);
        post.category_id = category_id;
        post.author = self.author;
        post.tags = self.tags;
        post.is_auto_generated = self.auto_generated;
        post
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentGenerator;

impl ContentGenerator {
    fn template(category: &str) -> (&'static str, &'static Template) {
        match category {
            "jobs" => ("jobs", &JOBS),
            "entertainment" => ("entertainment", &ENTERTAINMENT),
            _ => ("grants", &GRANTS),
        }
    }

    pub fn generate<R: Rng + ?Sized>(&self, category: &str, rng: &mut R) -> GeneratedArticle {
        let (category, template) = Self::template(category);

        let mut content = template.body.to_string();
        for (slot, choices) in template.slots {
            let value = choices.choose(rng).copied().unwrap_or_default();
            content = content.replace(&format!("{{{}}}", slot), value);
        }

        let title = template.title.to_string();
        let slug = format!("{}-{}", slugify(&title), short_hash(&content, 8));

        GeneratedArticle {
            excerpt: generate_excerpt(&content),
            slug,
            title,
            content,
            category: category.to_string(),
            author: GENERATOR_AUTHOR.to_string(),
            tags: vec![
                category.to_string(),
                "South Africa".to_string(),
                "News".to_string(),
                "Update".to_string(),
                "Auto-Generated".to_string(),
            ],
            auto_generated: true,
        }
    }
}

/// First sentence of the plain text, at most 150 characters.
pub fn generate_excerpt(content: &str) -> String {
    let text = clean_html(content, content.len());
    text.split('.')
        .map(str::trim)
        .find(|sentence| !sentence.is_empty())
        .map(|sentence| truncate_chars(sentence, EXCERPT_MAX))
        .unwrap_or_else(|| DEFAULT_EXCERPT.to_string())
}
