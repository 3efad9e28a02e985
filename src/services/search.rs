//! Search over posts and pages
//!
//! Plain substring matching in the database, with results cached per query.
//! Also provides the helpers search templates use: context excerpts, term
//! highlighting, keyword extraction and related posts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::{PageRepository, PostRepository};
use crate::models::{Page, Post};
use crate::services::text::{escape_html, strip_html};

pub const DEFAULT_EXCERPT_LENGTH: usize = 200;
pub const DEFAULT_RELATED_LIMIT: usize = 5;
const STOP_WORDS: [&str; 9] = ["the", "be", "to", "of", "and", "a", "in", "that", "have"];
const WARM_TERMS: [&str; 4] = ["welcome", "about", "contact", "news"];
const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub posts: Vec<Post>,
    pub pages: Vec<Page>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.pages.is_empty()
    }

    pub fn total(&self) -> usize {
        self.posts.len() + self.pages.len()
    }
}

/// Lowercase, drop everything but word characters, whitespace and `-`,
/// collapse runs of whitespace.
pub fn normalize_query(query: &str) -> String {
    let kept: String = query
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Window of `content` around the first match of `query`, as plain text.
///
/// Returns the excerpt and whether text follows it. Cut edges get `...`.
pub fn excerpt(content: &str, query: &str, length: usize) -> (String, bool) {
    if content.is_empty() || query.trim().is_empty() {
        return (String::new(), false);
    }
    let text: Vec<char> = strip_html(content).chars().collect();
    let needle = normalize_query(query);

    // Lowercasing can expand a char, so keep the source index of each one
    let mut lowered = String::with_capacity(text.len());
    let mut origin: Vec<usize> = Vec::with_capacity(text.len());
    for (i, c) in text.iter().enumerate() {
        for lc in c.to_lowercase() {
            lowered.push(lc);
            origin.push(i);
        }
    }

    let position = lowered.find(&needle).and_then(|byte_pos| {
        let lowered_index = lowered[..byte_pos].chars().count();
        origin.get(lowered_index).copied()
    });

    let Some(pos) = position else {
        if text.len() <= length {
            return (text.iter().collect(), false);
        }
        let head: String = text[..length].iter().collect();
        return (format!("{}...", head), true);
    };

    let half = length / 2;
    let start = pos.saturating_sub(half);
    let end = (pos + needle.chars().count() + half).min(text.len()).max(start);
    let prefix = if start > 0 { "..." } else { "" };
    let suffix = if end < text.len() { "..." } else { "" };
    let body: String = text[start..end].iter().collect();
    (format!("{}{}{}", prefix, body, suffix), end < text.len())
}

/// Escape `text`, then wrap every occurrence of each query term in `<mark>`
pub fn highlight(text: &str, query: &str) -> String {
    let escaped = escape_html(text);
    let terms: Vec<String> = normalize_query(query)
        .split_whitespace()
        .map(escape_html)
        .collect();
    if terms.is_empty() {
        return escaped;
    }

    let pattern = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    match regex::RegexBuilder::new(&format!("({})", pattern))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.replace_all(&escaped, "<mark>$1</mark>").into_owned(),
        Err(e) => {
            warn!("Could not build highlight pattern: {}", e);
            escaped
        }
    }
}

/// Most frequent words of at least `min_length` characters, stop words removed.
/// Ties keep first-seen order.
pub fn extract_keywords(text: &str, min_length: usize, max_keywords: usize) -> Vec<String> {
    let plain = strip_html(text).to_lowercase();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (index, word) in plain.split_whitespace().enumerate() {
        if word.chars().count() < min_length || STOP_WORDS.contains(&word) {
            continue;
        }
        counts.entry(word).or_insert((0, index)).0 += 1;
    }
    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(max_keywords)
        .map(|(w, _)| w.to_string())
        .collect()
}

pub struct SearchService {
    posts: Arc<dyn PostRepository>,
    pages: Arc<dyn PageRepository>,
    cache: Arc<Cache>,
    ttl: Duration,
}

impl SearchService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        pages: Arc<dyn PageRepository>,
        cache: Arc<Cache>,
        ttl: Duration,
    ) -> Self {
        Self {
            posts,
            pages,
            cache,
            ttl,
        }
    }

    fn cache_key(query: &str, limit: i64, include_drafts: bool) -> String {
        let digest = md5::compute(format!("{}|{}|{}", query, limit, include_drafts));
        format!("search:{:x}", digest)
    }

    /// Posts (newest first) and pages (by title) matching `query`
    pub async fn search(
        &self,
        query: &str,
        limit: Option<i64>,
        include_drafts: bool,
    ) -> anyhow::Result<SearchResults> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Ok(SearchResults::default());
        }
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 500);
        let key = Self::cache_key(&normalized, limit, include_drafts);

        match self.cache.get::<SearchResults>(&key).await {
            Ok(Some(hit)) => return Ok(hit),
            Ok(None) => {}
            Err(e) => warn!("Search cache read failed: {}", e),
        }

        let results = SearchResults {
            posts: self.posts.search(&normalized, limit, include_drafts).await?,
            pages: self.pages.search(&normalized, limit, include_drafts).await?,
        };
        if let Err(e) = self.cache.set(&key, &results, self.ttl).await {
            warn!("Search cache write failed: {}", e);
        }
        debug!("Search '{}' found {} results", normalized, results.total());
        Ok(results)
    }

    /// Published posts sharing keywords with `post`, best matches first
    pub async fn related(&self, post: &Post, limit: usize) -> anyhow::Result<Vec<Post>> {
        let keywords = extract_keywords(&format!("{} {}", post.title, post.content), 4, 10);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: HashMap<i64, Post> = HashMap::new();
        for keyword in &keywords {
            for found in self.posts.search(keyword, 50, false).await? {
                if found.id != post.id {
                    candidates.entry(found.id).or_insert(found);
                }
            }
        }

        let mut scored: Vec<(usize, Post)> = candidates
            .into_values()
            .map(|p| {
                let title = p.title.to_lowercase();
                let content = p.content.to_lowercase();
                let score = keywords
                    .iter()
                    .filter(|kw| title.contains(kw.as_str()) || content.contains(kw.as_str()))
                    .count();
                (score, p)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
        Ok(scored.into_iter().take(limit).map(|(_, p)| p).collect())
    }

    /// Drop cached results and warm common queries; returns posts + pages indexed
    pub async fn reindex(&self) -> anyhow::Result<i64> {
        let dropped = self.cache.delete_pattern("search:*").await?;
        debug!("Dropped {} cached searches", dropped);
        for term in WARM_TERMS {
            self.search(term, None, false).await?;
        }
        Ok(self.posts.count(false).await? + self.pages.count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::CacheConfig;
    use crate::db::repositories::{
        SqlxPageRepository, SqlxPostRepository, SqlxUserRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{PageTemplate, User};
    use chrono::Utc;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Hello,   WORLD!  "), "hello world");
        assert_eq!(normalize_query("rust-lang <script>"), "rust-lang script");
        assert_eq!(normalize_query("!!!"), "");
    }

    #[test]
    fn test_excerpt_centres_on_match() {
        let content = format!("{} needle {}", "a".repeat(300), "b".repeat(300));
        let (text, more) = excerpt(&content, "needle", 40);
        assert!(text.starts_with("..."));
        assert!(text.ends_with("..."));
        assert!(text.contains("needle"));
        assert!(more);

        let (text, more) = excerpt("<p>short text</p>", "missing", 200);
        assert_eq!(text, "short text");
        assert!(!more);

        assert_eq!(excerpt("", "x", 10), (String::new(), false));
    }

    #[test]
    fn test_excerpt_without_match_truncates() {
        let (text, more) = excerpt(&"z".repeat(50), "nothere", 10);
        assert_eq!(text, format!("{}...", "z".repeat(10)));
        assert!(more);
    }

    #[test]
    fn test_excerpt_with_expanding_lowercase() {
        // 'İ' lowercases to two chars
        let content = format!("{} needle tail", "İ".repeat(300));
        let (text, more) = excerpt(&content, "needle", 40);
        assert!(text.starts_with("..."));
        assert!(text.contains("needle"));
        assert!(more);

        let (text, _) = excerpt("İSTANBUL and Straße", "straße", 200);
        assert_eq!(text, "İSTANBUL and Straße");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_excerpt_never_panics(body in "[a-zİßΣ ]{0,120}", q in "[a-z]{1,6}") {
            let content = format!("{} {}", body, q);
            let (text, _) = excerpt(&content, &q, 30);
            prop_assert!(!text.is_empty());
        }
    }

    #[test]
    fn test_highlight() {
        assert_eq!(
            highlight("Rust is <fast>", "rust FAST"),
            "<mark>Rust</mark> is &lt;<mark>fast</mark>&gt;"
        );
        assert_eq!(highlight("a < b", ""), "a &lt; b");
    }

    #[test]
    fn test_extract_keywords() {
        let text = "<p>rust rust rust tokio tokio axum the and that have</p>";
        assert_eq!(extract_keywords(text, 4, 10), vec!["rust", "tokio", "axum"]);
        assert_eq!(extract_keywords(text, 4, 1), vec!["rust"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_normalize_is_idempotent(q in "[a-zA-Z0-9é ,.!?_\t-]{0,40}") {
            let once = normalize_query(&q);
            prop_assert_eq!(normalize_query(&once), once.clone());
            prop_assert!(!once.contains("  "));
            prop_assert_eq!(once.trim(), once.as_str());
        }
    }

    async fn setup() -> (SearchService, Arc<dyn PostRepository>, Arc<Cache>, i64) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let author = SqlxUserRepository::new(pool.clone())
            .create(&User::new("a".into(), "a@example.com".into(), "h".into(), true))
            .await
            .unwrap();
        let posts = SqlxPostRepository::boxed(pool.clone());
        let pages = SqlxPageRepository::boxed(pool.clone());
        let now = Utc::now();
        pages
            .create(&Page {
                id: 0,
                title: "About Rust".into(),
                slug: "about".into(),
                content: "All about this site".into(),
                excerpt: None,
                template: PageTemplate::Default,
                published: true,
                author_id: author.id,
                author_name: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let cache = create_cache(&CacheConfig::default()).await.unwrap();
        let service = SearchService::new(posts.clone(), pages, cache.clone(), Duration::from_secs(60));
        (service, posts, cache, author.id)
    }

    fn post(title: &str, content: &str, published: bool, author_id: i64) -> Post {
        let now = Utc::now();
        Post {
            id: 0,
            title: title.into(),
            slug: crate::services::text::generate_slug(title),
            content: content.into(),
            excerpt: None,
            featured_image: None,
            published,
            likes: 0,
            author_id,
            author_name: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_search_posts_and_pages() {
        let (service, posts, _, author) = setup().await;
        posts.create(&post("Learning Rust", "ownership", true, author)).await.unwrap();
        posts.create(&post("Rust draft", "wip", false, author)).await.unwrap();

        let results = service.search("RUST!", None, false).await.unwrap();
        assert_eq!(results.posts.len(), 1);
        assert_eq!(results.pages.len(), 1);

        let with_drafts = service.search("rust", None, true).await.unwrap();
        assert_eq!(with_drafts.posts.len(), 2);

        assert!(service.search("   ", None, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_results_are_cached() {
        let (service, posts, cache, author) = setup().await;
        posts.create(&post("Cached", "body", true, author)).await.unwrap();
        service.search("cached", None, false).await.unwrap();

        // Served from cache even though a new match appears
        posts.create(&post("Cached two", "body", true, author)).await.unwrap();
        assert_eq!(service.search("cached", None, false).await.unwrap().posts.len(), 1);

        cache.delete_pattern("search:*").await.unwrap();
        assert_eq!(service.search("cached", None, false).await.unwrap().posts.len(), 2);
    }

    #[tokio::test]
    async fn test_related_posts() {
        let (service, posts, _, author) = setup().await;
        let base = posts
            .create(&post("Tokio runtime", "async tokio runtime scheduler", true, author))
            .await
            .unwrap();
        posts
            .create(&post("Scheduler internals", "tokio scheduler runtime", true, author))
            .await
            .unwrap();
        posts.create(&post("Gardening", "tomatoes", true, author)).await.unwrap();
        posts.create(&post("Tokio draft", "tokio", false, author)).await.unwrap();

        let related = service.related(&base, 5).await.unwrap();
        let titles: Vec<&str> = related.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Scheduler internals"]);
    }

    #[tokio::test]
    async fn test_reindex_counts_and_warms() {
        let (service, posts, cache, author) = setup().await;
        posts.create(&post("Welcome", "hello", true, author)).await.unwrap();
        cache
            .set("search:stale", &"x", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(service.reindex().await.unwrap(), 2);
        assert!(cache.get::<String>("search:stale").await.unwrap().is_none());
    }
}
