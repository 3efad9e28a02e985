//! Syndication feeds
//!
//! RSS 2.0, Atom 1.0 and JSON Feed documents over the newest published
//! posts. Rendered documents are cached under `feed:*`; post writes drop them.

use anyhow::Context;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::PostRepository;
use crate::models::{ListParams, Post};
use crate::services::markdown::MarkdownRenderer;
use crate::services::settings::{keys, SettingsService};
use crate::services::text::make_excerpt;

pub const FEED_SIZE: u32 = 20;
const DESCRIPTION_LENGTH: usize = 300;

/// Escape the five XML special characters
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Site-level fields shared by all three formats
struct Channel {
    title: String,
    description: String,
    language: String,
    home: String,
}

pub struct FeedService {
    posts: Arc<dyn PostRepository>,
    settings: Arc<SettingsService>,
    renderer: Arc<MarkdownRenderer>,
    cache: Arc<Cache>,
    base_url: String,
    ttl: Duration,
}

impl FeedService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        settings: Arc<SettingsService>,
        renderer: Arc<MarkdownRenderer>,
        cache: Arc<Cache>,
        base_url: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            posts,
            settings,
            renderer,
            cache,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl,
        }
    }

    fn post_url(&self, post: &Post) -> String {
        format!("{}/post/{}", self.base_url, post.slug)
    }

    fn description(post: &Post) -> String {
        post.excerpt
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| make_excerpt(&post.content, DESCRIPTION_LENGTH))
    }

    async fn channel(&self) -> anyhow::Result<Channel> {
        Ok(Channel {
            title: self.settings.get_string(keys::SITE_TITLE, "Webbly Site").await?,
            description: self.settings.get_string(keys::SITE_DESCRIPTION, "").await?,
            language: self.settings.get_string(keys::SITE_LANGUAGE, "en-us").await?,
            home: format!("{}/", self.base_url),
        })
    }

    async fn latest(&self) -> anyhow::Result<Vec<Post>> {
        let (posts, _) = self
            .posts
            .list(&ListParams::new(1, FEED_SIZE), true)
            .await
            .context("Failed to load feed posts")?;
        Ok(posts)
    }

    async fn cached<F, Fut>(&self, key: &str, build: F) -> anyhow::Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<String>>,
    {
        match self.cache.get::<String>(key).await {
            Ok(Some(doc)) => return Ok(doc),
            Ok(None) => {}
            Err(e) => warn!("Feed cache read failed: {}", e),
        }
        let doc = build().await?;
        if let Err(e) = self.cache.set(key, &doc, self.ttl).await {
            warn!("Feed cache write failed: {}", e);
        }
        debug!("Rebuilt {}", key);
        Ok(doc)
    }

    pub async fn rss(&self) -> anyhow::Result<String> {
        self.cached("feed:rss", || self.build_rss()).await
    }

    pub async fn atom(&self) -> anyhow::Result<String> {
        self.cached("feed:atom", || self.build_atom()).await
    }

    /// JSON Feed document, serialized
    pub async fn json(&self) -> anyhow::Result<String> {
        self.cached("feed:json", || async {
            Ok(serde_json::to_string(&self.build_json().await?)?)
        })
        .await
    }

    async fn build_rss(&self) -> anyhow::Result<String> {
        let channel = self.channel().await?;
        let posts = self.latest().await?;
        let now = chrono::Utc::now().to_rfc2822();

        let mut xml = vec![
            r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_string(),
            r#"<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom" xmlns:content="http://purl.org/rss/1.0/modules/content/">"#.to_string(),
            "<channel>".to_string(),
            format!("<title>{}</title>", xml_escape(&channel.title)),
            format!("<link>{}</link>", xml_escape(&channel.home)),
            format!("<description>{}</description>", xml_escape(&channel.description)),
            format!("<language>{}</language>", xml_escape(&channel.language)),
            format!("<pubDate>{}</pubDate>", now),
            format!("<lastBuildDate>{}</lastBuildDate>", now),
            format!(
                r#"<atom:link href="{}/feed" rel="self" type="application/rss+xml" />"#,
                xml_escape(&self.base_url)
            ),
        ];

        for post in &posts {
            let url = xml_escape(&self.post_url(post));
            xml.push("<item>".to_string());
            xml.push(format!("<title>{}</title>", xml_escape(&post.title)));
            xml.push(format!("<link>{}</link>", url));
            xml.push(format!(r#"<guid isPermaLink="true">{}</guid>"#, url));
            xml.push(format!("<pubDate>{}</pubDate>", post.created_at.to_rfc2822()));
            xml.push(format!("<author>{}</author>", xml_escape(&post.author_name)));
            xml.push(format!(
                "<description>{}</description>",
                xml_escape(&Self::description(post))
            ));
            xml.push(format!(
                "<content:encoded>{}</content:encoded>",
                xml_escape(&self.renderer.render(&post.content))
            ));
            xml.push("</item>".to_string());
        }

        xml.push("</channel>".to_string());
        xml.push("</rss>".to_string());
        Ok(xml.join("\n"))
    }

    async fn build_atom(&self) -> anyhow::Result<String> {
        let channel = self.channel().await?;
        let posts = self.latest().await?;
        let updated = posts
            .iter()
            .map(|p| p.updated_at)
            .max()
            .unwrap_or_else(chrono::Utc::now);

        let mut xml = vec![
            r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_string(),
            format!(
                r#"<feed xmlns="http://www.w3.org/2005/Atom" xml:lang="{}">"#,
                xml_escape(&channel.language)
            ),
            format!("<title>{}</title>", xml_escape(&channel.title)),
            format!("<subtitle>{}</subtitle>", xml_escape(&channel.description)),
            format!("<id>{}</id>", xml_escape(&channel.home)),
            format!(r#"<link href="{}" />"#, xml_escape(&channel.home)),
            format!(
                r#"<link href="{}/feed/atom" rel="self" />"#,
                xml_escape(&self.base_url)
            ),
            format!("<updated>{}</updated>", updated.to_rfc3339()),
            format!("<author><name>{}</name></author>", xml_escape(&channel.title)),
        ];

        for post in &posts {
            let url = xml_escape(&self.post_url(post));
            xml.push("<entry>".to_string());
            xml.push(format!("<title>{}</title>", xml_escape(&post.title)));
            xml.push(format!("<id>{}</id>", url));
            xml.push(format!(r#"<link href="{}" />"#, url));
            xml.push(format!("<published>{}</published>", post.created_at.to_rfc3339()));
            xml.push(format!("<updated>{}</updated>", post.updated_at.to_rfc3339()));
            xml.push(format!(
                "<author><name>{}</name></author>",
                xml_escape(&post.author_name)
            ));
            xml.push(format!("<summary>{}</summary>", xml_escape(&Self::description(post))));
            xml.push(format!(
                r#"<content type="html">{}</content>"#,
                xml_escape(&self.renderer.render(&post.content))
            ));
            xml.push("</entry>".to_string());
        }

        xml.push("</feed>".to_string());
        Ok(xml.join("\n"))
    }

    async fn build_json(&self) -> anyhow::Result<Value> {
        let channel = self.channel().await?;
        let posts = self.latest().await?;

        let items: Vec<Value> = posts
            .iter()
            .map(|post| {
                let url = self.post_url(post);
                let mut item = json!({
                    "id": url,
                    "url": url,
                    "title": post.title,
                    "content_html": self.renderer.render(&post.content),
                    "summary": Self::description(post),
                    "date_published": post.created_at.to_rfc3339(),
                    "date_modified": post.updated_at.to_rfc3339(),
                    "author": { "name": post.author_name },
                });
                if let Some(image) = post.featured_image.as_deref().filter(|i| !i.is_empty()) {
                    item["image"] = json!(format!("{}/uploads/{}", self.base_url, image));
                }
                item
            })
            .collect();

        Ok(json!({
            "version": "https://jsonfeed.org/version/1",
            "title": channel.title,
            "home_page_url": channel.home,
            "feed_url": format!("{}/feed.json", self.base_url),
            "description": channel.description,
            "language": channel.language,
            "author": { "name": channel.title },
            "items": items,
        }))
    }
}
