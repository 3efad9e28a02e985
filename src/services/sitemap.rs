//! XML sitemaps

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::db::repositories::{PageRepository, PostRepository};
use crate::models::ListParams;
use crate::services::feed::xml_escape;

pub const URLS_PER_SITEMAP: u32 = 1000;
const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

#[derive(Debug, Clone, PartialEq)]
pub struct SitemapUrl {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: &'static str,
    pub priority: &'static str,
}

fn day(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

fn render_urlset(urls: &[SitemapUrl]) -> String {
    let mut xml = vec![
        r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_string(),
        format!(r#"<urlset xmlns="{}">"#, SITEMAP_NS),
    ];
    for url in urls {
        xml.push("  <url>".to_string());
        xml.push(format!("    <loc>{}</loc>", xml_escape(&url.loc)));
        if let Some(lastmod) = &url.lastmod {
            xml.push(format!("    <lastmod>{}</lastmod>", lastmod));
        }
        xml.push(format!("    <changefreq>{}</changefreq>", url.changefreq));
        xml.push(format!("    <priority>{}</priority>", url.priority));
        xml.push("  </url>".to_string());
    }
    xml.push("</urlset>".to_string());
    xml.join("\n")
}

pub struct SitemapService {
    posts: Arc<dyn PostRepository>,
    pages: Arc<dyn PageRepository>,
    base_url: String,
}

impl SitemapService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        pages: Arc<dyn PageRepository>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            posts,
            pages,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post_urls(&self, page: u32, per_page: u32) -> anyhow::Result<Vec<SitemapUrl>> {
        let (posts, _) = self
            .posts
            .list(&ListParams::batch(page, per_page), true)
            .await
            .context("Failed to list posts for sitemap")?;
        Ok(posts
            .into_iter()
            .map(|p| SitemapUrl {
                loc: format!("{}/post/{}", self.base_url, p.slug),
                lastmod: Some(day(p.updated_at)),
                changefreq: "weekly",
                priority: "0.8",
            })
            .collect())
    }

    /// Homepage, every published post and every published page
    pub async fn generate(&self) -> anyhow::Result<String> {
        let mut urls = vec![SitemapUrl {
            loc: format!("{}/", self.base_url),
            lastmod: Some(day(Utc::now())),
            changefreq: "daily",
            priority: "1.0",
        }];

        let total = self.posts.count(true).await?;
        let chunks = page_count(total);
        for page in 1..=chunks {
            urls.extend(self.post_urls(page, URLS_PER_SITEMAP).await?);
        }

        for page in self.pages.list(true).await? {
            urls.push(SitemapUrl {
                loc: format!("{}/page/{}", self.base_url, page.slug),
                lastmod: Some(day(page.updated_at)),
                changefreq: "monthly",
                priority: "0.6",
            });
        }
        Ok(render_urlset(&urls))
    }

    /// Index pointing at the main sitemap and each post sitemap
    pub async fn generate_index(&self) -> anyhow::Result<String> {
        let today = day(Utc::now());
        let chunks = page_count(self.posts.count(true).await?);

        let mut locs = vec![format!("{}/sitemap.xml", self.base_url)];
        locs.extend((1..=chunks).map(|n| format!("{}/sitemap-posts-{}.xml", self.base_url, n)));

        let mut xml = vec![
            r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_string(),
            format!(r#"<sitemapindex xmlns="{}">"#, SITEMAP_NS),
        ];
        for loc in locs {
            xml.push("  <sitemap>".to_string());
            xml.push(format!("    <loc>{}</loc>", xml_escape(&loc)));
            xml.push(format!("    <lastmod>{}</lastmod>", today));
            xml.push("  </sitemap>".to_string());
        }
        xml.push("</sitemapindex>".to_string());
        Ok(xml.join("\n"))
    }

    /// One page of published posts, newest first
    pub async fn generate_posts(&self, page: u32, per_page: u32) -> anyhow::Result<String> {
        let urls = self.post_urls(page.max(1), per_page.clamp(1, URLS_PER_SITEMAP)).await?;
        Ok(render_urlset(&urls))
    }

    /// Write `sitemap.xml` into `dir`
    pub async fn write_to(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let xml = self.generate().await?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join("sitemap.xml");
        tokio::fs::write(&path, xml)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote sitemap to {}", path.display());
        Ok(path)
    }
}

/// Number of post sitemaps; always at least one
pub fn page_count(total_posts: i64) -> u32 {
    let per = URLS_PER_SITEMAP as i64;
    (((total_posts.max(0) + per - 1) / per).max(1)) as u32
}
