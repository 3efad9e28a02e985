//! Tera filters available to every theme

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tera::{Filter, Tera};

use crate::services::markdown::MarkdownRenderer;
use crate::services::text::{make_excerpt, strip_html as strip_tags, truncate_chars};

const WORDS_PER_MINUTE: usize = 200;

const ALLOWED_TAGS: [&str; 22] = [
    "a", "abbr", "acronym", "b", "blockquote", "code", "em", "i", "li", "ol", "pre", "strong",
    "ul", "h1", "h2", "h3", "h4", "h5", "h6", "p", "img", "br",
];

fn allowed_attributes(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title", "rel"],
        "img" => &["src", "alt", "title"],
        _ => &[],
    }
}

pub fn register_filters(tera: &mut Tera, renderer: Arc<MarkdownRenderer>) {
    tera.register_filter("markdown", MarkdownFilter(renderer));
    tera.register_filter("gravatar", gravatar);
    tera.register_filter("timeago", timeago);
    tera.register_filter("truncate_html", truncate_html);
    tera.register_filter("strip_html", strip_html);
    tera.register_filter("sanitize", SanitizeFilter);
    tera.register_filter("domain", domain);
    tera.register_filter("format_date", format_date);
    tera.register_filter("reading_time", reading_time);
    tera.register_filter("pluralize", pluralize);
    tera.register_filter("filesize", filesize);
    tera.register_filter("excerpt", excerpt);
    tera.register_filter("split", split);
}

fn as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn arg_usize(args: &HashMap<String, Value>, name: &str, default: usize) -> usize {
    args.get(name)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

fn arg_str<'a>(args: &'a HashMap<String, Value>, name: &str, default: &'a str) -> &'a str {
    args.get(name).and_then(Value::as_str).unwrap_or(default)
}

/// Datetimes reach templates as RFC 3339 strings; naive ones are UTC
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

struct MarkdownFilter(Arc<MarkdownRenderer>);

impl Filter for MarkdownFilter {
    fn filter(&self, value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(Value::String(self.0.render(&as_text(value))))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

/// md5 of the trimmed, lowercased address
pub fn gravatar_hash(email: &str) -> String {
    format!("{:x}", md5::compute(email.trim().to_lowercase()))
}

fn gravatar(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(gravatar_hash(&as_text(value))))
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    if seconds < 0 {
        return "in the future".to_string();
    }
    match seconds {
        0..=59 => "just now".to_string(),
        60..=3_599 => plural(seconds / 60, "minute"),
        3_600..=86_399 => plural(seconds / 3_600, "hour"),
        86_400..=2_591_999 => plural(seconds / 86_400, "day"),
        2_592_000..=31_535_999 => plural(seconds / 2_592_000, "month"),
        _ => plural(seconds / 31_536_000, "year"),
    }
}

fn timeago(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = as_text(value);
    if text.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let then = parse_datetime(&text)
        .ok_or_else(|| tera::Error::msg(format!("timeago: not a datetime: {}", text)))?;
    Ok(Value::String(time_ago(then, Utc::now())))
}

/// Text content cut at a word boundary, or the input unchanged when short
fn truncate_text(html: &str, length: usize, suffix: &str) -> String {
    let text = strip_tags(html);
    if text.chars().count() <= length {
        return html.to_string();
    }
    let (cut, _) = truncate_chars(&text, length);
    format!("{}{}", cut, suffix)
}

fn truncate_html(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let length = arg_usize(args, "length", 100);
    let suffix = arg_str(args, "suffix", "...");
    Ok(Value::String(truncate_text(&as_text(value), length, suffix)))
}

fn strip_html(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(strip_tags(&as_text(value))))
}

static SCRIPT_BLOCKS: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>"));
static TAG: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)([^>]*)>"));
static ATTRIBUTE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
});
static CHAR_REFERENCE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"(?i)&(#x[0-9a-f]+|#[0-9]+|[a-z]+);?"));

const SAFE_SCHEMES: &[&str] = &["http", "https", "mailto"];

fn compiled(re: &'static Lazy<Result<Regex, regex::Error>>) -> Result<&'static Regex, regex::Error> {
    re.as_ref().map_err(Clone::clone)
}

/// Decode the character references a browser would resolve in an attribute
fn decode_char_references(value: &str, re: &Regex) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let body = caps[1].to_lowercase();
        let decoded = if let Some(hex) = body.strip_prefix("#x") {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = body.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
        } else {
            match body.as_str() {
                "colon" => Some(':'),
                "tab" => Some('\t'),
                "newline" => Some('\n'),
                "amp" => Some('&'),
                "sol" => Some('/'),
                _ => None,
            }
        };
        decoded.map(String::from).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Relative URLs and http, https or mailto links pass; any other scheme is refused
fn is_safe_url(raw: &str, references: &Regex) -> bool {
    let decoded: String = decode_char_references(raw, references)
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .collect::<String>()
        .to_lowercase();
    let scheme_end = decoded.find(|c| matches!(c, ':' | '/' | '?' | '#'));
    match scheme_end {
        Some(i) if decoded[i..].starts_with(':') => SAFE_SCHEMES.contains(&&decoded[..i]),
        _ => true,
    }
}

/// Keep whitelisted tags and attributes; drop `script` and `style` with
/// their content and every other tag without it.
pub fn sanitize_html(html: &str) -> Result<String, regex::Error> {
    let blocks = compiled(&SCRIPT_BLOCKS)?;
    let tag = compiled(&TAG)?;
    let attr = compiled(&ATTRIBUTE)?;
    let references = compiled(&CHAR_REFERENCE)?;

    let without_blocks = blocks.replace_all(html, "");
    let mut out = String::with_capacity(without_blocks.len());
    let mut last = 0;
    for caps in tag.captures_iter(&without_blocks) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&without_blocks[last..whole.start()]);
        last = whole.end();

        let name = caps[2].to_lowercase();
        if !ALLOWED_TAGS.contains(&name.as_str()) {
            continue;
        }
        if &caps[1] == "/" {
            out.push_str(&format!("</{}>", name));
            continue;
        }

        out.push('<');
        out.push_str(&name);
        let permitted = allowed_attributes(&name);
        for a in attr.captures_iter(&caps[3]) {
            let key = a[1].to_lowercase();
            if !permitted.contains(&key.as_str()) {
                continue;
            }
            let raw = a
                .get(2)
                .or_else(|| a.get(3))
                .or_else(|| a.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if (key == "href" || key == "src") && !is_safe_url(raw, references) {
                continue;
            }
            out.push_str(&format!(" {}=\"{}\"", key, raw.replace('"', "&quot;")));
        }
        out.push('>');
    }
    out.push_str(&without_blocks[last..]);
    Ok(out)
}

struct SanitizeFilter;

impl Filter for SanitizeFilter {
    fn filter(&self, value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
        sanitize_html(&as_text(value))
            .map(Value::String)
            .map_err(|e| tera::Error::msg(format!("sanitize: {}", e)))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

/// Host part of a URL, empty when there is none
pub fn url_domain(url: &str) -> String {
    let Some((_, rest)) = url.split_once("://") else {
        return String::new();
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    authority
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(authority)
        .to_string()
}

fn domain(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(url_domain(&as_text(value))))
}

fn format_date(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = as_text(value);
    if text.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let format = arg_str(args, "format", "%B %d, %Y");
    let date = parse_datetime(&text)
        .ok_or_else(|| tera::Error::msg(format!("format_date: not a datetime: {}", text)))?;
    Ok(Value::String(date.format(format).to_string()))
}

/// Minutes at 200 words per minute, at least one
pub fn reading_minutes(html: &str) -> usize {
    let words = strip_tags(html).split_whitespace().count();
    ((words as f64 / WORDS_PER_MINUTE as f64).round() as usize).max(1)
}

fn reading_time(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::from(reading_minutes(&as_text(value))))
}

fn pluralize(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let n = value
        .as_f64()
        .ok_or_else(|| tera::Error::msg("pluralize expects a number"))?;
    let suffix = if n == 1.0 {
        arg_str(args, "singular", "")
    } else {
        arg_str(args, "plural", "s")
    };
    Ok(Value::String(suffix.to_string()))
}

pub fn human_size(bytes: f64) -> String {
    let mut size = bytes;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

fn filesize(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let bytes = value
        .as_f64()
        .ok_or_else(|| tera::Error::msg("filesize expects a number"))?;
    Ok(Value::String(human_size(bytes)))
}

fn excerpt(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let length = arg_usize(args, "length", 150);
    Ok(Value::String(make_excerpt(&as_text(value), length)))
}

fn split(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = as_text(value);
    if text.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let delimiter = arg_str(args, "delimiter", ",");
    Ok(Value::Array(
        text.split(delimiter)
            .map(|part| Value::String(part.trim().to_string()))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn render(template: &str, context: &tera::Context) -> String {
        let mut tera = Tera::default();
        register_filters(&mut tera, Arc::new(MarkdownRenderer::new()));
        tera.add_raw_template("t", template).unwrap();
        tera.render("t", context).unwrap()
    }

    #[test]
    fn test_gravatar_hash() {
        assert_eq!(gravatar_hash("  MyEmailAddress@example.com "), "0bc83cb571cd1c50ba6f3e8a78ef1346");
    }

    #[test]
    fn test_time_ago() {
        let now = Utc::now();
        assert_eq!(time_ago(now - Duration::seconds(5), now), "just now");
        assert_eq!(time_ago(now - Duration::seconds(61), now), "1 minute ago");
        assert_eq!(time_ago(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(time_ago(now - Duration::days(1), now), "1 day ago");
        assert_eq!(time_ago(now - Duration::days(65), now), "2 months ago");
        assert_eq!(time_ago(now - Duration::days(800), now), "2 years ago");
    }

    #[test]
    fn test_sanitize() {
        let html = r#"<p onclick="x()">Hi <script>alert(1)</script><a href="javascript:bad()" title="t">l</a><a href="/ok" target="_blank">ok</a><div>kept text</div><style>p{}</style></p>"#;
        let clean = sanitize_html(html).unwrap();
        assert_eq!(
            clean,
            r#"<p>Hi <a title="t">l</a><a href="/ok">ok</a>kept text</p>"#
        );
    }

    #[test]
    fn test_sanitize_refuses_disguised_schemes() {
        let renderer = MarkdownRenderer::new();
        let comment = renderer.render(r#"<a href="java&#x73;cript:alert(1)">x</a>"#);
        let clean = sanitize_html(&comment).unwrap();
        assert!(!clean.contains("href"), "{}", clean);

        for href in [
            "java\tscript:alert(1)",
            "JaVaScRiPt:alert(1)",
            "&#106;avascript:alert(1)",
            "javascript&colon;alert(1)",
            " data:text/html;base64,PHNjcmlwdD4=",
        ] {
            let clean = sanitize_html(&format!(r#"<a href="{}">x</a>"#, href)).unwrap();
            assert_eq!(clean, "<a>x</a>", "{}", href);
        }

        for href in ["https://example.com", "mailto:me@example.com", "/post/a", "#top", "page?x=1:2"] {
            let clean = sanitize_html(&format!(r#"<a href="{}">x</a>"#, href)).unwrap();
            assert_eq!(clean, format!(r#"<a href="{}">x</a>"#, href));
        }
    }

    #[test]
    fn test_url_domain() {
        assert_eq!(url_domain("https://user@www.example.com:8080/path?q=1"), "www.example.com:8080");
        assert_eq!(url_domain("http://example.org"), "example.org");
        assert_eq!(url_domain("not a url"), "");
    }

    #[test]
    fn test_reading_and_sizes() {
        assert_eq!(reading_minutes("<p>short</p>"), 1);
        assert_eq!(reading_minutes(&"word ".repeat(1000)), 5);
        assert_eq!(human_size(512.0), "512.0 B");
        assert_eq!(human_size(1536.0), "1.5 KB");
        assert_eq!(human_size(5.0 * 1024.0 * 1024.0), "5.0 MB");
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("<b>short</b>", 100, "..."), "<b>short</b>");
        assert_eq!(
            truncate_text("<p>one two three four five</p>", 12, "..."),
            "one two..."
        );
    }

    #[test]
    fn test_filters_in_templates() {
        let mut ctx = tera::Context::new();
        ctx.insert("body", "# Hi");
        ctx.insert("n", &2);
        ctx.insert("tags", "a, b ,c");
        ctx.insert("date", "2024-03-05T10:00:00Z");
        ctx.insert("url", "https://example.com/x");

        assert_eq!(render("{{ body | markdown }}", &ctx).trim(), "<h1>Hi</h1>");
        assert_eq!(render("post{{ n | pluralize }}", &ctx), "posts");
        assert_eq!(
            render("{% for t in tags | split %}[{{ t }}]{% endfor %}", &ctx),
            "[a][b][c]"
        );
        assert_eq!(render("{{ date | format_date }}", &ctx), "March 05, 2024");
        assert_eq!(
            render(r#"{{ date | format_date(format="%Y/%m") }}"#, &ctx),
            "2024/03"
        );
        assert_eq!(render("{{ url | domain }}", &ctx), "example.com");
        assert_eq!(render("{{ 2048 | filesize }}", &ctx), "2.0 KB");
    }

    #[test]
    fn test_excerpt_filter() {
        let mut ctx = tera::Context::new();
        ctx.insert("text", &json!("<p>".to_string() + &"word ".repeat(50) + "</p>"));
        let out = render("{{ text | excerpt(length=20) }}", &ctx);
        assert!(out.ends_with("..."));
        assert!(!out.contains("&lt;p&gt;"));
    }
}
