//! Text helpers shared by services and template filters

/// URL-friendly slug from a title.
///
/// Lowercases, turns spaces, underscores and ASCII punctuation into single
/// hyphens, and keeps non-ASCII letters.
pub fn generate_slug(title: &str) -> String {
    let mut result = String::with_capacity(title.len());
    let mut prev_hyphen = false;

    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || (!c.is_ascii() && c.is_alphanumeric()) {
            result.push(c);
            prev_hyphen = false;
        } else if !prev_hyphen && !result.is_empty() {
            result.push('-');
            prev_hyphen = true;
        }
    }

    result.trim_end_matches('-').to_string()
}

/// Remove HTML tags and collapse whitespace
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max_chars` characters, cut back to a word boundary when one is near
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > cut.len() / 2 => &cut[..pos],
        _ => cut.as_str(),
    };
    (trimmed.trim_end().to_string(), true)
}

/// Plain-text excerpt of markdown or HTML content, with `...` when cut
pub fn make_excerpt(content: &str, max_chars: usize) -> String {
    let plain = strip_html(content);
    let (text, cut) = truncate_chars(&plain, max_chars);
    if cut {
        format!("{}...", text)
    } else {
        text
    }
}

/// Escape text for HTML and XML bodies and attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Hello World"), "hello-world");
        assert_eq!(generate_slug("Hello, World!"), "hello-world");
        assert_eq!(generate_slug("  Hello   World  "), "hello-world");
        assert_eq!(generate_slug("hello_world"), "hello-world");
        assert_eq!(generate_slug("Café Society"), "café-society");
        assert_eq!(generate_slug("!!!"), "");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("no tags"), "no tags");
        assert_eq!(strip_html("<div>\n  a\n\n b </div>"), "a b");
    }

    #[test]
    fn test_make_excerpt() {
        assert_eq!(make_excerpt("<p>short</p>", 150), "short");
        let long = "word ".repeat(100);
        let excerpt = make_excerpt(&long, 150);
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.chars().count() <= 153);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_slug_is_url_safe(title in "[a-zA-Z0-9 ,.!_-]{0,40}") {
            let slug = generate_slug(&title);
            prop_assert!(!slug.starts_with('-'));
            prop_assert!(!slug.ends_with('-'));
            prop_assert!(!slug.contains("--"));
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn prop_slug_idempotent(title in "[a-zA-Z0-9 ]{0,40}") {
            let slug = generate_slug(&title);
            prop_assert_eq!(generate_slug(&slug), slug);
        }
    }
}
