//! Markdown rendering
//!
//! pulldown-cmark for parsing; fenced code blocks are highlighted by syntect
//! with CSS classes and always carry `class="language-{lang}"`.

use pulldown_cmark::{html, CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

use crate::services::text::escape_html;

/// Thread-safe renderer; loading the syntax set is the expensive part, so
/// share one instance.
pub struct MarkdownRenderer {
    syntax_set: SyntaxSet,
    options: Options,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_FOOTNOTES);
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            options,
        }
    }

    pub fn render(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, self.options);
        let events = self.process_events(parser);

        let mut output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut output, events.into_iter());
        output
    }

    /// Replace code blocks with pre-rendered HTML
    fn process_events<'a>(&self, parser: Parser<'a>) -> Vec<Event<'a>> {
        let mut events = Vec::new();
        let mut code: Option<(Option<String>, String)> = None;

        for event in parser {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => info
                            .split_whitespace()
                            .next()
                            .map(str::to_string)
                            .filter(|l| !l.is_empty()),
                        CodeBlockKind::Indented => None,
                    };
                    code = Some((lang, String::new()));
                }
                Event::Text(text) if code.is_some() => {
                    if let Some((_, buf)) = code.as_mut() {
                        buf.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((lang, buf)) = code.take() {
                        events.push(Event::Html(self.code_block(&buf, lang.as_deref()).into()));
                    }
                }
                other => events.push(other),
            }
        }
        events
    }

    fn code_block(&self, code: &str, lang: Option<&str>) -> String {
        let Some(lang) = lang else {
            return format!("<pre><code>{}</code></pre>\n", escape_html(code));
        };
        let class = escape_html(lang);
        let body = self
            .highlight(code, lang)
            .unwrap_or_else(|| escape_html(code));
        format!(
            "<pre class=\"highlight\"><code class=\"language-{}\">{}</code></pre>\n",
            class, body
        )
    }

    /// Classed spans for a known language, `None` otherwise
    fn highlight(&self, code: &str, lang: &str) -> Option<String> {
        let syntax = self
            .syntax_set
            .find_syntax_by_token(lang)
            .or_else(|| self.syntax_set.find_syntax_by_extension(lang))?;
        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntax_set, ClassStyle::Spaced);
        for line in LinesWithEndings::from(code) {
            generator
                .parse_html_for_line_which_includes_newline(line)
                .ok()?;
        }
        Some(generator.finalize())
    }
}
