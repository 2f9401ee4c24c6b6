//! Cleans raw model output into article HTML.
//!
//! Models wrap their HTML inconsistently: sometimes in an `html` fence,
//! sometimes in an untagged fence, sometimes with only a dangling opening
//! fence when output is cut short. Reasoning models also emit `<think>`
//! blocks, usually ahead of the fence, which become collapsible disclosure
//! elements. Only a fence that opens or closes the article is stripped, so a
//! code sample inside the prose survives.

use regex::Regex;
use std::sync::LazyLock;

static LEADING_THINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\A(?:\s*<think>.*?</think>)+").expect("valid regex"));
static HTML_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\A\s*```[ \t]*html\b[^\n]*\n?(.*?)\s*(?:```\s*)?\z").expect("valid regex")
});
static GENERIC_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A\s*```[^\n]*\n(.*?)\s*```\s*\z").expect("valid regex")
});
static BARE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\A\s*```(?:html)?\s*").expect("valid regex"));
static BARE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```\s*\z").expect("valid regex"));
static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>(.*?)</think>").expect("valid regex"));

pub const REASONING_SUMMARY: &str = "AI Thought Process";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Normalized {
    pub html: String,
    /// Trimmed text of every `<think>` region, in document order.
    pub reasoning: Vec<String>,
}

impl Normalized {
    pub fn reasoning_trace(&self) -> Option<String> {
        if self.reasoning.is_empty() {
            None
        } else {
            Some(self.reasoning.join("\n\n"))
        }
    }
}

/// Fence stripping applies to the text after any leading `<think>` blocks;
/// those blocks are kept and turned into disclosures with the rest.
pub fn normalize(raw: &str) -> Normalized {
    let body_start = LEADING_THINK.find(raw).map_or(0, |m| m.end());
    let (thinking, body) = raw.split_at(body_start);
    let unfenced = strip_code_fences(body);
    let joined = if thinking.is_empty() {
        unfenced
    } else {
        format!("{}\n{}", thinking.trim(), unfenced)
    };
    extract_reasoning(&joined)
}

/// Remove a markdown fence wrapping the article. Tries an `html`-tagged
/// fence opening the text (closing fence optional), then a generic fence
/// spanning the whole text, then bare fence markers at either end.
pub fn strip_code_fences(raw: &str) -> String {
    if let Some(caps) = HTML_FENCE.captures(raw) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = GENERIC_FENCE.captures(raw) {
        return caps[1].trim().to_string();
    }
    let opened = BARE_OPEN.replace(raw, "");
    let closed = BARE_CLOSE.replace(&opened, "");
    closed.trim().to_string()
}

/// Replace each `<think>...</think>` region in place with a disclosure
/// element. Text without think regions is returned unchanged.
pub fn extract_reasoning(html: &str) -> Normalized {
    let mut reasoning = Vec::new();
    let replaced = THINK_BLOCK.replace_all(html, |caps: &regex::Captures<'_>| {
        let inner = caps[1].trim().to_string();
        let block = disclosure(&inner);
        reasoning.push(inner);
        block
    });
    Normalized {
        html: replaced.into_owned(),
        reasoning,
    }
}

// The trace is prose, so it is escaped and shown verbatim.
fn disclosure(trace: &str) -> String {
    format!(
        "<details class=\"reasoning-trace\"><summary class=\"reasoning-summary\">{}</summary>\
         <div class=\"reasoning-body\">{}</div></details>",
        REASONING_SUMMARY,
        ammonia::clean_text(trace)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_html_fence() {
        assert_eq!(
            strip_code_fences("```html\n<h1>Cats</h1>\n<p>Meow</p>\n```"),
            "<h1>Cats</h1>\n<p>Meow</p>"
        );
        assert_eq!(strip_code_fences("  ```HTML\n<p>x</p>\n```\n"), "<p>x</p>");
    }

    #[test]
    fn falls_back_to_generic_fence() {
        assert_eq!(strip_code_fences("```\n<p>x</p>\n```"), "<p>x</p>");
        assert_eq!(strip_code_fences("  ```xml\n<p>y</p>\n```  "), "<p>y</p>");
    }

    #[test]
    fn strips_dangling_fence_markers() {
        assert_eq!(strip_code_fences("```html\n<p>cut off"), "<p>cut off");
        assert_eq!(strip_code_fences("<p>tail</p>\n```"), "<p>tail</p>");
    }

    #[test]
    fn plain_html_is_untouched() {
        assert_eq!(strip_code_fences("<p>plain</p>"), "<p>plain</p>");
    }

    #[test]
    fn inline_code_sample_is_not_mistaken_for_a_wrapper() {
        let raw = "<h1>HTML</h1><p>Markup example:</p>\n```html\n<p>hi</p>\n```\n<p>More prose.</p>";
        let out = normalize(raw);
        assert_eq!(out.html, raw);
        assert!(out.reasoning.is_empty());
    }

    #[test]
    fn thinking_ahead_of_the_fence_is_kept() {
        let out = normalize("<think>plan the article</think>\n```html\n<h1>Cats</h1>\n```");
        assert_eq!(out.reasoning, vec!["plan the article".to_string()]);
        let trace = out.html.find("reasoning-trace").unwrap();
        let title = out.html.find("<h1>Cats</h1>").unwrap();
        assert!(trace < title);
        assert!(!out.html.contains("```"));
    }

    #[test]
    fn several_leading_think_blocks_then_generic_fence() {
        let out = normalize("<think>a</think>\n<think>b</think>\n```\n<p>body</p>\n```");
        assert_eq!(out.reasoning, vec!["a".to_string(), "b".to_string()]);
        assert!(out.html.ends_with("<p>body</p>"));
    }

    #[test]
    fn extracts_multiple_think_regions_in_place() {
        let raw = "<THINK>\n plan a \n</think><h1>T</h1><think>b < c</think><p>end</p>";
        let out = extract_reasoning(raw);
        assert_eq!(out.reasoning, vec!["plan a".to_string(), "b < c".to_string()]);

        let first = out.html.find("plan").unwrap();
        let title = out.html.find("<h1>T</h1>").unwrap();
        let second = out.html.find("&lt;").unwrap();
        let end = out.html.find("<p>end</p>").unwrap();
        assert!(first < title && title < second && second < end);
        assert_eq!(out.html.matches("<details").count(), 2);
        assert!(!out.html.to_lowercase().contains("<think>"));
    }

    #[test]
    fn extraction_is_idempotent() {
        let once = normalize("```html\n<think>why</think><p>body</p>\n```");
        let twice = extract_reasoning(&once.html);
        assert_eq!(twice.html, once.html);
        assert!(twice.reasoning.is_empty());
        assert_eq!(once.reasoning_trace().as_deref(), Some("why"));
    }
}
