//! Sanitization and link rewriting for generated articles.
//!
//! Model output is untrusted. `sanitize` reduces it to a safe HTML subset
//! (plus the disclosure elements, `class`, `target` and the `data-prompt`
//! navigation attribute). `rewrite_links` then tokenizes the sanitized markup
//! with html5ever and walks its anchors: absolute http(s) links are marked
//! external and forced into a new browsing context without an opener; every
//! other anchor becomes an [`InternalLink`] and is stamped with its index in
//! [`SanitizedArticle::internal_links`].

use html5ever::buffer_queue::BufferQueue;
use html5ever::interface::Attribute;
use html5ever::serialize::{HtmlSerializer, SerializeOpts, Serializer};
use html5ever::tendril::StrTendril;
use html5ever::tokenizer::{Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer};
use html5ever::{local_name, ns, LocalName, QualName};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io;

/// Attribute carrying the next topic (usually a pre-chained context path).
pub const NAVIGATION_ATTR: &str = "data-prompt";
/// Index of an internal anchor's record in `internal_links`.
pub const LINK_INDEX_ATTR: &str = "data-link";
pub const EXTERNAL_LINK_CLASS: &str = "external-link";
const EXTERNAL_REL: &str = "noopener noreferrer";

/// An in-app link: what the reader sees and what the next prompt will be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalLink {
    pub display_text: String,
    pub navigation_prompt: Option<String>,
}

impl InternalLink {
    /// The topic to navigate to: the navigation prompt when present,
    /// otherwise the visible link text. `None` for an anchor with neither,
    /// such as a bare image link.
    pub fn next_topic(&self) -> Option<&str> {
        resolve_link_topic(self.navigation_prompt.as_deref(), &self.display_text)
    }
}

/// Topic for a clicked internal link, or `None` if both sources are blank.
pub fn resolve_link_topic<'a>(navigation_prompt: Option<&'a str>, text: &'a str) -> Option<&'a str> {
    navigation_prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or_else(|| Some(text.trim()).filter(|t| !t.is_empty()))
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SanitizedArticle {
    pub html: String,
    /// One record per internal anchor, in document order.
    pub internal_links: Vec<InternalLink>,
    pub external_links: Vec<String>,
}

/// Sanitize and rewrite in one step.
pub fn process(html: &str) -> SanitizedArticle {
    rewrite_links(&sanitize(html))
}

pub fn sanitize(html: &str) -> String {
    ammonia::Builder::default()
        .add_tags(&["details", "summary"])
        .add_generic_attributes(&["class"])
        .add_tag_attributes("a", &[NAVIGATION_ATTR, "target"])
        .add_tag_attributes("details", &["open"])
        // rel is decided per link in `rewrite_links`.
        .link_rel(None)
        .clean(html)
        .to_string()
}

pub fn is_external_href(href: &str) -> bool {
    match url::Url::parse(href.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

#[derive(Default)]
struct TokenCollector {
    tokens: RefCell<Vec<Token>>,
}

impl TokenSink for TokenCollector {
    type Handle = ();

    fn process_token(&self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        self.tokens.borrow_mut().push(token);
        TokenSinkResult::Continue
    }
}

fn tokenize(html: &str) -> Vec<Token> {
    let input = BufferQueue::default();
    input.push_back(StrTendril::from_slice(html));
    let tokenizer = Tokenizer::new(TokenCollector::default(), Default::default());
    let _ = tokenizer.feed(&input);
    tokenizer.end();
    tokenizer.sink.tokens.take()
}

fn html_name(local: LocalName) -> QualName {
    QualName::new(None, ns!(html), local)
}

// Same set the serializer treats as childless; it expects an `end_elem`
// for each of them even though the markup has no end tag.
fn is_void(name: &LocalName) -> bool {
    matches!(
        *name,
        local_name!("area")
            | local_name!("base")
            | local_name!("basefont")
            | local_name!("bgsound")
            | local_name!("br")
            | local_name!("col")
            | local_name!("embed")
            | local_name!("frame")
            | local_name!("hr")
            | local_name!("img")
            | local_name!("input")
            | local_name!("keygen")
            | local_name!("link")
            | local_name!("meta")
            | local_name!("param")
            | local_name!("source")
            | local_name!("track")
            | local_name!("wbr")
    )
}

fn attr<'a>(tag: &'a Tag, name: &str) -> Option<&'a str> {
    tag.attrs
        .iter()
        .find(|a| &*a.name.local == name)
        .map(|a| &*a.value)
}

fn set_attr(tag: &mut Tag, name: &str, value: &str) {
    match tag.attrs.iter_mut().find(|a| &*a.name.local == name) {
        Some(existing) => existing.value = StrTendril::from_slice(value),
        None => tag.attrs.push(Attribute {
            name: QualName::new(None, ns!(), LocalName::from(name)),
            value: StrTendril::from_slice(value),
        }),
    }
}

fn with_external_class(existing: Option<&str>) -> String {
    match existing.map(str::trim) {
        Some(classes) if classes.split_whitespace().any(|c| c == EXTERNAL_LINK_CLASS) => {
            classes.to_string()
        }
        Some(classes) if !classes.is_empty() => format!("{} {}", classes, EXTERNAL_LINK_CLASS),
        _ => EXTERNAL_LINK_CLASS.to_string(),
    }
}

/// Post-sanitization pass over anchors. Expects sanitizer output.
pub fn rewrite_links(safe_html: &str) -> SanitizedArticle {
    match rewrite(safe_html) {
        Ok(article) => article,
        Err(e) => {
            tracing::warn!("Link rewriting failed, serving sanitized markup as is: {}", e);
            SanitizedArticle {
                html: safe_html.to_string(),
                ..SanitizedArticle::default()
            }
        }
    }
}

fn rewrite(safe_html: &str) -> io::Result<SanitizedArticle> {
    let opts = SerializeOpts {
        create_missing_parent: true,
        ..SerializeOpts::default()
    };
    let mut serializer = HtmlSerializer::new(Vec::new(), opts);
    let mut internal_links: Vec<InternalLink> = Vec::new();
    let mut external_links = Vec::new();
    // Visible text of the internal anchor currently open, if any.
    let mut anchor_text: Option<String> = None;

    for token in tokenize(safe_html) {
        match token {
            Token::TagToken(mut tag) => match tag.kind {
                TagKind::StartTag => {
                    if tag.name == local_name!("a") {
                        let href = attr(&tag, "href").unwrap_or_default().to_string();
                        if is_external_href(&href) {
                            let class = with_external_class(attr(&tag, "class"));
                            set_attr(&mut tag, "class", &class);
                            set_attr(&mut tag, "target", "_blank");
                            set_attr(&mut tag, "rel", EXTERNAL_REL);
                            external_links.push(href);
                        } else {
                            let navigation_prompt = attr(&tag, NAVIGATION_ATTR)
                                .map(str::trim)
                                .filter(|p| !p.is_empty())
                                .map(str::to_string);
                            set_attr(&mut tag, LINK_INDEX_ATTR, &internal_links.len().to_string());
                            internal_links.push(InternalLink {
                                display_text: String::new(),
                                navigation_prompt,
                            });
                            anchor_text = Some(String::new());
                        }
                    }
                    let name = html_name(tag.name.clone());
                    serializer.start_elem(
                        name.clone(),
                        tag.attrs.iter().map(|a| (&a.name, &*a.value)),
                    )?;
                    if is_void(&tag.name) {
                        serializer.end_elem(name)?;
                    }
                }
                TagKind::EndTag => {
                    if tag.name == local_name!("a") {
                        if let (Some(text), Some(link)) = (anchor_text.take(), internal_links.last_mut()) {
                            link.display_text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                        }
                    }
                    if !is_void(&tag.name) {
                        serializer.end_elem(html_name(tag.name))?;
                    }
                }
            },
            Token::CharacterTokens(text) => {
                if let Some(buf) = anchor_text.as_mut() {
                    buf.push_str(&text);
                }
                serializer.write_text(&text)?;
            }
            Token::CommentToken(text) => serializer.write_comment(&text)?,
            _ => {}
        }
    }

    Ok(SanitizedArticle {
        html: String::from_utf8_lossy(&serializer.writer).into_owned(),
        internal_links,
        external_links,
    })
}
