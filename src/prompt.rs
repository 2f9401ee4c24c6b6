//! Prompt construction and the context-chain policy.
//!
//! A context chain is the walked path of topics joined by
//! [`CHAIN_SEPARATOR`], e.g. `Apple (fruit) > Seeds > Germination`. Generated
//! links carry a chain in their `data-prompt` attribute, so following a link
//! yields a topic that is already chained; a typed search gets the walked
//! path appended as an explicit annotation instead.

use serde::{Deserialize, Serialize};

pub const CHAIN_SEPARATOR: &str = " > ";
/// Only the most recent part of a long walk is sent along.
pub const MAX_CHAIN_TOPICS: usize = 12;
pub const ABOUT_TOPIC: &str = "About LatentSpace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStyle {
    /// Short but sweet (< 5k tokens).
    Short,
    /// Elaborative (> 5k tokens).
    #[default]
    Elaborative,
}

impl ArticleStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Elaborative => "elaborative",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            Self::Short => SHORT_TEMPLATE,
            Self::Elaborative => ELABORATIVE_TEMPLATE,
        }
    }
}

impl std::str::FromStr for ArticleStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "elaborative" => Ok(Self::Elaborative),
            other => Err(format!("unknown article style '{}'", other)),
        }
    }
}

const BASE_SYSTEM_PROMPT: &str = r##"You are the engine of "LatentSpace", a recursive encyclopedia.
Write an encyclopedia article, as HTML, about the topic the user gives you.

**Output rules:**
1. Return ONLY the HTML for the article body. Do NOT wrap it in <html>, <head> or <body>. Do NOT use markdown code fences.
2. Style every element with Tailwind CSS classes.
3. **Internal links (mandatory):** hyperlink nearly every proper noun, technical term and distinct concept so the reader can keep surfing:
   <a href="#" data-prompt="Current Topic > Linked Concept" class="text-blue-600 hover:underline">link text</a>
   - The `data-prompt` attribute carries the context chain: the focus of this article, the separator " > ", then the linked concept.
   - Example: in an article about "Apple (fruit)", a link on "seeds" gets data-prompt="Apple (fruit) > Seeds".
   - Example: in an article about "Apple Inc.", a link on "Jobs" gets data-prompt="Apple Inc. > Steve Jobs".
4. **External references:** only for real, well-known resources, use an absolute URL and no data-prompt:
   <a href="https://..." class="text-blue-600 hover:underline">link text</a>

**Content style:**
- Encyclopedic, neutral and informative.
- If the topic is abstract or fictional, treat it as real within the Latent Space."##;

const SHORT_TEMPLATE: &str = r##"**Length and structure (short but sweet, well under 5,000 tokens):**
- A title (h1) with class "text-3xl font-serif font-medium mb-4 border-b border-gray-200 pb-2".
- A single lead paragraph (p) with class "mb-4 leading-relaxed text-gray-800".
- Two to four sections (h2) with class "text-2xl font-serif font-medium mt-8 mb-4 border-b border-gray-200 pb-1", one or two paragraphs each.
- No infobox."##;

const ELABORATIVE_TEMPLATE: &str = r##"**Length and structure (elaborative, more than 5,000 tokens):**
- A title (h1) with class "text-3xl font-serif font-medium mb-4 border-b border-gray-200 pb-2".
- An infobox (div) floated right with class "float-right ml-6 mb-6 w-72 bg-gray-50 border border-gray-200 p-4 text-sm hidden lg:block".
- A lead section of several paragraphs (p) with class "mb-4 leading-relaxed text-gray-800".
- At least six sections (h2) with class "text-2xl font-serif font-medium mt-8 mb-4 border-b border-gray-200 pb-1", with h3 subsections where useful.
- Lists (ul/ol) with class "list-disc pl-6 mb-4 space-y-2"."##;

const ABOUT_PROMPT: &str = r##"Generate a technical "About" page for "LatentSpace" written as an encyclopedia article about the software itself.

**Key technical details to include:**
- **Concept:** a recursive, generative encyclopedia in which every article is produced on demand by a language model, exploring the model's "latent space".
- **Architecture:** a Rust service built on Tokio and axum that serves a small single-page interface and a JSON API.
- **AI engine:** an OpenAI-compatible chat-completions client (Cerebras by default) with optional token streaming, measuring time-to-first-token, tokens per second and cost.
- **Navigation:** a history engine with browser semantics (push discards the forward branch, back, forward) and request-generation tokens so a late response never overwrites newer navigation.
- **Latent links:** every generated link carries a context chain in its data-prompt attribute, so each next article stays coherent with the path taken.
- **Response pipeline:** code-fence stripping, reasoning-trace extraction into collapsible panels, allow-list HTML sanitization, and external links forced into a new tab without an opener.
- **Journey retrospective:** going home summarizes the path as a visual timeline drawn by a "Cartographer" persona.
- **Bring your own key:** the user's API key, model, article style and dark-mode preference are persisted locally.

Treat "LatentSpace" as a significant software project and keep the neutral, informative tone of the encyclopedia."##;

const JOURNEY_SYSTEM_PROMPT: &str = "You are a creative web designer and writer.";

/// Whether a topic already carries a context chain.
pub fn is_chained(topic: &str) -> bool {
    topic.contains(CHAIN_SEPARATOR)
}

/// The last segment of a chain (the topic itself when unchained).
pub fn focus_segment(topic: &str) -> &str {
    topic
        .rsplit(CHAIN_SEPARATOR)
        .map(str::trim)
        .find(|segment| !segment.is_empty())
        .unwrap_or_else(|| topic.trim())
}

/// Ordered path of topic focuses, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextChain {
    topics: Vec<String>,
}

impl ContextChain {
    /// Build from walked topics in traversal order. Chained topics contribute
    /// their focus segment, blanks and immediate repeats are dropped, and only
    /// the last [`MAX_CHAIN_TOPICS`] are kept.
    pub fn from_path<S: AsRef<str>>(path: &[S]) -> Self {
        let mut topics: Vec<String> = Vec::new();
        for topic in path {
            let focus = focus_segment(topic.as_ref());
            if focus.is_empty() || topics.last().is_some_and(|last| last == focus) {
                continue;
            }
            topics.push(focus.to_string());
        }
        if topics.len() > MAX_CHAIN_TOPICS {
            topics.drain(..topics.len() - MAX_CHAIN_TOPICS);
        }
        Self { topics }
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn encode(&self) -> String {
        self.topics.join(CHAIN_SEPARATOR)
    }

    /// The chain followed by `topic`.
    pub fn extended_with(&self, topic: &str) -> String {
        if self.is_empty() {
            topic.to_string()
        } else {
            format!("{}{}{}", self.encode(), CHAIN_SEPARATOR, topic)
        }
    }
}

/// Topic for exploring a text selection inside the article about `context_topic`.
pub fn selection_topic(context_topic: &str, selection: &str) -> Option<String> {
    let selection = selection.split_whitespace().collect::<Vec<_>>().join(" ");
    if selection.is_empty() {
        return None;
    }
    let context = focus_segment(context_topic);
    if context.is_empty() {
        Some(selection)
    } else {
        Some(format!("{}{}{}", context, CHAIN_SEPARATOR, selection))
    }
}

/// System + user prompt for one article. `history_topics` is the walked path
/// up to (and including) the current record.
pub fn build_article_prompt<S: AsRef<str>>(
    topic: &str,
    history_topics: &[S],
    style: ArticleStyle,
) -> Prompt {
    let system = format!("{}\n\n{}", BASE_SYSTEM_PROMPT, style.template());
    let topic = topic.trim();

    if topic == ABOUT_TOPIC {
        return Prompt {
            system,
            user: ABOUT_PROMPT.to_string(),
        };
    }

    let mut user = format!("Generate an article about: {}", topic);
    if is_chained(topic) {
        user.push_str(&format!(
            "\n\nThis topic is a context chain separated by \"{sep}\". The earlier segments are the path \
             the reader followed; write the article about the final segment, \"{focus}\", as it is \
             understood in that context.",
            sep = CHAIN_SEPARATOR.trim(),
            focus = focus_segment(topic),
        ));
    } else {
        let chain = ContextChain::from_path(history_topics);
        if !chain.is_empty() {
            user.push_str(&format!(
                "\n\nContext chain: {}\nThe reader arrived here along this path. Interpret the topic in \
                 that context, but write the article about \"{}\".",
                chain.extended_with(topic),
                topic,
            ));
        }
    }

    Prompt { system, user }
}

/// Prompt for the journey retrospective. Only topic names are sent.
pub fn build_journey_prompt<S: AsRef<str>>(topics: &[S]) -> Prompt {
    let arrow_path = topics
        .iter()
        .map(|t| focus_segment(t.as_ref()).to_string())
        .collect::<Vec<_>>()
        .join(" → ");
    let steps = topics
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {} (data-prompt: \"{}\")", i + 1, focus_segment(t.as_ref()), t.as_ref()))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        r##"You are the "Cartographer of Latent Space".
The user has just completed a journey through the following topics: {arrow_path}.

Steps, in order:
{steps}

Generate a beautiful, visual summary of this journey in HTML using Tailwind CSS.

**Design requirements:**
1. **Title:** "Journey Retrospective" (h1) in a minimalist, high-contrast black and white style.
2. **Intro:** a short, poetic paragraph about the thematic thread connecting these topics.
3. **Visual flow:** a vertical timeline.
   - Use a simple vertical line (border-l-2 border-black) with circular nodes for each step, laid out with flexbox: the step number on the left of the line, a content card on the right.
   - For each step, show the topic as a clickable link: <a href="#" data-prompt="..." class="...">Topic</a>, using the data-prompt value listed above.
   - Add one sentence on why the step was interesting.
4. **Synthesis:** a section titled "Synthesis" that explains how these topics relate to each other conceptually. Do NOT retell the journey as a sequence of steps; describe the ideas and their connections directly.
5. **Future paths:** suggest 3 new divergent paths based on the whole journey, each as a data-prompt link.

**Technical rules:**
- Return ONLY HTML, styled with Tailwind CSS.
- Every internal link must carry a data-prompt attribute.
- Do NOT include markdown code fences.
- Do NOT use inline SVG; build the timeline from CSS borders and shapes."##
    );

    Prompt {
        system: JOURNEY_SYSTEM_PROMPT.to_string(),
        user,
    }
}
