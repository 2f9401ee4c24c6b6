//! The shared generation path: completion, normalization, sanitization and
//! metering. Article pages and journey summaries both go through here.

use crate::completion::{ChatCompletion, CompletionRequest, CompletionResult};
use crate::error::GenerationError;
use crate::metrics::{Metrics, PricingTable};
use crate::normalize;
use crate::sanitize::{self, InternalLink};
use serde::{Deserialize, Serialize};

/// A rendered, safe page with its links and metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPage {
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub internal_links: Vec<InternalLink>,
    #[serde(default)]
    pub external_links: Vec<String>,
    pub metrics: Metrics,
}

/// Turn a finished completion into a page.
pub fn render(result: &CompletionResult, model: &str, pricing: &PricingTable) -> GeneratedPage {
    let normalized = normalize::normalize(&result.content);
    let reasoning = normalized.reasoning_trace();
    let article = sanitize::process(&normalized.html);
    GeneratedPage {
        html: article.html,
        reasoning,
        internal_links: article.internal_links,
        external_links: article.external_links,
        metrics: Metrics::compute(&result.measurement, model, pricing),
    }
}

/// One completion call followed by [`render`]. Errors propagate untouched.
pub async fn generate<C: ChatCompletion>(
    client: &C,
    credential: Option<&str>,
    request: &CompletionRequest,
    pricing: &PricingTable,
) -> Result<GeneratedPage, GenerationError> {
    let result = client.complete(credential, request).await?;
    let page = render(&result, &request.model, pricing);
    tracing::debug!(
        "Rendered page: html_chars={}, internal_links={}, external_links={}",
        page.html.len(),
        page.internal_links.len(),
        page.external_links.len()
    );
    Ok(page)
}
