//! Reply rendering - turns a message template into outbound text
//!
//! Templates use named placeholders; each category fills the subset it
//! needs. Rendering also refines the outbound category (notification
//! when a follow-up is expected, thanks when the exchange is closed)
//! and shortens the initiative URL when configured.

use std::sync::Arc;

use time::OffsetDateTime;
use time::format_description::OwnedFormatItem;

use crate::model::{AppPostCategory, ChallengeRef, MessageCategory, MessageTemplate};
use crate::ports::UrlShortener;

/// Configuration for the reply renderer
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// `time` format description for the `{date}` placeholder
    pub datetime_format: String,
    /// Whether initiative URLs are passed through the shortener
    pub shorten_urls: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            datetime_format: "[day]/[month]/[year] [hour]:[minute]".to_string(),
            shorten_urls: false,
        }
    }
}

/// Contribution texts a reply may refer to
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyContext<'a> {
    /// The contribution being acknowledged
    pub contribution: Option<&'a str>,
    /// The previously saved answer, when offering a change
    pub old_contribution: Option<&'a str>,
    /// The newly proposed answer, when offering a change
    pub new_contribution: Option<&'a str>,
}

/// A reply ready to be enqueued
#[derive(Debug, Clone)]
pub struct RenderedReply {
    pub text: String,
    pub category: AppPostCategory,
    pub short_url: Option<String>,
}

pub struct ReplyRenderer {
    shortener: Arc<dyn UrlShortener>,
    format: Option<OwnedFormatItem>,
}

impl ReplyRenderer {
    pub fn new(shortener: Arc<dyn UrlShortener>, config: RenderConfig) -> Self {
        let format = match time::format_description::parse_owned::<2>(&config.datetime_format) {
            Ok(format) => Some(format),
            Err(error) => {
                tracing::warn!(
                    format = %config.datetime_format,
                    error = %error,
                    "Invalid datetime format, falling back to RFC 3339"
                );
                None
            }
        };
        let shortener = if config.shorten_urls {
            shortener
        } else {
            Arc::new(PassthroughShortener)
        };
        Self { shortener, format }
    }

    /// Render `template` for its category. `author_name` is the
    /// recipient's printable handle.
    pub async fn render(
        &self,
        template: &MessageTemplate,
        challenge: ChallengeRef<'_>,
        author_name: &str,
        context: ReplyContext<'_>,
        now: OffsetDateTime,
    ) -> RenderedReply {
        let category = outbound_category(template.category);

        let short_url = match template.category {
            MessageCategory::ThanksContribution | MessageCategory::ThanksChange => {
                match challenge.initiative.url.as_deref() {
                    Some(url) => Some(self.shortener.shorten(url).await),
                    None => None,
                }
            }
            _ => None,
        };

        let date = self.format_date(now);
        let mut text = template.body.clone();
        for (placeholder, value) in [
            ("{author}", author_name),
            ("{hashtag}", &challenge.challenge.hashtag),
            ("{date}", &date),
            ("{url}", short_url.as_deref().unwrap_or("")),
            ("{contribution}", context.contribution.unwrap_or("")),
            ("{old_contribution}", context.old_contribution.unwrap_or("")),
            ("{new_contribution}", context.new_contribution.unwrap_or("")),
            (
                "{answer_terms}",
                template.answer_terms.as_deref().unwrap_or(""),
            ),
        ] {
            if text.contains(placeholder) {
                text = text.replace(placeholder, value);
            }
        }

        RenderedReply {
            text,
            category,
            short_url,
        }
    }

    fn format_date(&self, now: OffsetDateTime) -> String {
        let formatted = match &self.format {
            Some(format) => now.format(format),
            None => now.format(&time::format_description::well_known::Rfc3339),
        };
        formatted.unwrap_or_else(|_| now.to_string())
    }
}

/// Which outbound category a reply template produces: thanks replies
/// close the exchange, everything else expects a follow-up
fn outbound_category(category: MessageCategory) -> AppPostCategory {
    match category {
        MessageCategory::ThanksContribution | MessageCategory::ThanksChange => {
            AppPostCategory::Thanks
        }
        _ => AppPostCategory::Notification,
    }
}

/// Shortener used when URL shortening is disabled
struct PassthroughShortener;

#[async_trait::async_trait]
impl UrlShortener for PassthroughShortener {
    async fn shorten(&self, url: &str) -> String {
        url.to_string()
    }
}
