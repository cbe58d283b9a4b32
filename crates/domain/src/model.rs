//! Domain models and value objects

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Sentinel for challenges that accept any number of answers per author
pub const NO_ANSWER_LIMIT: i64 = -1;

/// Reply template categories, one per conversational situation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    ThanksContribution,
    IncorrectAnswer,
    AskChangeContribution,
    ThanksChange,
    ContributionCannotSave,
    LimitAnswersReached,
    RequestAuthorExtrainfo,
    IncorrectAuthorExtrainfo,
    AuthorBanned,
    NotUnderstandableChangeContributionReply,
    AlreadyAnsweredUnchangeableChallenge,
}

/// How a challenge expects its answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStyle {
    #[default]
    Free,
    Structured,
}

/// Lifecycle state of a contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Temporary,
    Permanent,
    Discarded,
}

impl ContributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::Permanent => "permanent",
            Self::Discarded => "discarded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temporary" => Some(Self::Temporary),
            "permanent" => Some(Self::Permanent),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }
}

/// Category of a post authored by the application itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppPostCategory {
    /// Initial prompt inviting the public into a challenge
    Engagement,
    /// Promotional post for an initiative
    Promotion,
    /// Reply that expects a conversational follow-up
    Notification,
    /// Terminal thank-you reply
    Thanks,
}

impl AppPostCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engagement => "engagement",
            Self::Promotion => "promotion",
            Self::Notification => "notification",
            Self::Thanks => "thanks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "engagement" => Some(Self::Engagement),
            "promotion" => Some(Self::Promotion),
            "notification" => Some(Self::Notification),
            "thanks" => Some(Self::Thanks),
            _ => None,
        }
    }

    /// Whether a post in this category waits for a reply from its recipient
    pub fn expects_answer(&self) -> bool {
        matches!(self, Self::Notification)
    }
}

/// How an outbound message is delivered through a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Public,
    Reply,
    Direct,
}

impl DeliveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Reply => "reply",
            Self::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "reply" => Some(Self::Reply),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

/// A reusable reply template configured per campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: i64,
    pub name: String,
    /// Body with named placeholders ({author}, {hashtag}, {date}, ...)
    pub body: String,
    pub category: MessageCategory,
    /// Whitespace-separated terms that must all appear in a sent instance
    /// of this template; used to recognize which template a notification
    /// came from when a reply arrives
    pub key_terms: String,
    /// Terms that count as an affirmative reply to a change offer
    pub answer_terms: Option<String>,
    pub language: String,
}

impl MessageTemplate {
    /// Whether every key term literally appears in `text` (case-insensitive)
    pub fn matches_text(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        self.key_terms
            .split_whitespace()
            .all(|term| haystack.contains(&term.to_lowercase()))
    }
}

/// Secondary data requirement attached to a campaign (e.g. a postal code)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraInfo {
    pub name: String,
    pub description: Option<String>,
    /// Regex a single whitespace-delimited token of the reply must match
    pub answer_format: String,
    pub messages: Vec<MessageTemplate>,
}

impl ExtraInfo {
    pub fn message(&self, category: MessageCategory) -> Option<&MessageTemplate> {
        self.messages.iter().find(|m| m.category == category)
    }
}

/// A single question or call-to-action participants answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub name: String,
    pub hashtag: String,
    pub answer_style: AnswerStyle,
    /// Regex searched for in structured answers
    pub answer_format: Option<String>,
    pub max_answer_length: Option<usize>,
    /// Number of allowed answers from the same author; -1 for no limit
    pub answers_from_same_author: i64,
    pub accept_changes: bool,
    pub url: Option<String>,
}

/// A themed sub-effort bundling challenges and reply templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub hashtag: Option<String>,
    pub extra_info: Option<ExtraInfo>,
    pub messages: Vec<MessageTemplate>,
    pub challenges: Vec<Challenge>,
}

impl Campaign {
    pub fn message(&self, category: MessageCategory) -> Option<&MessageTemplate> {
        self.messages.iter().find(|m| m.category == category)
    }

    /// Campaign templates followed by the extra-info requirement's own
    pub fn all_messages(&self) -> impl Iterator<Item = &MessageTemplate> {
        self.messages
            .iter()
            .chain(self.extra_info.iter().flat_map(|e| e.messages.iter()))
    }

    /// Recognize which template a previously sent notification came from:
    /// the first template all of whose key terms appear in the text
    pub fn template_for_text(&self, text: &str) -> Option<&MessageTemplate> {
        self.all_messages().find(|m| m.matches_text(text))
    }
}

/// Top-level campaign umbrella with its own hashtag and channel identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initiative {
    pub id: i64,
    pub name: String,
    pub organizer: String,
    pub hashtag: String,
    pub url: Option<String>,
    pub language: String,
    /// id_in_channel of the account the initiative posts from
    pub account_id: String,
    /// Canonical text behind the initiative's social sharing buttons
    pub sharing_message: Option<String>,
    pub campaigns: Vec<Campaign>,
}

/// Identifies a challenge together with its owning campaign and initiative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeKey {
    pub initiative_id: i64,
    pub campaign_id: i64,
    pub challenge_id: i64,
}

/// Borrowed view of a challenge in its configuration context
#[derive(Debug, Clone, Copy)]
pub struct ChallengeRef<'a> {
    pub initiative: &'a Initiative,
    pub campaign: &'a Campaign,
    pub challenge: &'a Challenge,
}

impl ChallengeRef<'_> {
    pub fn key(&self) -> ChallengeKey {
        ChallengeKey {
            initiative_id: self.initiative.id,
            campaign_id: self.campaign.id,
            challenge_id: self.challenge.id,
        }
    }
}

/// The full campaign configuration graph, loaded once and immutable at
/// runtime, with a fingerprint for startup logging and diagnostics
#[derive(Debug, Clone)]
pub struct CampaignSet {
    pub initiatives: Vec<Initiative>,
    pub fingerprint: String,
}

impl CampaignSet {
    pub fn new(initiatives: Vec<Initiative>) -> Self {
        let mut hasher = Sha256::new();
        for initiative in &initiatives {
            hasher.update(initiative.hashtag.as_bytes());
            hasher.update(initiative.account_id.as_bytes());
            for campaign in &initiative.campaigns {
                hasher.update(campaign.name.as_bytes());
                for challenge in &campaign.challenges {
                    hasher.update(challenge.hashtag.as_bytes());
                }
                for message in campaign.all_messages() {
                    hasher.update(message.body.as_bytes());
                }
            }
        }
        let fingerprint = format!("{:x}", hasher.finalize());

        Self {
            initiatives,
            fingerprint,
        }
    }

    /// Find the initiative whose hashtag appears among `hashtags`
    pub fn initiative_for_hashtags(&self, hashtags: &[String]) -> Option<&Initiative> {
        self.initiatives.iter().find(|initiative| {
            let tag = initiative.hashtag.to_lowercase();
            hashtags.iter().any(|h| h.trim() == tag.trim())
        })
    }

    /// Find the challenge within `initiative` whose hashtag appears among `hashtags`
    pub fn challenge_for_hashtags<'a>(
        &self,
        initiative: &'a Initiative,
        hashtags: &[String],
    ) -> Option<ChallengeRef<'a>> {
        for campaign in &initiative.campaigns {
            for challenge in &campaign.challenges {
                let tag = challenge.hashtag.to_lowercase();
                if hashtags.iter().any(|h| h.trim() == tag.trim()) {
                    return Some(ChallengeRef {
                        initiative,
                        campaign,
                        challenge,
                    });
                }
            }
        }
        None
    }

    pub fn initiative(&self, id: i64) -> Option<&Initiative> {
        self.initiatives.iter().find(|i| i.id == id)
    }

    pub fn challenge(&self, key: ChallengeKey) -> Option<ChallengeRef<'_>> {
        let initiative = self.initiative(key.initiative_id)?;
        let campaign = initiative
            .campaigns
            .iter()
            .find(|c| c.id == key.campaign_id)?;
        let challenge = campaign
            .challenges
            .iter()
            .find(|c| c.id == key.challenge_id)?;
        Some(ChallengeRef {
            initiative,
            campaign,
            challenge,
        })
    }

    /// Whether `author_id` is one of the accounts the application posts from
    pub fn is_app_account(&self, author_id: &str) -> bool {
        self.initiatives.iter().any(|i| i.account_id == author_id)
    }
}

/// A participant, identified by `(channel, id_in_channel)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub screen_name: String,
    pub id_in_channel: String,
    pub channel: String,
    pub language: Option<String>,
    /// The single extra-info slot, shared across challenges
    pub extra_info: Option<String>,
    pub banned: bool,
    pub input_mistakes: i64,
    pub request_mistakes: i64,
}

impl Author {
    pub fn print_name(&self) -> String {
        format!("@{}", self.screen_name)
    }
}

/// One author's answer to one challenge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionPost {
    pub id: i64,
    pub id_in_channel: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Curated answer text after validation
    pub contribution: String,
    /// Raw post body as received
    pub full_text: String,
    pub url: String,
    pub author_id: i64,
    pub in_reply_to: Option<String>,
    pub initiative_id: i64,
    pub campaign_id: i64,
    pub challenge_id: i64,
    pub channel: String,
    pub votes: i64,
    pub re_posts: i64,
    pub bookmarks: i64,
    pub status: ContributionStatus,
    pub source: Option<String>,
}

impl ContributionPost {
    pub fn challenge_key(&self) -> ChallengeKey {
        ChallengeKey {
            initiative_id: self.initiative_id,
            campaign_id: self.campaign_id,
            challenge_id: self.challenge_id,
        }
    }
}

/// Fields for a contribution about to be inserted
#[derive(Debug, Clone)]
pub struct NewContributionPost {
    pub id_in_channel: String,
    pub created_at: OffsetDateTime,
    pub contribution: String,
    pub full_text: String,
    pub url: String,
    pub author_id: i64,
    pub in_reply_to: Option<String>,
    pub initiative_id: i64,
    pub campaign_id: i64,
    pub challenge_id: i64,
    pub channel: String,
    pub votes: i64,
    pub re_posts: i64,
    pub bookmarks: i64,
    pub status: ContributionStatus,
    pub source: Option<String>,
}

/// A post the application itself delivered through a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPost {
    pub id: i64,
    pub id_in_channel: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub text: String,
    pub url: Option<String>,
    pub app_parent_id: Option<i64>,
    pub contribution_parent_id: Option<i64>,
    pub initiative_id: i64,
    pub campaign_id: i64,
    pub challenge_id: i64,
    pub channel: String,
    pub category: AppPostCategory,
    pub delivered: bool,
    pub short_url: Option<String>,
    pub answered: bool,
    pub recipient_id: Option<String>,
}

impl AppPost {
    pub fn challenge_key(&self) -> ChallengeKey {
        ChallengeKey {
            initiative_id: self.initiative_id,
            campaign_id: self.campaign_id,
            challenge_id: self.challenge_id,
        }
    }
}

/// Fields for an app post about to be inserted
#[derive(Debug, Clone)]
pub struct NewAppPost {
    pub id_in_channel: String,
    pub created_at: OffsetDateTime,
    pub text: String,
    pub url: Option<String>,
    pub app_parent_id: Option<i64>,
    pub contribution_parent_id: Option<i64>,
    pub initiative_id: i64,
    pub campaign_id: i64,
    pub challenge_id: i64,
    pub channel: String,
    pub category: AppPostCategory,
    pub delivered: bool,
    pub short_url: Option<String>,
    pub recipient_id: Option<String>,
}

/// A detected re-share of an initiative's canonical sharing message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharePost {
    pub id: i64,
    pub id_in_channel: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub text: String,
    pub url: String,
    pub author_id: i64,
    pub initiative_id: i64,
    pub campaign_id: i64,
    pub challenge_id: i64,
    pub channel: String,
    pub votes: i64,
    pub re_posts: i64,
    pub bookmarks: i64,
    /// Word-overlap percentage against the canonical sharing message
    pub similarity: u32,
}

impl SharePost {
    pub fn challenge_key(&self) -> ChallengeKey {
        ChallengeKey {
            initiative_id: self.initiative_id,
            campaign_id: self.campaign_id,
            challenge_id: self.challenge_id,
        }
    }
}

/// Fields for a share post about to be inserted
#[derive(Debug, Clone)]
pub struct NewSharePost {
    pub id_in_channel: String,
    pub created_at: OffsetDateTime,
    pub text: String,
    pub url: String,
    pub author_id: i64,
    pub initiative_id: i64,
    pub campaign_id: i64,
    pub challenge_id: i64,
    pub channel: String,
    pub votes: i64,
    pub re_posts: i64,
    pub bookmarks: i64,
    pub similarity: u32,
}

/// Correlation data carried alongside a queued message so the dispatcher
/// can link the delivered post back into the conversation. Round-trips
/// unchanged between enqueue and delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Channel id of the app post the participant replied to, if any
    pub parent_post_id: Option<String>,
    /// Channel id of the participant's post that triggered this reply
    pub trigger_post_id: String,
    pub category: AppPostCategory,
    pub initiative_id: i64,
    pub campaign_id: i64,
    pub challenge_id: i64,
    pub recipient_id: String,
    pub recipient_username: String,
    pub short_url: Option<String>,
}

/// An outbound message awaiting delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub channel: String,
    pub kind: DeliveryKind,
    pub text: String,
    /// Channel id of the post replied to (Reply) or user messaged (Direct)
    pub recipient_id: Option<String>,
    pub payload: MessagePayload,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
}

/// Author of an inbound post as reported by the channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundAuthor {
    pub id: String,
    pub name: String,
    pub screen_name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl InboundAuthor {
    pub fn print_name(&self) -> String {
        format!("@{}", self.screen_name)
    }
}

/// A normalized post received from a channel's streaming connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundPost {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub author: InboundAuthor,
    /// Lowercased, trimmed hashtags
    #[serde(default)]
    pub hashtags: Vec<String>,
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub re_posts: i64,
    #[serde(default)]
    pub bookmarks: i64,
    #[serde(default)]
    pub source: Option<String>,
    /// Whether the post was placed through a social-sharing button
    #[serde(default)]
    pub sharing_post: bool,
    /// The original post when this one is a repost
    #[serde(default)]
    pub org_post: Option<Box<InboundPost>>,
    pub channel: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(category: MessageCategory, key_terms: &str) -> MessageTemplate {
        MessageTemplate {
            id: 1,
            name: "t".to_string(),
            body: "body".to_string(),
            category,
            key_terms: key_terms.to_string(),
            answer_terms: None,
            language: "en".to_string(),
        }
    }

    fn sample_set() -> CampaignSet {
        CampaignSet::new(vec![Initiative {
            id: 1,
            name: "City Voices".to_string(),
            organizer: "city".to_string(),
            hashtag: "CityVoices".to_string(),
            url: Some("https://example.org/cityvoices".to_string()),
            language: "en".to_string(),
            account_id: "app-account".to_string(),
            sharing_message: Some("Join the conversation #CityVoices".to_string()),
            campaigns: vec![Campaign {
                id: 10,
                name: "Parks".to_string(),
                hashtag: None,
                extra_info: None,
                messages: vec![template(MessageCategory::ThanksContribution, "thanks idea")],
                challenges: vec![Challenge {
                    id: 100,
                    name: "Best park".to_string(),
                    hashtag: "BestPark".to_string(),
                    answer_style: AnswerStyle::Free,
                    answer_format: None,
                    max_answer_length: None,
                    answers_from_same_author: 1,
                    accept_changes: true,
                    url: None,
                }],
            }],
        }])
    }

    #[test]
    fn test_initiative_lookup_by_hashtag() {
        let set = sample_set();

        let found = set.initiative_for_hashtags(&["cityvoices".to_string()]);
        assert!(found.is_some());

        let missing = set.initiative_for_hashtags(&["othertag".to_string()]);
        assert!(missing.is_none());
    }

    #[test]
    fn test_challenge_lookup_by_hashtag() {
        let set = sample_set();
        let initiative = set.initiative(1).unwrap();

        let found = set.challenge_for_hashtags(initiative, &["bestpark".to_string()]);
        assert!(found.is_some());
        assert_eq!(found.unwrap().challenge.id, 100);
    }

    #[test]
    fn test_challenge_lookup_by_key() {
        let set = sample_set();
        let key = ChallengeKey {
            initiative_id: 1,
            campaign_id: 10,
            challenge_id: 100,
        };

        let found = set.challenge(key).unwrap();
        assert_eq!(found.challenge.name, "Best park");
        assert_eq!(found.key(), key);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = sample_set();
        let b = sample_set();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert!(!a.fingerprint.is_empty());
    }

    #[test]
    fn test_template_matches_all_key_terms() {
        let t = template(MessageCategory::RequestAuthorExtrainfo, "postal code");

        assert!(t.matches_text("Please send us your Postal Code to finish"));
        assert!(!t.matches_text("Please send us your code"));
    }

    #[test]
    fn test_template_for_text_prefers_full_match() {
        let mut campaign = Campaign {
            id: 1,
            name: "c".to_string(),
            hashtag: None,
            extra_info: Some(ExtraInfo {
                name: "zipcode".to_string(),
                description: None,
                answer_format: r"\d{5}".to_string(),
                messages: vec![template(
                    MessageCategory::RequestAuthorExtrainfo,
                    "postal code",
                )],
            }),
            messages: vec![template(MessageCategory::IncorrectAnswer, "wrong format")],
            challenges: vec![],
        };

        let found = campaign
            .template_for_text("your answer has a wrong format, try again")
            .map(|m| m.category);
        assert_eq!(found, Some(MessageCategory::IncorrectAnswer));

        let found = campaign
            .template_for_text("we still need your postal code")
            .map(|m| m.category);
        assert_eq!(found, Some(MessageCategory::RequestAuthorExtrainfo));

        campaign.messages.clear();
        assert!(campaign.template_for_text("nothing matches here").is_none());
    }

    #[test]
    fn test_is_app_account() {
        let set = sample_set();
        assert!(set.is_app_account("app-account"));
        assert!(!set.is_app_account("participant"));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            ContributionStatus::Temporary,
            ContributionStatus::Permanent,
            ContributionStatus::Discarded,
        ] {
            assert_eq!(ContributionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ContributionStatus::parse("unknown"), None);
    }
}
