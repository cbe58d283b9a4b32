//! Conversation resolution - deciding what an inbound post means
//!
//! An inbound post carries no conversation id. This use case classifies
//! it into the right pending interaction: a fresh contribution, a reply
//! to a previously sent notification, a re-share of the initiative's
//! canonical sharing message, or noise to ignore. The output is a tagged
//! variant consumed exhaustively by the post manager.

use std::sync::Arc;

use crate::model::{AppPost, AppPostCategory, CampaignSet, ChallengeKey, InboundPost, MessageTemplate};
use crate::ports::{AppPostStore, ShareStore, StoreError};
use crate::similarity;

/// What an inbound post turned out to be
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A post placed by one of the application's own accounts
    AppEngagement { challenge: ChallengeKey },
    /// A fresh answer to a challenge
    NewContribution { challenge: ChallengeKey },
    /// A reply to an outstanding notification, with the template that
    /// produced the notification
    ReplyTo {
        template: MessageTemplate,
        parent: AppPost,
    },
    /// A reply to an unanswered notification whose originating template
    /// could not be recognized
    ReplyUnmatched { parent: AppPost },
    /// A re-share of the initiative's canonical sharing message
    Share {
        challenge: ChallengeKey,
        via_button: bool,
        similarity: u32,
        attached_text: Option<String>,
    },
    /// Nothing to do
    Ignored { reason: String },
}

/// Classifies inbound posts against the campaign configuration and the
/// stored conversation state
#[derive(Clone)]
pub struct ConversationResolver {
    campaigns: Arc<CampaignSet>,
    app_posts: Arc<dyn AppPostStore>,
    shares: Arc<dyn ShareStore>,
}

impl ConversationResolver {
    pub fn new(
        campaigns: Arc<CampaignSet>,
        app_posts: Arc<dyn AppPostStore>,
        shares: Arc<dyn ShareStore>,
    ) -> Self {
        Self {
            campaigns,
            app_posts,
            shares,
        }
    }

    pub async fn resolve(&self, post: &InboundPost) -> Result<Resolution, StoreError> {
        match &post.parent_id {
            None => self.resolve_root(post).await,
            Some(parent_id) => self.resolve_reply(post, parent_id).await,
        }
    }

    /// Root posts are matched by hashtag against the tracked initiatives
    async fn resolve_root(&self, post: &InboundPost) -> Result<Resolution, StoreError> {
        let Some(initiative) = self.campaigns.initiative_for_hashtags(&post.hashtags) else {
            return Ok(ignored("no initiative hashtag"));
        };

        let challenge = self.campaigns.challenge_for_hashtags(initiative, &post.hashtags);

        if self.campaigns.is_app_account(&post.author.id) {
            return Ok(match challenge {
                Some(challenge) if post.author.id == initiative.account_id => {
                    Resolution::AppEngagement {
                        challenge: challenge.key(),
                    }
                }
                _ => ignored("post from an application account outside its own initiative"),
            });
        }

        let Some(challenge) = challenge else {
            return Ok(ignored("no challenge hashtag"));
        };
        let key = challenge.key();

        // Shares never enter the contribution flow
        if post.sharing_post {
            let similarity = initiative
                .sharing_message
                .as_deref()
                .map(|canonical| similarity::text_similarity(canonical, &post.text))
                .unwrap_or(0);
            return Ok(Resolution::Share {
                challenge: key,
                via_button: true,
                similarity,
                attached_text: None,
            });
        }

        if let Some(canonical) = initiative.sharing_message.as_deref() {
            if let Some(org) = post.org_post.as_deref() {
                // A repost: judge the original post's text
                if similarity::is_share(canonical, &org.text) {
                    return Ok(Resolution::Share {
                        challenge: key,
                        via_button: false,
                        similarity: similarity::text_similarity(canonical, &org.text),
                        attached_text: None,
                    });
                }
            } else if similarity::is_share(canonical, &post.text) {
                let attached = similarity::extract_attached_text(canonical, &post.text);
                return Ok(Resolution::Share {
                    challenge: key,
                    via_button: false,
                    similarity: similarity::text_similarity(canonical, &post.text),
                    attached_text: (!attached.is_empty()).then_some(attached),
                });
            }
        }

        Ok(Resolution::NewContribution { challenge: key })
    }

    /// Replies are resolved through their stored parent post
    async fn resolve_reply(
        &self,
        post: &InboundPost,
        parent_id: &str,
    ) -> Result<Resolution, StoreError> {
        if let Some(parent) = self
            .app_posts
            .app_post_by_channel_id(&post.channel, parent_id)
            .await?
        {
            return Ok(self.resolve_app_parent(post, parent));
        }

        // Shares can be commented on to contribute
        if let Some(share) = self
            .shares
            .share_by_channel_id(&post.channel, parent_id)
            .await?
        {
            return Ok(Resolution::NewContribution {
                challenge: share.challenge_key(),
            });
        }

        Ok(ignored("parent post is unknown"))
    }

    fn resolve_app_parent(&self, post: &InboundPost, parent: AppPost) -> Resolution {
        match parent.category {
            // An initial engagement prompt: replies are fresh contributions
            AppPostCategory::Engagement if parent.app_parent_id.is_none() => {
                Resolution::NewContribution {
                    challenge: parent.challenge_key(),
                }
            }
            AppPostCategory::Notification => {
                if parent.answered {
                    return ignored("notification was already answered");
                }
                if parent.recipient_id.as_deref() != Some(post.author.id.as_str()) {
                    return ignored("reply author is not the notification recipient");
                }
                let Some(campaign) = self
                    .campaigns
                    .challenge(parent.challenge_key())
                    .map(|c| c.campaign)
                else {
                    return ignored("notification references an unknown campaign");
                };
                match campaign.template_for_text(&parent.text) {
                    Some(template) => Resolution::ReplyTo {
                        template: template.clone(),
                        parent,
                    },
                    None => Resolution::ReplyUnmatched { parent },
                }
            }
            _ => ignored("parent post does not expect replies"),
        }
    }
}

fn ignored(reason: &str) -> Resolution {
    Resolution::Ignored {
        reason: reason.to_string(),
    }
}
