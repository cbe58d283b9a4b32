//! Post manager - drives the full decision flow for one inbound post
//!
//! resolve -> validate -> apply campaign policy -> persist -> compose
//! reply -> enqueue. Conversation state is re-derived from stored data
//! on every post; the resolver's tagged output is matched exhaustively
//! here. Nothing in this module performs network I/O: replies are
//! rendered and handed to the outbound queue.

use std::sync::Arc;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::model::{
    AppPost, AppPostCategory, Author, Campaign, ChallengeKey, ChallengeRef, ContributionPost,
    ContributionStatus, DeliveryKind, InboundPost, MessageCategory, MessagePayload,
    MessageTemplate, NewAppPost, NewContributionPost, NewSharePost, QueuedMessage,
    NO_ANSWER_LIMIT,
};
use crate::ports::{
    AppPostStore, AuthorStore, Clock, ContributionStore, OutboundQueue, ShareStore, StoreError,
};
use crate::usecases::ledger::AuthorLedger;
use crate::usecases::render::{ReplyContext, ReplyRenderer};
use crate::usecases::resolve::{ConversationResolver, Resolution};
use crate::usecases::validate::{match_extra_info, validate_answer};

/// Reply-chain walks are bounded; chains are acyclic by construction
/// since every app post's parent predates it
const MAX_REPLY_CHAIN: usize = 16;

/// Limits applied to participant mistakes
#[derive(Debug, Clone)]
pub struct EngagementConfig {
    /// Invalid contributions tolerated before a ban
    pub limit_wrong_inputs: i64,
    /// Malformed extra-info replies tolerated before the pending
    /// contribution is dropped
    pub limit_wrong_requests: i64,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            limit_wrong_inputs: 5,
            limit_wrong_requests: 5,
        }
    }
}

/// What handling a post amounted to
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A reply was composed and enqueued
    Replied { category: MessageCategory },
    /// An application-authored engagement post was recorded
    EngagementStored,
    /// A re-share was recorded
    ShareStored { similarity: u32 },
    /// Nothing was done
    Ignored { reason: String },
}

/// Errors from managing a post. Persistence anomalies are auto-recovered
/// and logged rather than surfaced; what remains is store failures.
#[derive(Debug, thiserror::Error)]
pub enum ManageError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Orchestrates the inbound half of the conversation engine
pub struct PostManager {
    campaigns: Arc<crate::model::CampaignSet>,
    authors: Arc<dyn AuthorStore>,
    contributions: Arc<dyn ContributionStore>,
    app_posts: Arc<dyn AppPostStore>,
    shares: Arc<dyn ShareStore>,
    queue: Arc<dyn OutboundQueue>,
    resolver: ConversationResolver,
    renderer: ReplyRenderer,
    ledger: AuthorLedger,
    clock: Arc<dyn Clock>,
    config: EngagementConfig,
    /// Wakes the dispatcher when a reply is enqueued
    wakeup: Arc<Notify>,
}

impl PostManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<crate::model::CampaignSet>,
        authors: Arc<dyn AuthorStore>,
        contributions: Arc<dyn ContributionStore>,
        app_posts: Arc<dyn AppPostStore>,
        shares: Arc<dyn ShareStore>,
        queue: Arc<dyn OutboundQueue>,
        renderer: ReplyRenderer,
        clock: Arc<dyn Clock>,
        config: EngagementConfig,
        wakeup: Arc<Notify>,
    ) -> Self {
        let resolver = ConversationResolver::new(
            Arc::clone(&campaigns),
            Arc::clone(&app_posts),
            Arc::clone(&shares),
        );
        let ledger = AuthorLedger::new(Arc::clone(&authors));
        Self {
            campaigns,
            authors,
            contributions,
            app_posts,
            shares,
            queue,
            resolver,
            renderer,
            ledger,
            clock,
            config,
            wakeup,
        }
    }

    /// Handle one inbound post end to end
    pub async fn manage_post(&self, post: &InboundPost) -> Result<Outcome, ManageError> {
        let author = self
            .authors
            .get_author(&post.channel, &post.author.id)
            .await?;

        if let Some(author) = &author {
            if author.banned {
                tracing::info!(
                    author = %author.screen_name,
                    "Post ignored, its author is in the ban list"
                );
                return Ok(Outcome::Ignored {
                    reason: "author is banned".to_string(),
                });
            }
        }

        let resolution = self.resolver.resolve(post).await?;
        match resolution {
            Resolution::AppEngagement { challenge } => self.store_engagement(post, challenge).await,
            Resolution::NewContribution { challenge } => {
                let mut author = self.ensure_author(author, post).await?;
                self.process_input(post, &mut author, challenge).await
            }
            Resolution::ReplyTo { template, parent } => {
                let mut author = self.ensure_author(author, post).await?;
                self.process_reply(post, &mut author, &template, &parent)
                    .await
            }
            Resolution::ReplyUnmatched { parent } => {
                tracing::info!(
                    notification = %parent.text,
                    "Cannot determine which template this notification came from"
                );
                self.app_posts.mark_answered(parent.id).await?;
                Ok(Outcome::Ignored {
                    reason: "unrecognized notification template".to_string(),
                })
            }
            Resolution::Share {
                challenge,
                via_button,
                similarity,
                attached_text,
            } => {
                self.store_share(post, author, challenge, via_button, similarity, attached_text)
                    .await
            }
            Resolution::Ignored { reason } => {
                tracing::debug!(post_id = %post.id, reason = %reason, "Post ignored");
                Ok(Outcome::Ignored { reason })
            }
        }
    }

    async fn ensure_author(
        &self,
        existing: Option<Author>,
        post: &InboundPost,
    ) -> Result<Author, StoreError> {
        match existing {
            Some(author) => Ok(author),
            None => self.authors.register_author(&post.author, &post.channel).await,
        }
    }

    /// Dispatch a reply to a notification by the template that produced it
    async fn process_reply(
        &self,
        post: &InboundPost,
        author: &mut Author,
        template: &MessageTemplate,
        parent: &AppPost,
    ) -> Result<Outcome, ManageError> {
        match template.category {
            MessageCategory::RequestAuthorExtrainfo | MessageCategory::IncorrectAuthorExtrainfo => {
                let outcome = self.process_extra_info(post, author, parent).await;
                self.app_posts.mark_answered(parent.id).await?;
                outcome
            }
            MessageCategory::IncorrectAnswer => {
                self.app_posts.mark_answered(parent.id).await?;
                if author.banned {
                    return Ok(Outcome::Ignored {
                        reason: "author is banned".to_string(),
                    });
                }
                self.process_input(post, author, parent.challenge_key()).await
            }
            MessageCategory::AskChangeContribution => {
                self.app_posts.mark_answered(parent.id).await?;
                self.process_change_reply(post, author, template, parent).await
            }
            other => {
                tracing::info!(category = ?other, "Notification template expects no reply");
                self.app_posts.mark_answered(parent.id).await?;
                Ok(Outcome::Ignored {
                    reason: "notification expects no reply".to_string(),
                })
            }
        }
    }

    /// The new-contribution flow (spec table, rows one through seven)
    async fn process_input(
        &self,
        post: &InboundPost,
        author: &mut Author,
        key: ChallengeKey,
    ) -> Result<Outcome, ManageError> {
        let Some(challenge) = self.campaigns.challenge(key) else {
            tracing::error!(?key, "Post references a challenge missing from configuration");
            return Ok(Outcome::Ignored {
                reason: "unknown challenge".to_string(),
            });
        };

        // Replays of an already-persisted post are no-ops
        if self
            .contributions
            .contribution_by_channel_id(&post.channel, &post.id)
            .await?
            .is_some()
        {
            tracing::info!(post_id = %post.id, "Post was already processed");
            return Ok(Outcome::Ignored {
                reason: "post already processed".to_string(),
            });
        }

        let Some(curated) = validate_answer(&post.text, challenge.challenge) else {
            return self.handle_invalid_input(post, author, challenge).await;
        };

        tracing::info!(
            author = %author.screen_name,
            initiative = %challenge.initiative.name,
            campaign = %challenge.campaign.name,
            challenge = %challenge.challenge.name,
            text = %post.text,
            "Contribution received"
        );

        if challenge.challenge.answers_from_same_author == NO_ANSWER_LIMIT {
            return self.accept_input(post, author, challenge, &curated).await;
        }

        let mut existing = self
            .contributions
            .contributions_with_status(author.id, key.challenge_id, ContributionStatus::Permanent)
            .await?;

        if existing.is_empty() {
            return self.accept_input(post, author, challenge, &curated).await;
        }

        if !challenge.challenge.accept_changes {
            tracing::info!(
                author = %author.screen_name,
                challenge = %challenge.challenge.name,
                "Author already answered an unchangeable challenge"
            );
            let replied = self
                .send_reply(
                    post,
                    challenge,
                    MessageCategory::AlreadyAnsweredUnchangeableChallenge,
                    ReplyContext::default(),
                )
                .await?;
            return Ok(outcome(replied));
        }

        if challenge.challenge.answers_from_same_author == 1 {
            self.recover_duplicate_permanents(author, challenge, &mut existing)
                .await?;
            let current = &existing[existing.len() - 1];

            if curated == current.contribution {
                tracing::info!(contribution = %curated, "New contribution equals the saved one");
                return Ok(Outcome::Ignored {
                    reason: "identical contribution already saved".to_string(),
                });
            }

            self.save_contribution(post, author, challenge, &curated, ContributionStatus::Temporary)
                .await?;
            tracing::info!(
                author = %author.screen_name,
                challenge = %challenge.challenge.name,
                "Contribution saved temporarily pending a change confirmation"
            );
            let replied = self
                .send_reply(
                    post,
                    challenge,
                    MessageCategory::AskChangeContribution,
                    ReplyContext {
                        contribution: None,
                        old_contribution: Some(&current.contribution),
                        new_contribution: Some(&curated),
                    },
                )
                .await?;
            return Ok(outcome(replied));
        }

        if (existing.len() as i64) <= challenge.challenge.answers_from_same_author {
            self.accept_input(post, author, challenge, &curated).await
        } else {
            tracing::info!(
                author = %author.screen_name,
                limit = challenge.challenge.answers_from_same_author,
                challenge = %challenge.challenge.name,
                "Author reached the allowed number of contributions"
            );
            let replied = self
                .send_reply(
                    post,
                    challenge,
                    MessageCategory::LimitAnswersReached,
                    ReplyContext::default(),
                )
                .await?;
            self.ledger.reset_mistake_flags(author).await?;
            Ok(outcome(replied))
        }
    }

    /// Invalid input: count the mistake and reply, banning past the limit
    async fn handle_invalid_input(
        &self,
        post: &InboundPost,
        author: &mut Author,
        challenge: ChallengeRef<'_>,
    ) -> Result<Outcome, ManageError> {
        self.ledger.add_input_mistake(author).await?;
        if author.input_mistakes > self.config.limit_wrong_inputs {
            tracing::info!(
                author = %author.screen_name,
                limit = self.config.limit_wrong_inputs,
                "Author banned after exceeding the wrong-contribution limit"
            );
            self.ledger.ban(author).await?;
            let replied = self
                .send_reply(
                    post,
                    challenge,
                    MessageCategory::AuthorBanned,
                    ReplyContext::default(),
                )
                .await?;
            Ok(outcome(replied))
        } else {
            tracing::info!(
                author = %author.screen_name,
                challenge = %challenge.challenge.name,
                text = %post.text,
                "Contribution does not satisfy the challenge format"
            );
            let replied = self
                .send_reply(
                    post,
                    challenge,
                    MessageCategory::IncorrectAnswer,
                    ReplyContext::default(),
                )
                .await?;
            Ok(outcome(replied))
        }
    }

    /// Persist a valid input, asking for extra info first when required
    async fn accept_input(
        &self,
        post: &InboundPost,
        author: &mut Author,
        challenge: ChallengeRef<'_>,
        curated: &str,
    ) -> Result<Outcome, ManageError> {
        let needs_extra_info =
            challenge.campaign.extra_info.is_some() && author.extra_info.is_none();

        if needs_extra_info {
            self.save_contribution(post, author, challenge, curated, ContributionStatus::Temporary)
                .await?;
            tracing::info!(
                contribution = %curated,
                author = %author.screen_name,
                challenge = %challenge.challenge.name,
                "Contribution saved temporarily until the author's extra information arrives"
            );
            let replied = self
                .send_reply(
                    post,
                    challenge,
                    MessageCategory::RequestAuthorExtrainfo,
                    ReplyContext {
                        contribution: Some(curated),
                        ..Default::default()
                    },
                )
                .await?;
            Ok(outcome(replied))
        } else {
            self.save_contribution(post, author, challenge, curated, ContributionStatus::Permanent)
                .await?;
            tracing::info!(
                contribution = %curated,
                author = %author.screen_name,
                challenge = %challenge.challenge.name,
                "Contribution saved"
            );
            let replied = self
                .send_reply(
                    post,
                    challenge,
                    MessageCategory::ThanksContribution,
                    ReplyContext {
                        contribution: Some(curated),
                        ..Default::default()
                    },
                )
                .await?;
            self.ledger.reset_mistake_flags(author).await?;
            Ok(outcome(replied))
        }
    }

    /// More than one PERMANENT answer where one is allowed: keep the
    /// oldest, discard the rest, never raise
    async fn recover_duplicate_permanents(
        &self,
        author: &Author,
        challenge: ChallengeRef<'_>,
        existing: &mut Vec<ContributionPost>,
    ) -> Result<(), StoreError> {
        if existing.len() <= 1 {
            return Ok(());
        }
        tracing::error!(
            challenge = %challenge.challenge.name,
            author = %author.screen_name,
            count = existing.len(),
            "Single-answer challenge has multiple saved contributions; discarding the newest"
        );
        while existing.len() > 1 {
            let newest = existing.remove(0);
            self.contributions
                .set_contribution_status(
                    newest.id,
                    ContributionStatus::Permanent,
                    ContributionStatus::Discarded,
                )
                .await?;
        }
        Ok(())
    }

    async fn save_contribution(
        &self,
        post: &InboundPost,
        author: &Author,
        challenge: ChallengeRef<'_>,
        curated: &str,
        status: ContributionStatus,
    ) -> Result<ContributionPost, StoreError> {
        let saved = self
            .contributions
            .insert_contribution(NewContributionPost {
                id_in_channel: post.id.clone(),
                created_at: post.created_at,
                contribution: curated.to_string(),
                full_text: post.text.clone(),
                url: post.url.clone(),
                author_id: author.id,
                in_reply_to: post.parent_id.clone(),
                initiative_id: challenge.initiative.id,
                campaign_id: challenge.campaign.id,
                challenge_id: challenge.challenge.id,
                channel: post.channel.clone(),
                votes: post.votes,
                re_posts: post.re_posts,
                bookmarks: post.bookmarks,
                status,
                source: post.source.clone(),
            })
            .await?;

        if status == ContributionStatus::Permanent {
            self.discard_temporaries(author.id, challenge.challenge.id, Some(saved.id))
                .await?;
        }
        Ok(saved)
    }

    /// Discard the author's TEMPORARY posts for a challenge, keeping `keep`
    async fn discard_temporaries(
        &self,
        author_id: i64,
        challenge_id: i64,
        keep: Option<i64>,
    ) -> Result<(), StoreError> {
        let temporaries = self
            .contributions
            .contributions_with_status(author_id, challenge_id, ContributionStatus::Temporary)
            .await?;
        for temporary in temporaries {
            if Some(temporary.id) == keep {
                continue;
            }
            self.contributions
                .set_contribution_status(
                    temporary.id,
                    ContributionStatus::Temporary,
                    ContributionStatus::Discarded,
                )
                .await?;
        }
        Ok(())
    }

    /// A reply to an extra-info request or to an extra-info correction
    async fn process_extra_info(
        &self,
        post: &InboundPost,
        author: &mut Author,
        parent: &AppPost,
    ) -> Result<Outcome, ManageError> {
        let Some(challenge) = self.campaigns.challenge(parent.challenge_key()) else {
            tracing::error!(
                challenge_id = parent.challenge_id,
                "Notification references an unknown challenge"
            );
            return Ok(Outcome::Ignored {
                reason: "unknown challenge".to_string(),
            });
        };
        let Some(extra_info) = challenge.campaign.extra_info.as_ref() else {
            tracing::error!(
                campaign = %challenge.campaign.name,
                "Extra-info reply but the campaign has no extra-info requirement"
            );
            return Ok(Outcome::Ignored {
                reason: "campaign has no extra-info requirement".to_string(),
            });
        };

        match match_extra_info(&post.text, extra_info) {
            Some(value) => {
                tracing::info!(
                    author = %author.screen_name,
                    "Extra information processed, contribution saved permanently"
                );
                self.ledger.set_extra_info(author, value).await?;

                if let Some(pending) = self.contribution_for(parent).await? {
                    self.contributions
                        .set_contribution_status(
                            pending.id,
                            ContributionStatus::Temporary,
                            ContributionStatus::Permanent,
                        )
                        .await?;
                    let replied = self
                        .send_reply(
                            post,
                            challenge,
                            MessageCategory::ThanksContribution,
                            ReplyContext {
                                contribution: Some(&pending.contribution),
                                ..Default::default()
                            },
                        )
                        .await?;
                    self.ledger.reset_mistake_flags(author).await?;
                    self.preserve_other_temporaries(author).await?;
                    Ok(outcome(replied))
                } else {
                    tracing::error!(
                        notification = %parent.id_in_channel,
                        "No pending contribution behind the extra-info request"
                    );
                    Ok(Outcome::Ignored {
                        reason: "no pending contribution".to_string(),
                    })
                }
            }
            None => self.handle_invalid_extra_info(post, author, challenge, parent).await,
        }
    }

    async fn handle_invalid_extra_info(
        &self,
        post: &InboundPost,
        author: &mut Author,
        challenge: ChallengeRef<'_>,
        parent: &AppPost,
    ) -> Result<Outcome, ManageError> {
        self.ledger.add_request_mistake(author).await?;
        let over_limit = author.request_mistakes - self.config.limit_wrong_requests;

        if over_limit > 0 {
            if over_limit == 1 {
                tracing::info!(
                    author = %author.screen_name,
                    "Wrong-request limit exceeded, the pending contribution will be discarded"
                );
                let replied = self
                    .send_reply(
                        post,
                        challenge,
                        MessageCategory::ContributionCannotSave,
                        ReplyContext::default(),
                    )
                    .await?;
                if let Some(pending) = self.contribution_for(parent).await? {
                    self.contributions
                        .set_contribution_status(
                            pending.id,
                            ContributionStatus::Temporary,
                            ContributionStatus::Discarded,
                        )
                        .await?;
                }
                Ok(outcome(replied))
            } else {
                tracing::info!(
                    author = %author.screen_name,
                    limit = self.config.limit_wrong_requests,
                    "Wrong-request limit already exceeded, reply ignored"
                );
                Ok(Outcome::Ignored {
                    reason: "wrong-request limit exceeded".to_string(),
                })
            }
        } else {
            tracing::info!(author = %author.screen_name, "Extra-info reply has an incorrect format");
            let replied = self
                .send_reply(
                    post,
                    challenge,
                    MessageCategory::IncorrectAuthorExtrainfo,
                    ReplyContext::default(),
                )
                .await?;
            Ok(outcome(replied))
        }
    }

    /// Once the author's extra info is known, their other TEMPORARY posts
    /// waiting on it become PERMANENT, each acknowledged separately
    async fn preserve_other_temporaries(&self, author: &Author) -> Result<(), StoreError> {
        let temporaries = self.contributions.temporaries_for_author(author.id).await?;
        for temporary in temporaries {
            let Some(notification) = self
                .app_posts
                .unanswered_notification_for_contribution(temporary.id)
                .await?
            else {
                continue;
            };
            let Some(challenge) = self.campaigns.challenge(notification.challenge_key()) else {
                continue;
            };
            let from_template = challenge
                .campaign
                .template_for_text(&notification.text)
                .map(|t| t.category);
            if from_template != Some(MessageCategory::RequestAuthorExtrainfo) {
                continue;
            }

            self.contributions
                .set_contribution_status(
                    temporary.id,
                    ContributionStatus::Temporary,
                    ContributionStatus::Permanent,
                )
                .await?;
            self.app_posts.mark_answered(notification.id).await?;
            self.enqueue_reply(
                &temporary.channel,
                &temporary.id_in_channel,
                temporary.in_reply_to.as_deref(),
                &author.id_in_channel,
                &author.print_name(),
                challenge,
                MessageCategory::ThanksContribution,
                ReplyContext {
                    contribution: Some(&temporary.contribution),
                    ..Default::default()
                },
            )
            .await?;
        }
        Ok(())
    }

    /// A reply to the question about changing a previous contribution
    async fn process_change_reply(
        &self,
        post: &InboundPost,
        author: &mut Author,
        template: &MessageTemplate,
        parent: &AppPost,
    ) -> Result<Outcome, ManageError> {
        let Some(challenge) = self.campaigns.challenge(parent.challenge_key()) else {
            tracing::error!(
                challenge_id = parent.challenge_id,
                "Notification references an unknown challenge"
            );
            return Ok(Outcome::Ignored {
                reason: "unknown challenge".to_string(),
            });
        };

        let text = post.text.to_lowercase();
        let confirmed = template
            .answer_terms
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .any(|term| text.contains(&term.to_lowercase()));

        if confirmed {
            return self.apply_contribution_change(post, author, challenge).await;
        }

        // The answer was not understood; the proposed change is dropped
        if let Some(pending) = self.contribution_for(parent).await? {
            self.contributions
                .set_contribution_status(
                    pending.id,
                    ContributionStatus::Temporary,
                    ContributionStatus::Discarded,
                )
                .await?;
        }
        let replied = self
            .send_reply(
                post,
                challenge,
                MessageCategory::NotUnderstandableChangeContributionReply,
                ReplyContext::default(),
            )
            .await?;
        Ok(outcome(replied))
    }

    async fn apply_contribution_change(
        &self,
        post: &InboundPost,
        author: &mut Author,
        challenge: ChallengeRef<'_>,
    ) -> Result<Outcome, ManageError> {
        let permanents = self
            .contributions
            .contributions_with_status(
                author.id,
                challenge.challenge.id,
                ContributionStatus::Permanent,
            )
            .await?;
        let temporaries = self
            .contributions
            .contributions_with_status(
                author.id,
                challenge.challenge.id,
                ContributionStatus::Temporary,
            )
            .await?;

        let (Some(old_post), Some(new_post)) = (permanents.first(), temporaries.first()) else {
            tracing::error!(
                author = %author.screen_name,
                challenge = %challenge.challenge.name,
                "Cannot update the previous contribution, expected posts are missing"
            );
            return Ok(Outcome::Ignored {
                reason: "contribution change state is inconsistent".to_string(),
            });
        };
        if permanents.len() > 1 {
            tracing::error!(
                author = %author.screen_name,
                count = permanents.len(),
                "More than one saved contribution while applying a change"
            );
        }

        // Preserve the newest, discard the oldest: both or neither
        self.contributions
            .replace_permanent(new_post.id, old_post.id)
            .await?;
        self.discard_temporaries(author.id, challenge.challenge.id, Some(new_post.id))
            .await?;

        let replied = self
            .send_reply(
                post,
                challenge,
                MessageCategory::ThanksChange,
                ReplyContext {
                    contribution: Some(&new_post.contribution),
                    ..Default::default()
                },
            )
            .await?;
        self.ledger.reset_mistake_flags(author).await?;
        Ok(outcome(replied))
    }

    /// Walk up the reply chain to the contribution that started it
    async fn contribution_for(
        &self,
        parent: &AppPost,
    ) -> Result<Option<ContributionPost>, StoreError> {
        let mut current = parent.clone();
        for _ in 0..MAX_REPLY_CHAIN {
            if let Some(contribution_id) = current.contribution_parent_id {
                return self.contributions.contribution(contribution_id).await;
            }
            match current.app_parent_id {
                Some(parent_id) => match self.app_posts.app_post(parent_id).await? {
                    Some(post) => current = post,
                    None => break,
                },
                None => break,
            }
        }
        tracing::error!(
            app_post = %parent.id_in_channel,
            "No contribution found walking the reply chain"
        );
        Ok(None)
    }

    /// Record a post the application placed through the channel's own client
    async fn store_engagement(
        &self,
        post: &InboundPost,
        key: ChallengeKey,
    ) -> Result<Outcome, ManageError> {
        if self
            .app_posts
            .app_post_by_channel_id(&post.channel, &post.id)
            .await?
            .is_some()
        {
            return Ok(Outcome::Ignored {
                reason: "engagement post already saved".to_string(),
            });
        }
        self.app_posts
            .insert_app_post(NewAppPost {
                id_in_channel: post.id.clone(),
                created_at: post.created_at,
                text: post.text.clone(),
                url: Some(post.url.clone()),
                app_parent_id: None,
                contribution_parent_id: None,
                initiative_id: key.initiative_id,
                campaign_id: key.campaign_id,
                challenge_id: key.challenge_id,
                channel: post.channel.clone(),
                category: AppPostCategory::Engagement,
                delivered: true,
                short_url: None,
                recipient_id: None,
            })
            .await?;
        tracing::info!(post_id = %post.id, "Engagement post placed from the channel client was saved");
        Ok(Outcome::EngagementStored)
    }

    /// Record a re-share of the initiative's sharing message, at most once
    async fn store_share(
        &self,
        post: &InboundPost,
        author: Option<Author>,
        key: ChallengeKey,
        via_button: bool,
        similarity: u32,
        attached_text: Option<String>,
    ) -> Result<Outcome, ManageError> {
        let author = self.ensure_author(author, post).await?;
        if let Some(attached) = attached_text {
            tracing::info!(attached = %attached, "Share carries user-authored text");
        }
        let inserted = self
            .shares
            .insert_share_if_absent(NewSharePost {
                id_in_channel: post.id.clone(),
                created_at: post.created_at,
                text: post.text.clone(),
                url: post.url.clone(),
                author_id: author.id,
                initiative_id: key.initiative_id,
                campaign_id: key.campaign_id,
                challenge_id: key.challenge_id,
                channel: post.channel.clone(),
                votes: post.votes,
                re_posts: post.re_posts,
                bookmarks: post.bookmarks,
                similarity,
            })
            .await?;
        match inserted {
            Some(_) => {
                tracing::info!(
                    post_id = %post.id,
                    via_button,
                    similarity,
                    "Social sharing post saved"
                );
                Ok(Outcome::ShareStored { similarity })
            }
            None => Ok(Outcome::Ignored {
                reason: "share already saved".to_string(),
            }),
        }
    }

    /// Render and enqueue a reply to the triggering post
    async fn send_reply(
        &self,
        post: &InboundPost,
        challenge: ChallengeRef<'_>,
        category: MessageCategory,
        context: ReplyContext<'_>,
    ) -> Result<Option<MessageCategory>, StoreError> {
        self.enqueue_reply(
            &post.channel,
            &post.id,
            post.parent_id.as_deref(),
            &post.author.id,
            &post.author.print_name(),
            challenge,
            category,
            context,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn enqueue_reply(
        &self,
        channel: &str,
        reply_to_post_id: &str,
        parent_post_id: Option<&str>,
        recipient_id: &str,
        recipient_name: &str,
        challenge: ChallengeRef<'_>,
        category: MessageCategory,
        context: ReplyContext<'_>,
    ) -> Result<Option<MessageCategory>, StoreError> {
        let Some(template) = template_for(challenge.campaign, category) else {
            tracing::warn!(
                campaign = %challenge.campaign.name,
                category = ?category,
                "No template configured for this reply, skipping it"
            );
            return Ok(None);
        };

        let rendered = self
            .renderer
            .render(template, challenge, recipient_name, context, self.clock.now())
            .await;

        let payload = MessagePayload {
            parent_post_id: parent_post_id.map(String::from),
            trigger_post_id: reply_to_post_id.to_string(),
            category: rendered.category,
            initiative_id: challenge.initiative.id,
            campaign_id: challenge.campaign.id,
            challenge_id: challenge.challenge.id,
            recipient_id: recipient_id.to_string(),
            recipient_username: recipient_name.to_string(),
            short_url: rendered.short_url.clone(),
        };

        self.queue
            .enqueue(QueuedMessage {
                id: Uuid::new_v4(),
                channel: channel.to_string(),
                kind: DeliveryKind::Reply,
                text: rendered.text,
                recipient_id: Some(reply_to_post_id.to_string()),
                payload,
                enqueued_at: self.clock.now(),
            })
            .await?;
        self.wakeup.notify_one();
        Ok(Some(category))
    }
}

/// Extra-info templates live on the requirement itself, everything else
/// on the campaign
fn template_for(campaign: &Campaign, category: MessageCategory) -> Option<&MessageTemplate> {
    match category {
        MessageCategory::RequestAuthorExtrainfo | MessageCategory::IncorrectAuthorExtrainfo => {
            campaign.extra_info.as_ref().and_then(|e| e.message(category))
        }
        _ => campaign.message(category),
    }
}

fn outcome(replied: Option<MessageCategory>) -> Outcome {
    match replied {
        Some(category) => Outcome::Replied { category },
        None => Outcome::Ignored {
            reason: "no reply template configured".to_string(),
        },
    }
}
