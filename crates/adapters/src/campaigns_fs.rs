//! TOML-backed campaign configuration repository
//!
//! The administrative surface maintains a campaigns file; this adapter
//! is the read side the core consumes. The whole graph is loaded and
//! validated at startup; any problem is fatal for the dependent channel
//! rather than a partially-configured start.

use async_trait::async_trait;
use convoca_domain::{
    AnswerStyle, Campaign, CampaignError, CampaignRepo, CampaignSet, Challenge, ExtraInfo,
    Initiative, MessageCategory, MessageTemplate,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Campaign repository reading a single TOML file
pub struct TomlCampaignRepo {
    path: PathBuf,
}

impl TomlCampaignRepo {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read_file(&self) -> Result<CampaignsFile, CampaignError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        toml::from_str(&content).map_err(|e| CampaignError::Parse {
            file: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn build(&self, file: CampaignsFile) -> Result<CampaignSet, CampaignError> {
        if file.initiatives.is_empty() {
            return Err(CampaignError::Empty(self.path.display().to_string()));
        }

        let mut message_id = 0i64;
        let initiatives = file
            .initiatives
            .into_iter()
            .map(|initiative| initiative.into_domain(&mut message_id))
            .collect::<Vec<_>>();

        let set = CampaignSet::new(initiatives);
        validate_set(&set)?;
        Ok(set)
    }
}

#[async_trait]
impl CampaignRepo for TomlCampaignRepo {
    async fn load(&self) -> Result<CampaignSet, CampaignError> {
        let file = self.read_file().await?;
        let set = self.build(file)?;
        tracing::info!(
            path = %self.path.display(),
            fingerprint = %set.fingerprint,
            initiatives = set.initiatives.len(),
            "Loaded campaign configuration"
        );
        Ok(set)
    }

    async fn validate(&self) -> Result<(), CampaignError> {
        let file = self.read_file().await?;
        self.build(file).map(|_| ())
    }
}

fn validate_set(set: &CampaignSet) -> Result<(), CampaignError> {
    let mut hashtags = HashSet::new();
    let mut ids = HashSet::new();

    for initiative in &set.initiatives {
        if !ids.insert(("initiative", initiative.id)) {
            return Err(CampaignError::Validation(format!(
                "duplicate initiative id {}",
                initiative.id
            )));
        }
        if !hashtags.insert(initiative.hashtag.to_lowercase()) {
            return Err(CampaignError::DuplicateHashtag {
                hashtag: initiative.hashtag.clone(),
            });
        }

        for campaign in &initiative.campaigns {
            if !ids.insert(("campaign", campaign.id)) {
                return Err(CampaignError::Validation(format!(
                    "duplicate campaign id {}",
                    campaign.id
                )));
            }

            if campaign.message(MessageCategory::ThanksContribution).is_none() {
                return Err(CampaignError::MissingTemplate {
                    campaign: campaign.name.clone(),
                    category: "thanks_contribution".to_string(),
                });
            }

            if let Some(template) = campaign.message(MessageCategory::AskChangeContribution) {
                let has_terms = template
                    .answer_terms
                    .as_deref()
                    .is_some_and(|t| !t.trim().is_empty());
                if !has_terms {
                    return Err(CampaignError::Validation(format!(
                        "campaign '{}': ask_change_contribution template has no answer terms",
                        campaign.name
                    )));
                }
            }

            if let Some(extra_info) = &campaign.extra_info {
                check_pattern(
                    &extra_info.answer_format,
                    &format!("extra info '{}'", extra_info.name),
                )?;
                if extra_info
                    .message(MessageCategory::RequestAuthorExtrainfo)
                    .is_none()
                {
                    return Err(CampaignError::MissingTemplate {
                        campaign: campaign.name.clone(),
                        category: "request_author_extrainfo".to_string(),
                    });
                }
            }

            for challenge in &campaign.challenges {
                if !ids.insert(("challenge", challenge.id)) {
                    return Err(CampaignError::Validation(format!(
                        "duplicate challenge id {}",
                        challenge.id
                    )));
                }
                if !hashtags.insert(challenge.hashtag.to_lowercase()) {
                    return Err(CampaignError::DuplicateHashtag {
                        hashtag: challenge.hashtag.clone(),
                    });
                }
                if challenge.answer_style == AnswerStyle::Structured {
                    let pattern = challenge.answer_format.as_deref().ok_or_else(|| {
                        CampaignError::InvalidFormat {
                            context: format!("challenge '{}'", challenge.name),
                            message: "structured challenges need an answer format".to_string(),
                        }
                    })?;
                    check_pattern(pattern, &format!("challenge '{}'", challenge.name))?;
                }
            }
        }
    }
    Ok(())
}

fn check_pattern(pattern: &str, context: &str) -> Result<(), CampaignError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| CampaignError::InvalidFormat {
            context: context.to_string(),
            message: e.to_string(),
        })
}

// File schema; message ids are assigned at load time, everything else
// carries an explicit id so stored rows stay stable across edits

#[derive(Debug, Deserialize)]
struct CampaignsFile {
    #[serde(default)]
    initiatives: Vec<FileInitiative>,
}

#[derive(Debug, Deserialize)]
struct FileInitiative {
    id: i64,
    name: String,
    organizer: String,
    hashtag: String,
    url: Option<String>,
    language: String,
    account_id: String,
    sharing_message: Option<String>,
    #[serde(default)]
    campaigns: Vec<FileCampaign>,
}

impl FileInitiative {
    fn into_domain(self, message_id: &mut i64) -> Initiative {
        Initiative {
            id: self.id,
            name: self.name,
            organizer: self.organizer,
            hashtag: self.hashtag,
            url: self.url,
            language: self.language,
            account_id: self.account_id,
            sharing_message: self.sharing_message,
            campaigns: self
                .campaigns
                .into_iter()
                .map(|c| c.into_domain(message_id))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileCampaign {
    id: i64,
    name: String,
    hashtag: Option<String>,
    extra_info: Option<FileExtraInfo>,
    #[serde(default)]
    messages: Vec<FileMessage>,
    #[serde(default)]
    challenges: Vec<FileChallenge>,
}

impl FileCampaign {
    fn into_domain(self, message_id: &mut i64) -> Campaign {
        Campaign {
            id: self.id,
            name: self.name,
            hashtag: self.hashtag,
            extra_info: self.extra_info.map(|e| e.into_domain(message_id)),
            messages: self
                .messages
                .into_iter()
                .map(|m| m.into_domain(message_id))
                .collect(),
            challenges: self.challenges.into_iter().map(FileChallenge::into_domain).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileExtraInfo {
    name: String,
    description: Option<String>,
    answer_format: String,
    #[serde(default)]
    messages: Vec<FileMessage>,
}

impl FileExtraInfo {
    fn into_domain(self, message_id: &mut i64) -> ExtraInfo {
        ExtraInfo {
            name: self.name,
            description: self.description,
            answer_format: self.answer_format,
            messages: self
                .messages
                .into_iter()
                .map(|m| m.into_domain(message_id))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileMessage {
    name: String,
    body: String,
    category: MessageCategory,
    key_terms: String,
    answer_terms: Option<String>,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl FileMessage {
    fn into_domain(self, message_id: &mut i64) -> MessageTemplate {
        *message_id += 1;
        MessageTemplate {
            id: *message_id,
            name: self.name,
            body: self.body,
            category: self.category,
            key_terms: self.key_terms,
            answer_terms: self.answer_terms,
            language: self.language,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileChallenge {
    id: i64,
    name: String,
    hashtag: String,
    #[serde(default)]
    answer_style: AnswerStyle,
    answer_format: Option<String>,
    max_answer_length: Option<usize>,
    #[serde(default = "default_answers")]
    answers_from_same_author: i64,
    #[serde(default = "default_accept_changes")]
    accept_changes: bool,
    url: Option<String>,
}

fn default_answers() -> i64 {
    1
}

fn default_accept_changes() -> bool {
    true
}

impl FileChallenge {
    fn into_domain(self) -> Challenge {
        Challenge {
            id: self.id,
            name: self.name,
            hashtag: self.hashtag,
            answer_style: self.answer_style,
            answer_format: self.answer_format,
            max_answer_length: self.max_answer_length,
            answers_from_same_author: self.answers_from_same_author,
            accept_changes: self.accept_changes,
            url: self.url,
        }
    }
}

/// Example campaigns file, used by `config init` and the docs
pub fn example_toml() -> String {
    r#"# convoca campaign configuration

[[initiatives]]
id = 1
name = "City Voices"
organizer = "City Hall"
hashtag = "CityVoices"
url = "https://example.org/cityvoices"
language = "en"
# id_in_channel of the account the initiative posts from
account_id = "1234567890"
sharing_message = "Join the conversation about our city #CityVoices"

[[initiatives.campaigns]]
id = 10
name = "Parks"

[initiatives.campaigns.extra_info]
name = "zipcode"
description = "Postal code of the participant"
answer_format = '\d{5}'

[[initiatives.campaigns.extra_info.messages]]
name = "ask zipcode"
body = "{author} great! Please reply with your postal code so we can count your idea"
category = "request_author_extrainfo"
key_terms = "postal code"

[[initiatives.campaigns.extra_info.messages]]
name = "bad zipcode"
body = "{author} that does not look like a valid postal code, please try again"
category = "incorrect_author_extrainfo"
key_terms = "valid postal code"

[[initiatives.campaigns.messages]]
name = "thanks"
body = "{author} thanks for contributing to #{hashtag}! Follow along at {url}"
category = "thanks_contribution"
key_terms = "thanks contributing"

[[initiatives.campaigns.messages]]
name = "wrong format"
body = "{author} sorry, we could not read your answer ({date}). Check the expected format and try again"
category = "incorrect_answer"
key_terms = "could not read"

[[initiatives.campaigns.messages]]
name = "offer change"
body = "{author} you already said '{old_contribution}'. Reply {answer_terms} to replace it with '{new_contribution}'"
category = "ask_change_contribution"
key_terms = "already said replace"
answer_terms = "yes"

[[initiatives.campaigns.messages]]
name = "thanks change"
body = "{author} done, your answer is now '{contribution}'. More at {url}"
category = "thanks_change"
key_terms = "your answer is now"

[[initiatives.campaigns.messages]]
name = "cannot save"
body = "{author} we could not complete your contribution, so it was not saved ({date})"
category = "contribution_cannot_save"
key_terms = "not saved"

[[initiatives.campaigns.messages]]
name = "limit reached"
body = "{author} you already sent the maximum number of answers to #{hashtag} ({date})"
category = "limit_answers_reached"
key_terms = "maximum number"

[[initiatives.campaigns.messages]]
name = "banned"
body = "{author} you have been blocked from contributing after repeated invalid answers"
category = "author_banned"
key_terms = "been blocked"

[[initiatives.campaigns.messages]]
name = "change not understood"
body = "{author} we did not understand your reply, so your previous answer stays ({date})"
category = "not_understandable_change_contribution_reply"
key_terms = "did not understand"

[[initiatives.campaigns.messages]]
name = "already answered"
body = "{author} this challenge accepts a single answer and yours is already in ({date})"
category = "already_answered_unchangeable_challenge"
key_terms = "already in"

[[initiatives.campaigns.challenges]]
id = 100
name = "Best park"
hashtag = "BestPark"
answer_style = "free"
max_answer_length = 140
answers_from_same_author = 1
accept_changes = true
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_campaigns(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("campaigns.toml");
        fs::write(&path, content).expect("write campaigns file");
        path
    }

    #[tokio::test]
    async fn test_example_file_loads_and_validates() {
        let dir = TempDir::new().unwrap();
        let path = write_campaigns(&dir, &example_toml());

        let repo = TomlCampaignRepo::new(&path);
        let set = repo.load().await.unwrap();

        assert_eq!(set.initiatives.len(), 1);
        let initiative = &set.initiatives[0];
        assert_eq!(initiative.hashtag, "CityVoices");
        assert_eq!(initiative.campaigns.len(), 1);

        let campaign = &initiative.campaigns[0];
        assert!(campaign.extra_info.is_some());
        assert_eq!(campaign.challenges.len(), 1);
        assert!(campaign.message(MessageCategory::ThanksContribution).is_some());

        // Message ids are assigned uniquely across the whole file
        let mut seen = HashSet::new();
        for message in campaign.all_messages() {
            assert!(seen.insert(message.id));
        }
    }

    #[tokio::test]
    async fn test_missing_thanks_template_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_campaigns(
            &dir,
            r#"
[[initiatives]]
id = 1
name = "I"
organizer = "O"
hashtag = "Tag"
language = "en"
account_id = "1"

[[initiatives.campaigns]]
id = 10
name = "C"

[[initiatives.campaigns.challenges]]
id = 100
name = "Ch"
hashtag = "ChTag"
"#,
        );

        let repo = TomlCampaignRepo::new(&path);
        let error = repo.load().await.unwrap_err();
        assert!(matches!(error, CampaignError::MissingTemplate { .. }));
    }

    #[tokio::test]
    async fn test_invalid_structured_format_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_campaigns(
            &dir,
            r#"
[[initiatives]]
id = 1
name = "I"
organizer = "O"
hashtag = "Tag"
language = "en"
account_id = "1"

[[initiatives.campaigns]]
id = 10
name = "C"

[[initiatives.campaigns.messages]]
name = "thanks"
body = "thanks {author}"
category = "thanks_contribution"
key_terms = "thanks"

[[initiatives.campaigns.challenges]]
id = 100
name = "Ch"
hashtag = "ChTag"
answer_style = "structured"
answer_format = "(unclosed"
"#,
        );

        let repo = TomlCampaignRepo::new(&path);
        let error = repo.validate().await.unwrap_err();
        assert!(matches!(error, CampaignError::InvalidFormat { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_hashtags_are_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_campaigns(
            &dir,
            r#"
[[initiatives]]
id = 1
name = "I"
organizer = "O"
hashtag = "SameTag"
language = "en"
account_id = "1"

[[initiatives.campaigns]]
id = 10
name = "C"

[[initiatives.campaigns.messages]]
name = "thanks"
body = "thanks {author}"
category = "thanks_contribution"
key_terms = "thanks"

[[initiatives.campaigns.challenges]]
id = 100
name = "Ch"
hashtag = "sametag"
"#,
        );

        let repo = TomlCampaignRepo::new(&path);
        let error = repo.load().await.unwrap_err();
        assert!(matches!(error, CampaignError::DuplicateHashtag { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let repo = TomlCampaignRepo::new("/nonexistent/campaigns.toml");
        let error = repo.load().await.unwrap_err();
        assert!(matches!(error, CampaignError::Io(_)));
    }
}
