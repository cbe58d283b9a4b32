//! X API v2 client implementing the outbound channel port

use async_trait::async_trait;
use convoca_domain::{ChannelClient, ChannelError, ChannelUser, Delivery, InboundPost};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

// Platform error codes that make a message permanently undeliverable
const CODE_DUPLICATE: u32 = 187;
const CODE_TOO_LONG: u32 = 186;

/// X API v2 channel client
pub struct XChannel {
    client: Client,
    user_token: SecretString,
    base_url: String,
}

impl XChannel {
    pub fn new(user_token: SecretString) -> Self {
        Self::with_base_url(user_token, "https://api.twitter.com".to_string())
    }

    pub fn with_base_url(user_token: SecretString, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            user_token,
            base_url,
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.user_token.expose_secret())
    }

    async fn create_tweet(&self, request: &CreateTweetRequest) -> Result<Delivery, ChannelError> {
        let url = format!("{}/2/tweets", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer())
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let tweet: CreateTweetResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Api(e.to_string()))?;

        Ok(Delivery {
            id: tweet.data.id.clone(),
            url: Some(format!("https://x.com/i/status/{}", tweet.data.id)),
            text: tweet.data.text.unwrap_or_else(|| request.text.clone()),
        })
    }
}

/// Map an unsuccessful response onto the channel error taxonomy. Which
/// platform codes mean "permanently undeliverable" is decided here, not
/// in the core.
async fn check_status(response: Response) -> Result<Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(ChannelError::Auth("Invalid user token".to_string()));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|ts| {
                let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
                Duration::from_secs(ts.saturating_sub(now))
            });
        return Err(ChannelError::RateLimited(retry_after));
    }

    let body = response.text().await.unwrap_or_default();

    if let Ok(errors) = serde_json::from_str::<ErrorBody>(&body) {
        for error in errors.errors {
            match error.code {
                Some(CODE_DUPLICATE) => return Err(ChannelError::Duplicate),
                Some(CODE_TOO_LONG) => {
                    return Err(ChannelError::ContentTooLong { len: 0, max: 280 });
                }
                _ => {}
            }
            let message = error
                .detail
                .or(error.message)
                .unwrap_or_default()
                .to_lowercase();
            if message.contains("duplicate content") {
                return Err(ChannelError::Duplicate);
            }
            if message.contains("too long") {
                return Err(ChannelError::ContentTooLong { len: 0, max: 280 });
            }
        }
    }

    Err(ChannelError::Api(format!("{}: {}", status, body)))
}

#[derive(Serialize)]
struct CreateTweetRequest {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplySettings>,
}

#[derive(Serialize)]
struct ReplySettings {
    in_reply_to_tweet_id: String,
}

#[derive(Deserialize)]
struct CreateTweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<u32>,
    message: Option<String>,
    detail: Option<String>,
}

#[derive(Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
    name: String,
    username: String,
}

#[derive(Serialize)]
struct DirectMessageRequest {
    text: String,
}

#[derive(Deserialize)]
struct DirectMessageResponse {
    data: DirectMessageData,
}

#[derive(Deserialize)]
struct DirectMessageData {
    dm_event_id: String,
}

#[async_trait]
impl ChannelClient for XChannel {
    async fn authenticate(&self) -> Result<(), ChannelError> {
        let url = format!("{}/2/users/me", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }

    async fn post_public(&self, text: &str) -> Result<Delivery, ChannelError> {
        self.create_tweet(&CreateTweetRequest {
            text: text.to_string(),
            reply: None,
        })
        .await
    }

    async fn reply_to(&self, text: &str, parent_id: &str) -> Result<Delivery, ChannelError> {
        self.create_tweet(&CreateTweetRequest {
            text: text.to_string(),
            reply: Some(ReplySettings {
                in_reply_to_tweet_id: parent_id.to_string(),
            }),
        })
        .await
    }

    async fn send_direct(
        &self,
        text: &str,
        recipient_id: &str,
    ) -> Result<Delivery, ChannelError> {
        let url = format!(
            "{}/2/dm_conversations/with/{}/messages",
            self.base_url, recipient_id
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer())
            .header("Content-Type", "application/json")
            .json(&DirectMessageRequest {
                text: text.to_string(),
            })
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let message: DirectMessageResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Api(e.to_string()))?;

        Ok(Delivery {
            id: message.data.dm_event_id,
            url: None,
            text: text.to_string(),
        })
    }

    async fn get_post(&self, id: &str) -> Result<Option<InboundPost>, ChannelError> {
        let url = format!(
            "{}/2/tweets/{}?tweet.fields=created_at,source,entities&expansions=author_id",
            self.base_url, id
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChannelError::Api(e.to_string()))?;

        Ok(super::listener::post_from_lookup(&body))
    }

    async fn delete_post(&self, id: &str) -> Result<(), ChannelError> {
        let url = format!("{}/2/tweets/{}", self.base_url, id);
        let response = self
            .client
            .delete(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }

    async fn user_info(&self, id: &str) -> Result<ChannelUser, ChannelError> {
        let url = format!("{}/2/users/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        let response = check_status(response).await?;
        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Api(e.to_string()))?;

        Ok(ChannelUser {
            id: user.data.id,
            name: user.data.name,
            screen_name: user.data.username,
        })
    }

    fn name(&self) -> &'static str {
        "x"
    }
}
