//! X API recent-search listener yielding normalized inbound posts

use async_trait::async_trait;
use convoca_domain::{ChannelError, ChannelListener, InboundAuthor, InboundPost};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use time::OffsetDateTime;

// Tweets posted through a social-sharing button carry this source
const SHARING_BUTTON_SOURCE: &str = "Twitter for Websites";

/// Polls the recent-search endpoint for the tracked hashtags and yields
/// posts one at a time, oldest first. The since_id cursor lives in the
/// listener; conversation state lives in the stores.
pub struct XListener {
    client: Client,
    bearer_token: SecretString,
    base_url: String,
    query: String,
    since_id: Option<String>,
    buffer: VecDeque<InboundPost>,
}

impl XListener {
    pub fn new(bearer_token: SecretString, hashtags: Vec<String>) -> Self {
        Self::with_base_url(bearer_token, "https://api.twitter.com".to_string(), hashtags)
    }

    pub fn with_base_url(
        bearer_token: SecretString,
        base_url: String,
        hashtags: Vec<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        let query = hashtags
            .iter()
            .map(|tag| format!("#{}", tag.trim_start_matches('#')))
            .collect::<Vec<_>>()
            .join(" OR ");

        Self {
            client,
            bearer_token,
            base_url,
            query,
            since_id: None,
            buffer: VecDeque::new(),
        }
    }

    async fn poll(&mut self) -> Result<(), ChannelError> {
        let mut url = format!(
            "{}/2/tweets/search/recent?query={}&max_results=100\
             &tweet.fields=created_at,source,entities,author_id,referenced_tweets\
             &expansions=author_id,referenced_tweets.id\
             &user.fields=name,username,description,lang",
            self.base_url,
            urlencode(&self.query)
        );
        if let Some(since_id) = &self.since_id {
            url.push_str(&format!("&since_id={}", since_id));
        }

        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.bearer_token.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ChannelError::Auth("Invalid bearer token".to_string()));
        }
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ChannelError::RateLimited(None));
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("Search failed: {}", body)));
        }

        let search: SearchResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Api(e.to_string()))?;

        let includes = search.includes.unwrap_or_default();
        let mut tweets = search.data.unwrap_or_default();
        // Snowflake ids are chronological; oldest first keeps stream order
        tweets.sort_by(|a, b| a.id.cmp(&b.id));

        for tweet in tweets {
            if self
                .since_id
                .as_ref()
                .is_none_or(|since| tweet.id.as_str() > since.as_str())
            {
                self.since_id = Some(tweet.id.clone());
            }
            self.buffer.push_back(convert(&tweet, &includes));
        }

        tracing::debug!(
            buffered = self.buffer.len(),
            since_id = ?self.since_id,
            "Polled recent search"
        );
        Ok(())
    }
}

#[async_trait]
impl ChannelListener for XListener {
    async fn next_post(&mut self) -> Result<Option<InboundPost>, ChannelError> {
        if self.buffer.is_empty() {
            self.poll().await?;
        }
        Ok(self.buffer.pop_front())
    }
}

fn urlencode(query: &str) -> String {
    query
        .replace('%', "%25")
        .replace('#', "%23")
        .replace(' ', "%20")
}

#[derive(Deserialize)]
struct SearchResponse {
    data: Option<Vec<Tweet>>,
    includes: Option<Includes>,
}

#[derive(Deserialize, Default)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    tweets: Vec<Tweet>,
}

#[derive(Deserialize, Clone)]
struct Tweet {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<String>,
    source: Option<String>,
    entities: Option<Entities>,
    referenced_tweets: Option<Vec<ReferencedTweet>>,
}

#[derive(Deserialize, Clone)]
struct Entities {
    #[serde(default)]
    hashtags: Vec<HashtagEntity>,
}

#[derive(Deserialize, Clone)]
struct HashtagEntity {
    tag: String,
}

#[derive(Deserialize, Clone)]
struct ReferencedTweet {
    r#type: String,
    id: String,
}

#[derive(Deserialize, Clone)]
struct User {
    id: String,
    name: String,
    username: String,
    lang: Option<String>,
}

fn convert(tweet: &Tweet, includes: &Includes) -> InboundPost {
    let author = tweet
        .author_id
        .as_deref()
        .and_then(|id| includes.users.iter().find(|u| u.id == id));

    let parent_id = tweet.referenced_tweets.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| r.r#type == "replied_to")
            .map(|r| r.id.clone())
    });

    let org_post = tweet
        .referenced_tweets
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.r#type == "retweeted"))
        .and_then(|retweeted| includes.tweets.iter().find(|t| t.id == retweeted.id))
        .map(|org| Box::new(convert(org, &Includes::default())));

    let hashtags = tweet
        .entities
        .as_ref()
        .map(|e| {
            e.hashtags
                .iter()
                .map(|h| h.tag.to_lowercase().trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    let created_at = tweet
        .created_at
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok())
        .unwrap_or_else(OffsetDateTime::now_utc);

    let screen_name = author.map(|u| u.username.clone()).unwrap_or_default();

    InboundPost {
        id: tweet.id.clone(),
        text: tweet.text.clone(),
        parent_id,
        author: InboundAuthor {
            id: tweet.author_id.clone().unwrap_or_default(),
            name: author.map(|u| u.name.clone()).unwrap_or_default(),
            screen_name: screen_name.clone(),
            url: (!screen_name.is_empty()).then(|| format!("https://x.com/{}", screen_name)),
            language: author.and_then(|u| u.lang.clone()),
        },
        hashtags,
        url: format!("https://x.com/{}/status/{}", screen_name, tweet.id),
        created_at,
        votes: 0,
        re_posts: 0,
        bookmarks: 0,
        source: tweet.source.clone(),
        sharing_post: tweet.source.as_deref() == Some(SHARING_BUTTON_SOURCE),
        org_post,
        channel: "x".to_string(),
    }
}

/// Convert a single-tweet lookup response (`GET /2/tweets/:id`) into a
/// normalized post
pub(crate) fn post_from_lookup(body: &serde_json::Value) -> Option<InboundPost> {
    #[derive(Deserialize)]
    struct Lookup {
        data: Tweet,
        includes: Option<Includes>,
    }

    let lookup: Lookup = serde_json::from_value(body.clone()).ok()?;
    Some(convert(&lookup.data, &lookup.includes.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param_contains};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn search_body() -> serde_json::Value {
        serde_json::json!({
            "data": [
                {
                    "id": "2",
                    "text": "Reply post #CityVoices",
                    "author_id": "u1",
                    "created_at": "2024-01-15T13:00:00Z",
                    "source": "Twitter for iPhone",
                    "entities": {"hashtags": [{"tag": "CityVoices"}]},
                    "referenced_tweets": [{"type": "replied_to", "id": "0"}]
                },
                {
                    "id": "1",
                    "text": "Join the conversation #CityVoices #BestPark",
                    "author_id": "u1",
                    "created_at": "2024-01-15T12:00:00Z",
                    "source": "Twitter for Websites",
                    "entities": {"hashtags": [{"tag": "CityVoices"}, {"tag": "BestPark"}]}
                }
            ],
            "includes": {
                "users": [
                    {"id": "u1", "name": "User One", "username": "userone", "lang": "en"}
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_listener_yields_oldest_first_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/search/recent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .mount(&server)
            .await;

        let mut listener = XListener::with_base_url(
            SecretString::new("token".into()),
            server.uri(),
            vec!["CityVoices".to_string(), "BestPark".to_string()],
        );

        let first = listener.next_post().await.unwrap().unwrap();
        assert_eq!(first.id, "1");
        assert!(first.sharing_post);
        assert_eq!(first.hashtags, vec!["cityvoices", "bestpark"]);
        assert_eq!(first.author.screen_name, "userone");
        assert!(first.parent_id.is_none());

        let second = listener.next_post().await.unwrap().unwrap();
        assert_eq!(second.id, "2");
        assert!(!second.sharing_post);
        assert_eq!(second.parent_id.as_deref(), Some("0"));
        assert_eq!(second.url, "https://x.com/userone/status/2");
    }

    #[tokio::test]
    async fn test_listener_advances_since_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/search/recent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/search/recent"))
            .and(query_param_contains("since_id", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let mut listener = XListener::with_base_url(
            SecretString::new("token".into()),
            server.uri(),
            vec!["CityVoices".to_string()],
        );

        assert!(listener.next_post().await.unwrap().is_some());
        assert!(listener.next_post().await.unwrap().is_some());
        // Buffer drained; next call polls again with the cursor set
        assert!(listener.next_post().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retweet_carries_original_post() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/search/recent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "id": "3",
                    "text": "RT @userone: Join the conversation",
                    "author_id": "u2",
                    "created_at": "2024-01-15T14:00:00Z",
                    "referenced_tweets": [{"type": "retweeted", "id": "1"}]
                }],
                "includes": {
                    "users": [{"id": "u2", "name": "User Two", "username": "usertwo"}],
                    "tweets": [{
                        "id": "1",
                        "text": "Join the conversation #CityVoices",
                        "author_id": "u1"
                    }]
                }
            })))
            .mount(&server)
            .await;

        let mut listener = XListener::with_base_url(
            SecretString::new("token".into()),
            server.uri(),
            vec!["CityVoices".to_string()],
        );

        let post = listener.next_post().await.unwrap().unwrap();
        assert_eq!(post.id, "3");
        let org = post.org_post.expect("original post attached");
        assert_eq!(org.id, "1");
        assert!(org.text.contains("Join the conversation"));
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_as_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/search/recent"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let mut listener = XListener::with_base_url(
            SecretString::new("token".into()),
            server.uri(),
            vec!["CityVoices".to_string()],
        );

        let error = listener.next_post().await.unwrap_err();
        assert!(matches!(error, ChannelError::RateLimited(_)));
    }
}
