// Twitter API v2 silo.
//
// Recent tweets plus the replies to each. Expanded URLs from tweet entities
// become `article` tags; t.co wrappers are already resolved by the API, and
// shortener domains that survive get dropped by the target filter downstream.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tracing::info;

use backfeed_common::{tag_uri, Activity, ActivityTag, Author, PlatformKind, Reply, Source};

use crate::{Result, Silo, SiloError};

const API_URL: &str = "https://api.twitter.com/2";

pub struct TwitterSilo {
    client: reqwest::Client,
    timeout: Duration,
}

impl TwitterSilo {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        source: &Source,
        url: &str,
    ) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&source.credential)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SiloError::Deauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SiloError::Fetch(format!("Twitter API {status}: {body}")));
        }

        resp.json().await.map_err(SiloError::from)
    }

    async fn fetch_timeline(&self, source: &Source, limit: u32) -> Result<Vec<Tweet>> {
        let url = format!(
            "{API_URL}/users/{}/tweets?max_results={limit}\
             &tweet.fields=created_at,entities,conversation_id\
             &expansions=author_id&user.fields=name,username",
            source.id.as_str()
        );
        let page: TweetPage = self.get_json(source, &url).await?;
        Ok(page.data)
    }

    /// Replies live in the conversation thread; one search per tweet.
    async fn fetch_replies(&self, source: &Source, tweet: &Tweet) -> Result<Vec<Reply>> {
        let conversation = match &tweet.conversation_id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        let url = format!(
            "{API_URL}/tweets/search/recent?query=conversation_id:{conversation}\
             &tweet.fields=created_at,author_id\
             &expansions=author_id&user.fields=name,username"
        );
        let page: TweetPage = self.get_json(source, &url).await?;

        let users = page.includes.map(|i| i.users).unwrap_or_default();
        Ok(page
            .data
            .into_iter()
            .filter(|t| t.id != tweet.id)
            .map(|t| {
                let author = t
                    .author_id
                    .as_deref()
                    .and_then(|id| users.iter().find(|u| u.id == id));
                let year = t.created_at.map(|c| c.year()).unwrap_or(1970);
                Reply {
                    id: tag_uri("twitter.com", year, &t.id),
                    url: author.map(|a| {
                        format!("https://twitter.com/{}/status/{}", a.username, t.id)
                    }),
                    author: author.map(|a| Author {
                        name: Some(a.name.clone()),
                        url: Some(format!("https://twitter.com/{}", a.username)),
                    }),
                    content: t.text,
                    published: t.created_at,
                }
            })
            .collect())
    }
}

#[async_trait]
impl Silo for TwitterSilo {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Twitter
    }

    fn short_name(&self) -> &'static str {
        "tw"
    }

    async fn fetch_new_comments(&self, source: &Source, limit: u32) -> Result<Vec<Activity>> {
        let tweets = self.fetch_timeline(source, limit).await?;
        info!(source = %source.id, tweets = tweets.len(), "Fetched Twitter timeline");

        let mut activities = Vec::with_capacity(tweets.len());
        for tweet in tweets {
            let replies = self.fetch_replies(source, &tweet).await?;
            activities.push(tweet_to_activity(source, tweet, replies));
        }
        Ok(activities)
    }
}

fn tweet_to_activity(source: &Source, tweet: Tweet, replies: Vec<Reply>) -> Activity {
    let year = tweet.created_at.map(|c| c.year()).unwrap_or(1970);

    let tags = tweet
        .entities
        .map(|e| e.urls)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|u| {
            // prefer the unwound target over the display form
            let url = u.unwound_url.or(u.expanded_url)?;
            Some(ActivityTag {
                object_type: "article".to_string(),
                url: Some(url),
            })
        })
        .collect();

    Activity {
        id: tag_uri("twitter.com", year, &tweet.id),
        url: Some(format!(
            "https://twitter.com/{}/status/{}",
            source.name, tweet.id
        )),
        actor: Some(Author {
            name: Some(source.name.clone()),
            url: Some(format!("https://twitter.com/{}", source.name)),
        }),
        content: tweet.text,
        tags,
        replies,
    }
}

// --- API v2 wire types ---

#[derive(Debug, Deserialize)]
struct TweetPage {
    #[serde(default)]
    data: Vec<Tweet>,
    includes: Option<Includes>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<TwitterUser>,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id: String,
    name: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    created_at: Option<DateTime<Utc>>,
    author_id: Option<String>,
    conversation_id: Option<String>,
    entities: Option<TweetEntities>,
}

#[derive(Debug, Deserialize)]
struct TweetEntities {
    #[serde(default)]
    urls: Vec<TweetUrl>,
}

#[derive(Debug, Deserialize)]
struct TweetUrl {
    expanded_url: Option<String>,
    unwound_url: Option<String>,
}
