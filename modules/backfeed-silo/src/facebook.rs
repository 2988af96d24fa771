// Facebook Graph API silo.
//
// Posts arrive with their comment threads and attached links in one request;
// attached link URLs become `article` tags (the original posts a share is
// syndicated from).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tracing::info;

use backfeed_common::{tag_uri, Activity, ActivityTag, Author, PlatformKind, Reply, Source};

use crate::{Result, Silo, SiloError};

const GRAPH_URL: &str = "https://graph.facebook.com/v19.0";

/// Graph API error code for an invalidated access token.
const OAUTH_ERROR_CODE: u64 = 190;

pub struct FacebookSilo {
    client: reqwest::Client,
    timeout: Duration,
}

impl FacebookSilo {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn fetch_posts(&self, source: &Source, limit: u32) -> Result<Vec<FbPost>> {
        let url = format!(
            "{GRAPH_URL}/me/posts?fields=id,message,created_time,permalink_url,\
             attachments{{type,url,unshimmed_url}},\
             comments{{id,message,created_time,permalink_url,from}}&limit={limit}"
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&source.credential)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            if status.as_u16() == 401 || status.as_u16() == 403 || is_oauth_error(&body) {
                return Err(SiloError::Deauthorized);
            }
            return Err(SiloError::Fetch(format!("Graph API {status}: {body}")));
        }

        let feed: FbFeed =
            serde_json::from_str(&body).map_err(|e| SiloError::Fetch(e.to_string()))?;
        Ok(feed.data)
    }
}

#[async_trait]
impl Silo for FacebookSilo {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Facebook
    }

    fn short_name(&self) -> &'static str {
        "fb"
    }

    async fn fetch_new_comments(&self, source: &Source, limit: u32) -> Result<Vec<Activity>> {
        let posts = self.fetch_posts(source, limit).await?;
        info!(source = %source.id, posts = posts.len(), "Fetched Facebook posts");

        Ok(posts
            .into_iter()
            .map(|post| post_to_activity(source, post))
            .collect())
    }
}

fn post_to_activity(source: &Source, post: FbPost) -> Activity {
    let year = post.created_time.map(|t| t.year()).unwrap_or(1970);

    let tags = post
        .attachments
        .map(|a| a.data)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|att| {
            // unshimmed_url bypasses the l.facebook.com redirect wrapper
            let url = att.unshimmed_url.or(att.url)?;
            Some(ActivityTag {
                object_type: "article".to_string(),
                url: Some(url),
            })
        })
        .collect();

    let replies = post
        .comments
        .map(|c| c.data)
        .unwrap_or_default()
        .into_iter()
        .map(|comment| {
            let year = comment.created_time.map(|t| t.year()).unwrap_or(year);
            Reply {
                id: tag_uri("facebook.com", year, &comment.id),
                url: comment.permalink_url,
                author: comment.from.map(|f| Author {
                    url: Some(format!("https://www.facebook.com/{}", f.id)),
                    name: Some(f.name),
                }),
                content: comment.message.unwrap_or_default(),
                published: comment.created_time,
            }
        })
        .collect();

    Activity {
        id: tag_uri("facebook.com", year, &post.id),
        url: post.permalink_url,
        actor: Some(Author {
            name: Some(source.name.clone()),
            url: Some(format!("https://www.facebook.com/{}", source.id.as_str())),
        }),
        content: post.message.unwrap_or_default(),
        tags,
        replies,
    }
}

fn is_oauth_error(body: &str) -> bool {
    serde_json::from_str::<FbErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| e.code == OAUTH_ERROR_CODE)
        .unwrap_or(false)
}

// --- Graph API wire types ---

#[derive(Debug, Deserialize)]
struct FbErrorEnvelope {
    error: Option<FbError>,
}

#[derive(Debug, Deserialize)]
struct FbError {
    code: u64,
}

#[derive(Debug, Deserialize)]
struct FbFeed {
    #[serde(default)]
    data: Vec<FbPost>,
}

#[derive(Debug, Deserialize)]
struct FbPost {
    id: String,
    message: Option<String>,
    created_time: Option<DateTime<Utc>>,
    permalink_url: Option<String>,
    attachments: Option<FbAttachments>,
    comments: Option<FbComments>,
}

#[derive(Debug, Deserialize)]
struct FbAttachments {
    #[serde(default)]
    data: Vec<FbAttachment>,
}

#[derive(Debug, Deserialize)]
struct FbAttachment {
    url: Option<String>,
    unshimmed_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FbComments {
    #[serde(default)]
    data: Vec<FbComment>,
}

#[derive(Debug, Deserialize)]
struct FbComment {
    id: String,
    message: Option<String>,
    created_time: Option<DateTime<Utc>>,
    permalink_url: Option<String>,
    from: Option<FbProfile>,
}

#[derive(Debug, Deserialize)]
struct FbProfile {
    id: String,
    name: String,
}
