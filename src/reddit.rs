use std::future::Future;

use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::metadata::MetadataStore;
use crate::utils::{chunk_text, sanitize_id, sanitize_text};

const BASE_URL: &str = "https://www.reddit.com";
const BOT_USER_AGENT: &str = "reddit-shorts-bot-rust/0.1";
/// Listings tried after `hot`, in order, each with a larger limit.
const TIME_FILTERS: [&str; 6] = ["day", "hour", "month", "week", "year", "all"];
const STORY_MIN_LENGTH: usize = 30;
const PARAGRAPH_CHARS: usize = 250;

#[derive(Debug, Deserialize)]
pub struct RedditListing {
    pub data: RedditListingData,
}

#[derive(Debug, Deserialize)]
pub struct RedditListingData {
    pub children: Vec<RedditChild>,
}

/// `kind` is `t3` for posts, `t1` for comments and `more` for collapsed replies.
#[derive(Debug, Deserialize)]
pub struct RedditChild {
    pub kind: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub is_self: Option<bool>,
    pub over_18: Option<bool>,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub num_comments: u32,
    #[serde(default)]
    pub permalink: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditComment {
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub stickied: bool,
}

impl RedditListing {
    fn things<T: DeserializeOwned>(self, kind: &str) -> Vec<T> {
        self.data
            .children
            .into_iter()
            .filter(|child| child.kind == kind)
            .filter_map(|child| match serde_json::from_value(child.data) {
                Ok(thing) => Some(thing),
                Err(e) => {
                    debug!("skipping malformed {kind}: {e}");
                    None
                }
            })
            .collect()
    }

    pub fn posts(self) -> Vec<RedditPost> {
        self.things("t3")
    }

    pub fn comments(self) -> Vec<RedditComment> {
        self.things("t1")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub url: String,
}

/// A thread chosen for narration, with its comments already filtered.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub over_18: bool,
    pub comments: Vec<Comment>,
}

impl Thread {
    /// Filesystem-safe id used to name the run's temporary directory.
    pub fn run_id(&self) -> String {
        sanitize_id(&self.id)
    }

    /// The body split into narration paragraphs of whole sentences.
    pub fn paragraphs(&self) -> Vec<String> {
        if self.body.trim().is_empty() {
            return Vec::new();
        }
        chunk_text(&self.body, PARAGRAPH_CHARS)
    }
}

/// Which posts and comments are eligible, read from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadFilter {
    pub allow_nsfw: bool,
    pub min_comments: u32,
    pub storymode: bool,
    pub story_max_length: usize,
    pub comment_min_length: usize,
    pub comment_max_length: usize,
    pub max_comments: usize,
}

impl ThreadFilter {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allow_nsfw: config.reddit.allow_nsfw,
            min_comments: config.reddit.min_comments,
            storymode: config.settings.storymode,
            story_max_length: config.settings.storymode_max_length,
            comment_min_length: config.reddit.comment_min_length,
            comment_max_length: config.reddit.comment_max_length,
            max_comments: config.reddit.max_comments,
        }
    }

    /// Why `post` cannot be used, if it cannot.
    pub fn rejects(&self, post: &RedditPost) -> Option<String> {
        if post.over_18.unwrap_or(false) && !self.allow_nsfw {
            return Some("NSFW".to_string());
        }
        if post.stickied {
            return Some("stickied".to_string());
        }
        if !self.storymode {
            if post.num_comments <= self.min_comments {
                return Some(format!(
                    "{} comments, needs more than {}",
                    post.num_comments, self.min_comments
                ));
            }
            return None;
        }
        let length = post.selftext.chars().count();
        if post.selftext.trim().is_empty() {
            Some("no post text".to_string())
        } else if length > self.story_max_length {
            Some(format!("post text too long ({length} chars)"))
        } else if length < STORY_MIN_LENGTH {
            Some(format!("post text too short ({length} chars)"))
        } else if !post.is_self.unwrap_or(true) {
            Some("not a self post".to_string())
        } else {
            None
        }
    }

    /// First post that passes the filters and has not been rendered yet.
    pub fn pick(
        &self,
        posts: Vec<RedditPost>,
        store: &dyn MetadataStore,
    ) -> PipelineResult<Option<RedditPost>> {
        for post in posts {
            if store.already_done(&post.id)? {
                debug!(id = %post.id, "already rendered");
                continue;
            }
            if let Some(reason) = self.rejects(&post) {
                info!(id = %post.id, "Skipping post: {reason}");
                continue;
            }
            return Ok(Some(post));
        }
        Ok(None)
    }

    /// Keeps readable comments within the length bounds, at most `max_comments`.
    pub fn comments(&self, comments: Vec<RedditComment>) -> Vec<Comment> {
        comments
            .into_iter()
            .filter(|c| !c.stickied && !matches!(c.body.trim(), "[removed]" | "[deleted]"))
            .filter_map(|c| {
                let body = sanitize_text(&c.body);
                let length = body.chars().count();
                if body.is_empty()
                    || length < self.comment_min_length
                    || length > self.comment_max_length
                {
                    return None;
                }
                Some(Comment {
                    url: permalink_url(&c.permalink),
                    id: c.id,
                    body,
                })
            })
            .take(self.max_comments)
            .collect()
    }
}

fn permalink_url(permalink: &str) -> String {
    if permalink.starts_with("http") {
        permalink.to_string()
    } else {
        format!("{BASE_URL}{permalink}")
    }
}

/// Where threads come from.
pub trait ContentSource {
    fn next_thread(&self) -> impl Future<Output = PipelineResult<Thread>>;
}

/// Reads Reddit's public JSON endpoints.
pub struct RedditSource<'a> {
    client: reqwest::Client,
    base_url: String,
    subreddit: String,
    post_id: Option<String>,
    thread_limit: u32,
    filter: ThreadFilter,
    store: &'a dyn MetadataStore,
}

impl<'a> RedditSource<'a> {
    pub fn new(config: &Config, store: &'a dyn MetadataStore) -> Self {
        let subreddit = config
            .reddit
            .subreddit
            .trim()
            .trim_start_matches("r/")
            .to_string();
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
            subreddit,
            post_id: None,
            thread_limit: config.reddit.thread_limit.max(1),
            filter: ThreadFilter::from_config(config),
            store,
        }
    }

    /// Fetch exactly this thread instead of searching the listings.
    pub fn with_post_id(mut self, post_id: Option<&str>) -> Self {
        self.post_id = post_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> PipelineResult<T> {
        debug!(url, "requesting");
        let body = self
            .client
            .get(url)
            .header(USER_AGENT, BOT_USER_AGENT)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| PipelineError::content(format!("{url}: {e}")))?
            .text()
            .await
            .map_err(|e| PipelineError::content(format!("{url}: {e}")))?;
        serde_json::from_str(&body).map_err(|e| PipelineError::content(format!("{url}: {e}")))
    }

    async fn find_post(&self) -> PipelineResult<RedditPost> {
        let hot = format!(
            "{}/r/{}/hot.json?limit={}",
            self.base_url, self.subreddit, self.thread_limit
        );
        let listing: RedditListing = self.get_json(&hot).await?;
        if let Some(post) = self.filter.pick(listing.posts(), self.store)? {
            return Ok(post);
        }

        for (i, time) in TIME_FILTERS.iter().enumerate() {
            let limit = self.thread_limit * (i as u32 + 2);
            warn!("No usable hot thread yet; trying top of the {time} (limit {limit})");
            let url = format!(
                "{}/r/{}/top.json?t={time}&limit={limit}",
                self.base_url, self.subreddit
            );
            let listing: RedditListing = self.get_json(&url).await?;
            if let Some(post) = self.filter.pick(listing.posts(), self.store)? {
                return Ok(post);
            }
        }
        Err(PipelineError::content(format!(
            "no suitable thread found in r/{}",
            self.subreddit
        )))
    }

    /// The post and its top-level comments.
    async fn fetch_thread(&self, id: &str) -> PipelineResult<(RedditPost, Vec<RedditComment>)> {
        let url = format!("{}/comments/{id}.json", self.base_url);
        let listings: Vec<RedditListing> = self.get_json(&url).await?;
        let mut listings = listings.into_iter();
        let post = listings
            .next()
            .and_then(|listing| listing.posts().into_iter().next())
            .ok_or_else(|| PipelineError::content(format!("thread {id} not found")))?;
        let comments = listings.next().map(RedditListing::comments).unwrap_or_default();
        Ok((post, comments))
    }
}

impl ContentSource for RedditSource<'_> {
    async fn next_thread(&self) -> PipelineResult<Thread> {
        let id = match &self.post_id {
            Some(id) => {
                info!("Using configured thread {id}");
                id.clone()
            }
            None => {
                info!("Looking for a thread in r/{}", self.subreddit);
                self.find_post().await?.id
            }
        };

        let (post, comments) = self.fetch_thread(&id).await?;
        let thread = build_thread(post, comments, &self.filter);
        info!(
            "Selected \"{}\" with {} usable comments",
            thread.title,
            thread.comments.len()
        );
        Ok(thread)
    }
}

pub fn build_thread(post: RedditPost, comments: Vec<RedditComment>, filter: &ThreadFilter) -> Thread {
    let comments = if filter.storymode {
        Vec::new()
    } else {
        filter.comments(comments)
    };
    Thread {
        url: permalink_url(&post.permalink),
        id: post.id,
        title: post.title.trim().to_string(),
        body: sanitize_text(&post.selftext),
        over_18: post.over_18.unwrap_or(false),
        comments,
    }
}
