//! Activity datasets and the per-run read-only context built from them.
//!
//! Posts and comments are read once from line-delimited JSON and shared
//! by reference ([`DatasetContext`] is cheap to clone) across every
//! capability call and every concurrent run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::config::DataConfig;
use crate::error::{DatasetError, DatasetResult};

/// A submission. Every field is optional in the source data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, deserialize_with = "null_default")]
    pub author: String,
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub selftext: String,
    #[serde(default, deserialize_with = "null_default")]
    pub subreddit: String,
    #[serde(default, deserialize_with = "null_default")]
    pub score: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub created: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
}

/// A comment. Every field is optional in the source data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, deserialize_with = "null_default")]
    pub author: String,
    #[serde(default, deserialize_with = "null_default")]
    pub body: String,
    #[serde(default, deserialize_with = "null_default")]
    pub subreddit: String,
    #[serde(default, deserialize_with = "null_default")]
    pub score: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub created: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub parent_id: String,
}

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Summary statistics about a target, included in every investigation
/// question so the model does not need to re-derive them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnownFacts {
    pub user_id: String,
    pub total_posts: usize,
    pub total_comments: usize,
    pub total_activity: usize,
    pub top_posts_count: usize,
    pub top_comments_count: usize,
    pub avg_post_score: f64,
    pub avg_comment_score: f64,
    pub total_post_karma: i64,
    pub total_comment_karma: i64,
    pub posts_count: usize,
    pub comments_count: usize,
}

/// Read-only view over both datasets, shared by every run.
#[derive(Debug, Clone, Default)]
pub struct DatasetContext {
    posts: Arc<[Post]>,
    comments: Arc<[Comment]>,
}

impl DatasetContext {
    /// Wrap already-loaded records.
    pub fn new(posts: Vec<Post>, comments: Vec<Comment>) -> Self {
        Self {
            posts: posts.into(),
            comments: comments.into(),
        }
    }

    /// Load both datasets from the configured paths.
    pub async fn load(config: &DataConfig) -> DatasetResult<Self> {
        let posts = load_jsonl::<Post>(&config.posts_path).await?;
        let comments = load_jsonl::<Comment>(&config.comments_path).await?;

        info!(
            posts = posts.len(),
            comments = comments.len(),
            "Datasets loaded"
        );

        Ok(Self::new(posts, comments))
    }

    /// All posts.
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    /// All comments.
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    /// Posts written by `author`.
    pub fn posts_by<'a>(&'a self, author: &'a str) -> impl Iterator<Item = &'a Post> + 'a {
        self.posts.iter().filter(move |p| p.author == author)
    }

    /// Comments written by `author`.
    pub fn comments_by<'a>(&'a self, author: &'a str) -> impl Iterator<Item = &'a Comment> + 'a {
        self.comments.iter().filter(move |c| c.author == author)
    }

    /// Collect the known facts about `target`.
    pub fn collect_facts(&self, target: &str) -> KnownFacts {
        let post_scores: Vec<i64> = self.posts_by(target).map(|p| p.score).collect();
        let comment_scores: Vec<i64> = self.comments_by(target).map(|c| c.score).collect();

        let total_post_karma: i64 = post_scores.iter().sum();
        let total_comment_karma: i64 = comment_scores.iter().sum();

        KnownFacts {
            user_id: target.to_string(),
            total_posts: post_scores.len(),
            total_comments: comment_scores.len(),
            total_activity: post_scores.len() + comment_scores.len(),
            top_posts_count: post_scores.len().min(5),
            top_comments_count: comment_scores.len().min(5),
            avg_post_score: mean(total_post_karma, post_scores.len()),
            avg_comment_score: mean(total_comment_karma, comment_scores.len()),
            total_post_karma,
            total_comment_karma,
            posts_count: post_scores.len(),
            comments_count: comment_scores.len(),
        }
    }
}

fn mean(sum: i64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Read line-delimited JSON records. Blank lines are ignored; malformed
/// lines are logged and skipped.
pub async fn load_jsonl<T>(path: &Path) -> DatasetResult<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| io_error(path, source))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed record"
                );
            }
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, loaded = records.len(), "Some records were skipped");
    }

    Ok(records)
}

/// Load the analysis categories document handed to the expert, checker and
/// scorer prompts. A missing file yields an empty object.
pub async fn load_categories(path: &Path) -> DatasetResult<serde_json::Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => serde_json::from_str(&text).map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Analysis categories not found; continuing without them");
            Ok(serde_json::Value::Object(Default::default()))
        }
        Err(source) => Err(io_error(path, source)),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> DatasetError {
    if source.kind() == std::io::ErrorKind::NotFound {
        DatasetError::NotFound {
            path: PathBuf::from(path),
        }
    } else {
        DatasetError::Io {
            path: PathBuf::from(path),
            source,
        }
    }
}
