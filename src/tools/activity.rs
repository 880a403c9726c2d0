//! Built-in user and community activity capabilities.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{CapabilityDescriptor, CapabilityRegistry};
use crate::dataset::{Comment, DatasetContext, Post};
use crate::error::CapabilityResult;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "you", "that", "this", "but", "not", "are", "were", "was", "will",
    "would", "could", "should", "can", "if", "in", "on", "at", "by",
];

const POSITIVE_WORDS: &[&str] = &[
    "good",
    "great",
    "excellent",
    "awesome",
    "amazing",
    "perfect",
    "wonderful",
    "fantastic",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad",
    "terrible",
    "awful",
    "horrible",
    "worst",
    "disappointing",
    "poor",
];

/// Assumed span of the dataset when computing daily post frequency.
const DATASET_DAYS: f64 = 30.0;

#[derive(Debug, Deserialize, JsonSchema)]
struct UserArgs {
    /// Reddit user ID
    user_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UserTopArgs {
    /// Reddit user ID
    user_id: String,
    /// Number of top items to return
    #[serde(default = "default_top_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UserKeywordArgs {
    /// Reddit user ID
    user_id: String,
    /// Number of top keywords to return
    #[serde(default = "default_keyword_count")]
    top_n: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CommunityArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
struct CommunityTopArgs {
    /// Number of top authors to return
    #[serde(default = "default_author_limit")]
    limit: usize,
}

fn default_top_limit() -> usize {
    5
}

fn default_keyword_count() -> usize {
    10
}

fn default_author_limit() -> usize {
    10
}

/// Post fields exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    /// Post title.
    pub title: String,
    /// Post body text.
    pub selftext: String,
    /// Community the item was posted in.
    pub subreddit: String,
    /// Net votes.
    pub score: i64,
    /// Reddit id.
    pub id: String,
    /// Creation time, Unix seconds.
    pub created: f64,
    /// Link target of the post.
    pub url: String,
}

impl From<&Post> for PostView {
    fn from(post: &Post) -> Self {
        Self {
            title: post.title.clone(),
            selftext: post.selftext.clone(),
            subreddit: post.subreddit.clone(),
            score: post.score,
            id: post.id.clone(),
            created: post.created,
            url: post.url.clone(),
        }
    }
}

/// Comment fields exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentView {
    /// Comment text.
    pub body: String,
    /// Community the item was posted in.
    pub subreddit: String,
    /// Net votes.
    pub score: i64,
    /// Reddit id.
    pub id: String,
    /// Creation time, Unix seconds.
    pub created: f64,
    /// Fullname of the post or comment replied to.
    pub parent_id: String,
}

impl From<&Comment> for CommentView {
    fn from(comment: &Comment) -> Self {
        Self {
            body: comment.body.clone(),
            subreddit: comment.subreddit.clone(),
            score: comment.score,
            id: comment.id.clone(),
            created: comment.created,
            parent_id: comment.parent_id.clone(),
        }
    }
}

/// Number of posts and comments written by a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityCount {
    /// Posts counted.
    pub total_posts: usize,
    /// Comments counted.
    pub total_comments: usize,
    /// Posts plus comments.
    pub total_activity: usize,
}

/// Score totals of a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Karma {
    /// Sum of post scores.
    pub post_karma: i64,
    /// Sum of comment scores.
    pub comment_karma: i64,
    /// Post plus comment karma.
    pub total_karma: i64,
}

/// Lexicon-based sentiment averages of a user, in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentSummary {
    /// Mean post sentiment.
    pub avg_post_sentiment: f64,
    /// Mean comment sentiment.
    pub avg_comment_sentiment: f64,
    /// Mean over posts and comments together.
    pub overall_sentiment: f64,
    /// Posts scored.
    pub post_sentiment_count: usize,
    /// Comments scored.
    pub comment_sentiment_count: usize,
}

/// Size of the whole dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityStats {
    /// Posts counted.
    pub total_posts: usize,
    /// Comments counted.
    pub total_comments: usize,
    /// Distinct authors.
    pub total_authors: usize,
    /// Comments divided by posts, 0 when there are no posts.
    pub avg_comments_per_post: f64,
}

/// Posts plus comments of one author.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorActivity {
    /// Author name.
    pub author: String,
    /// Posts plus comments.
    pub activity_count: usize,
}

/// Posting rate over the dataset window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostFrequency {
    /// Posts counted.
    pub total_posts: usize,
    /// Posts divided by the fixed dataset window.
    pub avg_posts_per_day: f64,
}

/// Register the twelve built-in activity capabilities.
pub fn register_activity_capabilities(registry: &mut CapabilityRegistry) -> CapabilityResult<()> {
    let capabilities = [
        CapabilityDescriptor::typed(
            "get_user_post_activity",
            "Get all posts by a specific user",
            |ctx: &DatasetContext, args: UserArgs| user_posts(ctx, &args.user_id),
        ),
        CapabilityDescriptor::typed(
            "get_user_comment_activity",
            "Get all comments by a specific user",
            |ctx: &DatasetContext, args: UserArgs| user_comments(ctx, &args.user_id),
        ),
        CapabilityDescriptor::typed(
            "get_user_total_activity_count",
            "Get total activity count (posts and comments) for a user",
            |ctx: &DatasetContext, args: UserArgs| activity_count(ctx, &args.user_id),
        ),
        CapabilityDescriptor::typed(
            "get_user_total_karma",
            "Get total karma for a user from posts and comments",
            |ctx: &DatasetContext, args: UserArgs| karma(ctx, &args.user_id),
        ),
        CapabilityDescriptor::typed(
            "get_user_top_posts",
            "Get top posts by a user based on karma score",
            |ctx: &DatasetContext, args: UserTopArgs| top_posts(ctx, &args.user_id, args.limit),
        ),
        CapabilityDescriptor::typed(
            "get_user_top_comments",
            "Get top comments by a user based on karma score",
            |ctx: &DatasetContext, args: UserTopArgs| top_comments(ctx, &args.user_id, args.limit),
        ),
        CapabilityDescriptor::typed(
            "get_user_activity_keywords",
            "Get top keywords from a user's posts and comments",
            |ctx: &DatasetContext, args: UserKeywordArgs| {
                user_keywords(ctx, &args.user_id, args.top_n)
            },
        ),
        CapabilityDescriptor::typed(
            "get_user_activity_sentiment",
            "Get sentiment analysis of a user's posts and comments",
            |ctx: &DatasetContext, args: UserArgs| user_sentiment(ctx, &args.user_id),
        ),
        CapabilityDescriptor::typed(
            "get_user_post_comment_ratio",
            "Get ratio of posts to comments for a user",
            |ctx: &DatasetContext, args: UserArgs| post_comment_ratio(ctx, &args.user_id),
        ),
        CapabilityDescriptor::typed(
            "get_community_overall_stats",
            "Get overall community activity statistics",
            |ctx: &DatasetContext, _args: CommunityArgs| community_stats(ctx),
        ),
        CapabilityDescriptor::typed(
            "get_community_top_authors",
            "Get top authors in community by activity count",
            |ctx: &DatasetContext, args: CommunityTopArgs| top_authors(ctx, args.limit),
        ),
        CapabilityDescriptor::typed(
            "get_community_post_frequency",
            "Get community post frequency statistics",
            |ctx: &DatasetContext, _args: CommunityArgs| post_frequency(ctx),
        ),
    ];

    for capability in capabilities {
        registry.register(capability)?;
    }
    Ok(())
}

/// All posts written by `user_id`.
pub fn user_posts(ctx: &DatasetContext, user_id: &str) -> Vec<PostView> {
    ctx.posts_by(user_id).map(PostView::from).collect()
}

/// All comments written by `user_id`.
pub fn user_comments(ctx: &DatasetContext, user_id: &str) -> Vec<CommentView> {
    ctx.comments_by(user_id).map(CommentView::from).collect()
}

/// Post and comment counts of `user_id`.
pub fn activity_count(ctx: &DatasetContext, user_id: &str) -> ActivityCount {
    let total_posts = ctx.posts_by(user_id).count();
    let total_comments = ctx.comments_by(user_id).count();
    ActivityCount {
        total_posts,
        total_comments,
        total_activity: total_posts + total_comments,
    }
}

/// Summed post and comment scores of `user_id`.
pub fn karma(ctx: &DatasetContext, user_id: &str) -> Karma {
    let post_karma = ctx.posts_by(user_id).map(|p| p.score).sum();
    let comment_karma = ctx.comments_by(user_id).map(|c| c.score).sum();
    Karma {
        post_karma,
        comment_karma,
        total_karma: post_karma + comment_karma,
    }
}

/// Highest-scored posts of `user_id`, at most `limit`.
pub fn top_posts(ctx: &DatasetContext, user_id: &str, limit: usize) -> Vec<PostView> {
    let mut posts: Vec<&Post> = ctx.posts_by(user_id).collect();
    // stable, so ties keep dataset order
    posts.sort_by(|a, b| b.score.cmp(&a.score));
    posts.into_iter().take(limit).map(PostView::from).collect()
}

/// Highest-scored comments of `user_id`, at most `limit`.
pub fn top_comments(ctx: &DatasetContext, user_id: &str, limit: usize) -> Vec<CommentView> {
    let mut comments: Vec<&Comment> = ctx.comments_by(user_id).collect();
    comments.sort_by(|a, b| b.score.cmp(&a.score));
    comments
        .into_iter()
        .take(limit)
        .map(CommentView::from)
        .collect()
}

/// Most frequent words longer than three characters, excluding stop words.
pub fn extract_keywords(text: &str, top_n: usize) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    let words = cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > 3 && !STOP_WORDS.contains(w));

    most_common(words, top_n)
        .into_iter()
        .map(|(word, _)| word)
        .collect()
}

/// Keywords across the titles, bodies and comments of `user_id`.
pub fn user_keywords(ctx: &DatasetContext, user_id: &str, top_n: usize) -> Vec<String> {
    let mut text = String::new();
    for post in ctx.posts_by(user_id) {
        text.push(' ');
        text.push_str(&post.title);
        text.push(' ');
        text.push_str(&post.selftext);
    }
    for comment in ctx.comments_by(user_id) {
        text.push(' ');
        text.push_str(&comment.body);
    }
    extract_keywords(&text, top_n)
}

/// Lexicon score in `[-1, 1]`; 0 when no lexicon word occurs.
pub fn text_sentiment(text: &str) -> f64 {
    let text = text.to_lowercase();
    let positive = POSITIVE_WORDS.iter().filter(|w| text.contains(*w)).count();
    let negative = NEGATIVE_WORDS.iter().filter(|w| text.contains(*w)).count();
    let total = positive + negative;
    if total == 0 {
        0.0
    } else {
        (positive as f64 - negative as f64) / total as f64
    }
}

/// Average sentiment of the posts and comments of `user_id`.
pub fn user_sentiment(ctx: &DatasetContext, user_id: &str) -> SentimentSummary {
    let post_scores: Vec<f64> = ctx
        .posts_by(user_id)
        .map(|p| text_sentiment(&format!("{} {}", p.title, p.selftext)))
        .collect();
    let comment_scores: Vec<f64> = ctx
        .comments_by(user_id)
        .map(|c| text_sentiment(&c.body))
        .collect();

    let post_sum: f64 = post_scores.iter().sum();
    let comment_sum: f64 = comment_scores.iter().sum();

    SentimentSummary {
        avg_post_sentiment: average(post_sum, post_scores.len()),
        avg_comment_sentiment: average(comment_sum, comment_scores.len()),
        overall_sentiment: average(post_sum + comment_sum, post_scores.len() + comment_scores.len()),
        post_sentiment_count: post_scores.len(),
        comment_sentiment_count: comment_scores.len(),
    }
}

/// Posts per comment; the raw post count when the user has no comments.
pub fn post_comment_ratio(ctx: &DatasetContext, user_id: &str) -> f64 {
    let posts = ctx.posts_by(user_id).count() as f64;
    let comments = ctx.comments_by(user_id).count();
    if comments == 0 {
        posts
    } else {
        posts / comments as f64
    }
}

/// Totals over the whole dataset.
pub fn community_stats(ctx: &DatasetContext) -> CommunityStats {
    let mut authors: Vec<&str> = ctx
        .posts()
        .iter()
        .map(|p| p.author.as_str())
        .chain(ctx.comments().iter().map(|c| c.author.as_str()))
        .filter(|a| !a.is_empty())
        .collect();
    authors.sort_unstable();
    authors.dedup();

    let total_posts = ctx.posts().len();
    let total_comments = ctx.comments().len();

    CommunityStats {
        total_posts,
        total_comments,
        total_authors: authors.len(),
        avg_comments_per_post: average(total_comments as f64, total_posts),
    }
}

/// Most active authors by posts plus comments, at most `limit`.
pub fn top_authors(ctx: &DatasetContext, limit: usize) -> Vec<AuthorActivity> {
    let authors = ctx
        .posts()
        .iter()
        .map(|p| p.author.as_str())
        .chain(ctx.comments().iter().map(|c| c.author.as_str()))
        .filter(|a| !a.is_empty());

    most_common(authors, limit)
        .into_iter()
        .map(|(author, activity_count)| AuthorActivity {
            author,
            activity_count,
        })
        .collect()
}

/// Post count and average posts per day.
pub fn post_frequency(ctx: &DatasetContext) -> PostFrequency {
    let total_posts = ctx.posts().len();
    PostFrequency {
        total_posts,
        avg_posts_per_day: total_posts as f64 / DATASET_DAYS,
    }
}

fn average(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Counts in descending order; ties keep first-seen order.
fn most_common<'a>(items: impl Iterator<Item = &'a str>, limit: usize) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();

    for item in items {
        match index.get(item) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(item, counts.len());
                counts.push((item.to_string(), 1));
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(limit);
    counts
}
