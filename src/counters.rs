//! Like and view counters kept outside the relational store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikedPost {
    pub post_id: Id,
    pub blog_id: Id,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogVisits {
    pub today: u64,
    pub total: u64,
}

#[async_trait]
pub trait LikeStore: Send + Sync {
    /// Idempotent; returns the post's like count afterwards.
    async fn like(&self, post: LikedPost, user_id: &str) -> u64;
    /// Idempotent; returns the post's like count afterwards.
    async fn unlike(&self, post_id: Id, user_id: &str) -> u64;
    async fn like_count(&self, post_id: Id) -> u64;
    async fn has_liked(&self, post_id: Id, user_id: &str) -> bool;
    async fn liked_posts(&self, user_id: &str) -> Vec<LikedPost>;
    /// Drops everything `user_id` liked and every like on posts of `blog_id`.
    async fn purge_user(&self, user_id: &str, blog_id: Id);
}

#[async_trait]
pub trait ViewStore: Send + Sync {
    async fn record_post_view(&self, blog_id: Id, post_id: Id) -> u64;
    async fn post_views(&self, post_id: Id) -> u64;
    /// Counts a visit at most once per visitor per day.
    async fn record_blog_visit(&self, blog_id: Id, visitor: &str, today: NaiveDate) -> BlogVisits;
    async fn blog_visits(&self, blog_id: Id, today: NaiveDate) -> BlogVisits;
    async fn purge_blog(&self, blog_id: Id);
}

/// Stable, non-reversible key for a visitor of `blog_id`.
pub fn visitor_key(blog_id: Id, who: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{blog_id}:{who}").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct VisitState {
    day: Option<NaiveDate>,
    today: u64,
    total: u64,
    seen_today: HashSet<String>,
}

/// DashMap-backed counters shared by every worker in the process.
#[derive(Clone, Default)]
pub struct InMemCounters {
    likers: Arc<DashMap<Id, (Id, HashSet<String>)>>,
    liked: Arc<DashMap<String, Vec<LikedPost>>>,
    post_views: Arc<DashMap<Id, (Id, u64)>>,
    visits: Arc<DashMap<Id, VisitState>>,
}

impl InMemCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LikeStore for InMemCounters {
    async fn like(&self, post: LikedPost, user_id: &str) -> u64 {
        let count = {
            let mut entry = self.likers.entry(post.post_id).or_insert_with(|| (post.blog_id, HashSet::new()));
            entry.1.insert(user_id.to_string());
            entry.1.len() as u64
        };
        let mut liked = self.liked.entry(user_id.to_string()).or_default();
        if !liked.iter().any(|p| p.post_id == post.post_id) {
            liked.push(post);
        }
        count
    }

    async fn unlike(&self, post_id: Id, user_id: &str) -> u64 {
        let count = match self.likers.get_mut(&post_id) {
            Some(mut entry) => {
                entry.1.remove(user_id);
                entry.1.len() as u64
            }
            None => 0,
        };
        if let Some(mut liked) = self.liked.get_mut(user_id) {
            liked.retain(|p| p.post_id != post_id);
        }
        count
    }

    async fn like_count(&self, post_id: Id) -> u64 {
        self.likers.get(&post_id).map(|e| e.1.len() as u64).unwrap_or(0)
    }

    async fn has_liked(&self, post_id: Id, user_id: &str) -> bool {
        self.likers.get(&post_id).is_some_and(|e| e.1.contains(user_id))
    }

    async fn liked_posts(&self, user_id: &str) -> Vec<LikedPost> {
        self.liked.get(user_id).map(|v| v.clone()).unwrap_or_default()
    }

    async fn purge_user(&self, user_id: &str, blog_id: Id) {
        if let Some((_, posts)) = self.liked.remove(user_id) {
            for p in posts {
                if let Some(mut entry) = self.likers.get_mut(&p.post_id) {
                    entry.1.remove(user_id);
                }
            }
        }
        let doomed: Vec<(Id, HashSet<String>)> = self
            .likers
            .iter()
            .filter(|e| e.value().0 == blog_id)
            .map(|e| (*e.key(), e.value().1.clone()))
            .collect();
        for (post_id, users) in doomed {
            self.likers.remove(&post_id);
            for u in users {
                if let Some(mut liked) = self.liked.get_mut(&u) {
                    liked.retain(|p| p.post_id != post_id);
                }
            }
        }
    }
}

#[async_trait]
impl ViewStore for InMemCounters {
    async fn record_post_view(&self, blog_id: Id, post_id: Id) -> u64 {
        let mut entry = self.post_views.entry(post_id).or_insert((blog_id, 0));
        entry.1 += 1;
        entry.1
    }

    async fn post_views(&self, post_id: Id) -> u64 {
        self.post_views.get(&post_id).map(|e| e.1).unwrap_or(0)
    }

    async fn record_blog_visit(&self, blog_id: Id, visitor: &str, today: NaiveDate) -> BlogVisits {
        let mut state = self.visits.entry(blog_id).or_default();
        if state.day != Some(today) {
            state.day = Some(today);
            state.today = 0;
            state.seen_today.clear();
        }
        if state.seen_today.insert(visitor.to_string()) {
            state.today += 1;
            state.total += 1;
        }
        BlogVisits { today: state.today, total: state.total }
    }

    async fn blog_visits(&self, blog_id: Id, today: NaiveDate) -> BlogVisits {
        match self.visits.get(&blog_id) {
            Some(s) => BlogVisits { today: if s.day == Some(today) { s.today } else { 0 }, total: s.total },
            None => BlogVisits::default(),
        }
    }

    async fn purge_blog(&self, blog_id: Id) {
        self.post_views.retain(|_, v| v.0 != blog_id);
        self.visits.remove(&blog_id);
    }
}
