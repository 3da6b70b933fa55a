//! Turns a flat comment fetch into the two-level, viewer-filtered listing.
//!
//! Pagination counts top-level comments only. Replies ride along with their
//! parent and never shift page boundaries.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{Comment, CommentView, Id};
use crate::pagination::PaginationWindow;
use crate::visibility::{reveal, ViewerContext, SECRET_COMMENT_MARKER};

/// A fetched comment tagged with its place in the tree.
#[derive(Debug, Clone)]
pub enum CommentRecord {
    TopLevel { comment: Comment, replies: Vec<CommentRecord> },
    Reply { comment: Comment, parent_id: Id },
}

impl From<Comment> for CommentRecord {
    fn from(comment: Comment) -> Self {
        match comment.parent_id {
            Some(parent_id) => CommentRecord::Reply { comment, parent_id },
            None => CommentRecord::TopLevel { comment, replies: Vec::new() },
        }
    }
}

impl CommentRecord {
    pub fn comment(&self) -> &Comment {
        match self {
            CommentRecord::TopLevel { comment, .. } | CommentRecord::Reply { comment, .. } => comment,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentPage {
    pub comments: Vec<CommentView>,
    pub pagination: PaginationWindow,
}

/// Rebuilds the reply tree from `raw`.
///
/// Top-level order is taken from `raw` as is (newest first); replies are
/// sorted oldest first under their parent. Replies whose parent is not in
/// `raw` are dropped.
pub fn build_tree(raw: Vec<Comment>) -> Vec<CommentRecord> {
    let mut roots: Vec<CommentRecord> = Vec::new();
    let mut index: HashMap<Id, usize> = HashMap::new();
    let mut pending: Vec<(Id, Comment)> = Vec::new();

    for comment in raw {
        match CommentRecord::from(comment) {
            root @ CommentRecord::TopLevel { .. } => {
                index.insert(root.comment().id, roots.len());
                roots.push(root);
            }
            CommentRecord::Reply { comment, parent_id } => pending.push((parent_id, comment)),
        }
    }

    for (parent_id, comment) in pending {
        match index.get(&parent_id).and_then(|&i| roots.get_mut(i)) {
            Some(CommentRecord::TopLevel { replies, .. }) => {
                replies.push(CommentRecord::Reply { comment, parent_id })
            }
            _ => tracing::debug!(comment_id = comment.id, parent_id, "reply without a fetched parent"),
        }
    }

    for root in roots.iter_mut() {
        if let CommentRecord::TopLevel { replies, .. } = root {
            replies.sort_by(|a, b| {
                let (a, b) = (a.comment(), b.comment());
                a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
            });
        }
    }
    roots
}

/// Renders one comment for `viewer`, redacting it when hidden.
pub fn render(comment: &Comment, viewer: &ViewerContext) -> CommentView {
    let (body, image) = if reveal(comment, viewer) {
        (comment.body.clone(), comment.image.clone())
    } else {
        (SECRET_COMMENT_MARKER.to_string(), None)
    };
    CommentView {
        id: comment.id,
        body,
        image,
        author_id: comment.author.user_id.clone(),
        author_nickname: comment.author.nickname.clone(),
        author_avatar: comment.author.profile_image.clone(),
        author_is_blog_owner: comment.author.blog_owner,
        is_owner: viewer.is_author_of(comment),
        secret: comment.secret,
        anonymous: comment.anonymous,
        target_user_id: comment.target_user_id.clone(),
        target_nickname: comment.target_nickname.clone(),
        created_at: comment.created_at,
        replies: None,
    }
}

fn render_record(record: CommentRecord, viewer: &ViewerContext) -> CommentView {
    match record {
        CommentRecord::TopLevel { comment, replies } => {
            let mut view = render(&comment, viewer);
            view.replies = Some(replies.into_iter().map(|r| render_record(r, viewer)).collect());
            view
        }
        CommentRecord::Reply { comment, .. } => render(&comment, viewer),
    }
}

/// Assembles the listing for one page.
///
/// `raw` is the store's fetch for `window`: its top-level comments newest
/// first, plus their replies in any position. At most `window.limit`
/// top-level comments are emitted.
pub fn assemble(raw: Vec<Comment>, viewer: &ViewerContext, window: PaginationWindow) -> CommentPage {
    let comments = build_tree(raw)
        .into_iter()
        .take(window.limit as usize)
        .map(|record| render_record(record, viewer))
        .collect();
    CommentPage { comments, pagination: window }
}
