use crate::models::{Comment, Id};

/// Body shown in place of a secret comment the viewer may not read.
pub const SECRET_COMMENT_MARKER: &str = "This is a secret comment.";

/// A signed-in viewer: their account id and the blog they own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerIdentity {
    pub user_id: String,
    pub blog_id: Id,
}

/// Per-request viewer state, computed once and passed into every core call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerContext {
    pub identity: Option<ViewerIdentity>,
    pub is_blog_owner: bool,
}

impl ViewerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Builds the context for a listing under the blog `owner_blog_id`.
    pub fn for_blog(identity: Option<ViewerIdentity>, owner_blog_id: Id) -> Self {
        let is_blog_owner = identity.as_ref().is_some_and(|v| v.blog_id == owner_blog_id);
        Self { identity, is_blog_owner }
    }

    pub fn is_identified(&self) -> bool {
        self.identity.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|v| v.user_id.as_str())
    }

    /// Viewer wrote `comment` under their account.
    pub fn is_author_of(&self, comment: &Comment) -> bool {
        match (self.user_id(), comment.author.user_id.as_deref()) {
            (Some(viewer), Some(author)) => !comment.anonymous && viewer == author,
            _ => false,
        }
    }
}

/// Whether the viewer may read `comment`'s body and image in a listing.
///
/// Anonymous secret comments stay hidden from every listing viewer; their
/// authors read them back through the password unlock instead.
pub fn reveal(comment: &Comment, viewer: &ViewerContext) -> bool {
    if !comment.secret {
        return true;
    }
    if comment.anonymous {
        return false;
    }
    viewer.is_blog_owner || viewer.is_author_of(comment)
}
