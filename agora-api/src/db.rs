use async_trait::async_trait;

use crate::{
    AuthToken, Comment, CommentId, CommentOrder, Discussion, DiscussionId, Error, NewComment,
    PageRequest, Reaction, UserId,
};

/// Storage and identity collaborator behind the comment routes.
///
/// `anyhow::Error`s are internal failures; `Error`s are returned to the
/// client as-is.
#[async_trait]
pub trait Db: Send + Sync {
    async fn recover_session(&self, token: AuthToken) -> anyhow::Result<Option<UserId>>;

    async fn fetch_discussion(&self, id: DiscussionId) -> anyhow::Result<Option<Discussion>>;

    /// Returns one page of the discussion's visible comments, sorted by
    /// `order`, along with the total number of top-level comments.
    ///
    /// The page window is taken over all top-level comments, hidden ones
    /// included, and `total` counts them too. The page then holds the visible
    /// ones among them and all of their visible descendants. Replies to hidden
    /// comments, at any depth, are still returned.
    async fn fetch_comments(
        &self,
        discussion: DiscussionId,
        viewer: Option<UserId>,
        order: CommentOrder,
        page: PageRequest,
    ) -> anyhow::Result<(Vec<Comment>, u64)>;

    async fn submit_comment(
        &self,
        author: UserId,
        discussion: DiscussionId,
        comment: NewComment,
    ) -> Result<Comment, DbError>;

    /// Hides the comment; allowed for its author and the discussion owner
    async fn delete_comment(&self, user: UserId, comment: CommentId) -> Result<(), DbError>;

    async fn set_reaction(
        &self,
        user: UserId,
        comment: CommentId,
        reaction: Option<Reaction>,
    ) -> Result<(), DbError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] Error),
}
