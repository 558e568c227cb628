use std::collections::{HashMap, HashSet, VecDeque};

use agora_api::{
    Attachment, AuthToken, Comment, CommentId, CommentOrder, Db, DbError, Discussion,
    DiscussionId, Error, NewComment, PageRequest, Reaction, Time, User, UserId, Uuid,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

/// In-memory stand-in for the postgres-backed `Db`
pub struct MockServer(RwLock<MockDb>);

#[derive(Debug, Default)]
struct MockDb {
    users: HashMap<UserId, User>,
    sessions: HashMap<AuthToken, UserId>,
    discussions: HashMap<DiscussionId, DbDiscussion>,
    comments: HashMap<CommentId, DbComment>,
    reactions: HashMap<(UserId, CommentId), Reaction>,
}

#[derive(Debug)]
struct DbDiscussion {
    owner_id: UserId,
    title: String,
    created_at: Time,
}

#[derive(Debug)]
struct DbComment {
    id: CommentId,
    parent_id: Option<CommentId>,
    discussion_id: DiscussionId,
    author_id: UserId,
    content: String,
    attachment: Option<Attachment>,
    created_at: Time,
    deleted: bool,
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer(RwLock::new(MockDb::default()))
    }

    pub async fn create_user(&self, name: &str) -> UserId {
        let id = UserId(Uuid::new_v4());
        self.insert_user(User {
            id,
            name: String::from(name),
            image: None,
        })
        .await;
        id
    }

    pub async fn insert_user(&self, user: User) {
        self.0.write().await.users.insert(user.id, user);
    }

    pub async fn create_session(&self, user: UserId) -> AuthToken {
        let tok = AuthToken(Uuid::new_v4());
        self.0.write().await.sessions.insert(tok, user);
        tok
    }

    pub async fn create_discussion(&self, owner: UserId, title: &str) -> DiscussionId {
        let id = DiscussionId(Uuid::new_v4());
        self.insert_discussion(id, owner, title, Utc::now()).await;
        id
    }

    pub async fn insert_discussion(
        &self,
        id: DiscussionId,
        owner: UserId,
        title: &str,
        created_at: Time,
    ) {
        self.0.write().await.discussions.insert(
            id,
            DbDiscussion {
                owner_id: owner,
                title: String::from(title),
                created_at,
            },
        );
    }

    /// Same as `submit_comment`, with a caller-chosen creation date
    pub async fn submit_comment_at(
        &self,
        author: UserId,
        discussion: DiscussionId,
        comment: NewComment,
        created_at: Time,
    ) -> Result<Comment, DbError> {
        comment.validate()?;
        let mut db = self.0.write().await;
        if !db.discussions.contains_key(&discussion) {
            return Err(Error::DiscussionNotFound(discussion).into());
        }
        if let Some(parent) = comment.parent_id {
            match db.comments.get(&parent) {
                Some(p) if p.discussion_id != discussion => {
                    return Err(Error::ParentNotInDiscussion(parent).into())
                }
                Some(p) if !p.deleted => (),
                _ => return Err(Error::CommentNotFound(parent).into()),
            }
        }
        if db.comments.contains_key(&comment.id) {
            return Err(Error::UuidAlreadyUsed(comment.id.0).into());
        }
        let c = DbComment {
            id: comment.id,
            parent_id: comment.parent_id,
            discussion_id: discussion,
            author_id: author,
            content: comment.content,
            attachment: comment.attachment,
            created_at,
            deleted: false,
        };
        let res = db.view(&c, Some(author));
        db.comments.insert(c.id, c);
        Ok(res)
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

impl MockDb {
    fn visible_replies<'a>(&'a self, id: CommentId) -> impl 'a + Iterator<Item = &'a DbComment> {
        self.comments
            .values()
            .filter(move |c| c.parent_id == Some(id) && !c.deleted)
    }

    fn count_reactions(&self, comment: CommentId, reaction: Reaction) -> i64 {
        self.reactions
            .iter()
            .filter(|((_, c), r)| *c == comment && **r == reaction)
            .count() as i64
    }

    fn view(&self, c: &DbComment, viewer: Option<UserId>) -> Comment {
        let viewer_reaction = viewer.and_then(|v| self.reactions.get(&(v, c.id)).copied());
        Comment {
            id: c.id,
            parent_id: c.parent_id,
            discussion_id: c.discussion_id,
            author: match self.users.get(&c.author_id) {
                Some(u) => u.clone().into(),
                None => agora_api::Author {
                    id: c.author_id,
                    name: String::new(),
                    image: None,
                },
            },
            content: c.content.clone(),
            attachment: c.attachment.clone(),
            created_at: c.created_at,
            like_count: self.count_reactions(c.id, Reaction::Like),
            dislike_count: self.count_reactions(c.id, Reaction::Dislike),
            reply_count: self.visible_replies(c.id).count() as i64,
            liked_by_viewer: viewer_reaction == Some(Reaction::Like),
            disliked_by_viewer: viewer_reaction == Some(Reaction::Dislike),
        }
    }

    fn visible_comment(&self, id: CommentId) -> Result<&DbComment, Error> {
        self.comments
            .get(&id)
            .filter(|c| !c.deleted)
            .ok_or(Error::CommentNotFound(id))
    }
}

#[async_trait]
impl Db for MockServer {
    async fn recover_session(&self, token: AuthToken) -> anyhow::Result<Option<UserId>> {
        Ok(self.0.read().await.sessions.get(&token).copied())
    }

    async fn fetch_discussion(&self, id: DiscussionId) -> anyhow::Result<Option<Discussion>> {
        let db = self.0.read().await;
        Ok(db.discussions.get(&id).map(|d| Discussion {
            id,
            owner_id: d.owner_id,
            title: d.title.clone(),
            created_at: d.created_at,
            comment_count: db
                .comments
                .values()
                .filter(|c| c.discussion_id == id && !c.deleted)
                .count() as i64,
        }))
    }

    async fn fetch_comments(
        &self,
        discussion: DiscussionId,
        viewer: Option<UserId>,
        order: CommentOrder,
        page: PageRequest,
    ) -> anyhow::Result<(Vec<Comment>, u64)> {
        let db = self.0.read().await;

        // Hidden top-level comments keep their slot, so that their visible
        // replies show up on the same page as they would have
        let mut top_level = db
            .comments
            .values()
            .filter(|c| c.discussion_id == discussion && c.parent_id.is_none())
            .map(|c| db.view(c, viewer))
            .collect::<Vec<_>>();
        order.sort(&mut top_level);
        let total = top_level.len() as u64;
        let window = top_level
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .collect::<Vec<_>>();

        // Walk down through hidden comments too, so that their replies still show up
        let mut seen = window.iter().map(|c| c.id).collect::<HashSet<_>>();
        let mut to_visit = window.iter().map(|c| c.id).collect::<VecDeque<_>>();
        let mut res = window
            .into_iter()
            .filter(|c| db.visible_comment(c.id).is_ok())
            .collect::<Vec<_>>();
        while let Some(id) = to_visit.pop_front() {
            for c in db.comments.values().filter(|c| c.parent_id == Some(id)) {
                if seen.insert(c.id) {
                    to_visit.push_back(c.id);
                    if !c.deleted {
                        res.push(db.view(c, viewer));
                    }
                }
            }
        }

        order.sort(&mut res);
        Ok((res, total))
    }

    async fn submit_comment(
        &self,
        author: UserId,
        discussion: DiscussionId,
        comment: NewComment,
    ) -> Result<Comment, DbError> {
        self.submit_comment_at(author, discussion, comment, Utc::now())
            .await
    }

    async fn delete_comment(&self, user: UserId, comment: CommentId) -> Result<(), DbError> {
        let mut db = self.0.write().await;
        let c = db.visible_comment(comment)?;
        let is_discussion_owner = db
            .discussions
            .get(&c.discussion_id)
            .map(|d| d.owner_id == user)
            .unwrap_or(false);
        if c.author_id != user && !is_discussion_owner {
            return Err(Error::PermissionDenied.into());
        }
        if let Some(c) = db.comments.get_mut(&comment) {
            c.deleted = true;
        }
        Ok(())
    }

    async fn set_reaction(
        &self,
        user: UserId,
        comment: CommentId,
        reaction: Option<Reaction>,
    ) -> Result<(), DbError> {
        let mut db = self.0.write().await;
        db.visible_comment(comment)?;
        match reaction {
            Some(r) => db.reactions.insert((user, comment), r),
            None => db.reactions.remove(&(user, comment)),
        };
        Ok(())
    }
}
