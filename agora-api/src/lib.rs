use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
pub use auth::AuthToken;

mod comment;
pub use comment::{
    Attachment, Comment, CommentId, Discussion, DiscussionId, NewComment, Reaction,
    MAX_COMMENT_LEN,
};

mod db;
pub use db::{Db, DbError};

mod error;
pub use error::Error;

mod order;
pub use order::CommentOrder;

mod page;
pub use page::{PageMeta, PageRequest, Paginated};

pub mod tree;
pub use tree::{build_tree, CommentNode, OrphanPlacement, Threaded, TreeBuilder};

mod user;
pub use user::{Author, User, UserId};

/// One page of a discussion, threaded
pub type CommentPage = Paginated<Vec<CommentNode<Comment>>>;

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

#[cfg(test)]
mod test_util {
    use chrono::TimeZone;

    use crate::*;

    pub fn comment(parent_id: Option<CommentId>, likes: i64, replies: i64) -> Comment {
        Comment {
            id: CommentId(Uuid::new_v4()),
            parent_id,
            discussion_id: DiscussionId::stub(),
            author: Author {
                id: UserId::stub(),
                name: String::from("alice"),
                image: None,
            },
            content: String::from("lorem ipsum"),
            attachment: None,
            created_at: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            like_count: likes,
            dislike_count: 0,
            reply_count: replies,
            liked_by_viewer: false,
            disliked_by_viewer: false,
        }
    }
}
