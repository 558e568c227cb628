use uuid::Uuid;

use crate::{Error, Threaded, Time, STUB_UUID};

pub const MAX_COMMENT_LEN: usize = 10_000;

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct CommentId(#[generator(bolero::generator::gen_arbitrary())] pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct DiscussionId(pub Uuid);

impl DiscussionId {
    pub fn stub() -> DiscussionId {
        DiscussionId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    /// Mime type, as reported by the upload service
    pub kind: String,
}

/// A single comment, as stored, before threading
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub discussion_id: DiscussionId,
    pub author: crate::Author,
    pub content: String,
    pub attachment: Option<Attachment>,
    pub created_at: Time,

    pub like_count: i64,
    pub dislike_count: i64,
    pub reply_count: i64,

    // these depend on who is looking
    pub liked_by_viewer: bool,
    pub disliked_by_viewer: bool,
}

impl Threaded for Comment {
    type Id = CommentId;

    fn id(&self) -> &CommentId {
        &self.id
    }

    fn parent_id(&self) -> Option<&CommentId> {
        self.parent_id.as_ref()
    }
}

impl Comment {
    pub fn viewer_reaction(&self) -> Option<Reaction> {
        match (self.liked_by_viewer, self.disliked_by_viewer) {
            (true, _) => Some(Reaction::Like),
            (false, true) => Some(Reaction::Dislike),
            (false, false) => None,
        }
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Reaction {
    Like,
    Dislike,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Discussion {
    pub id: DiscussionId,
    pub owner_id: crate::UserId,
    pub title: String,
    pub created_at: Time,

    /// Number of visible comments, at any depth
    pub comment_count: i64,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub attachment: Option<Attachment>,
}

impl NewComment {
    pub fn new(parent_id: Option<CommentId>, content: String) -> NewComment {
        NewComment {
            id: CommentId(Uuid::new_v4()),
            parent_id,
            content,
            attachment: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.content)?;
        if self.content.trim().is_empty() {
            return Err(Error::EmptyComment);
        }
        let len = self.content.chars().count();
        if len > MAX_COMMENT_LEN {
            return Err(Error::CommentTooLong(len));
        }
        if let Some(a) = &self.attachment {
            crate::validate_string(&a.url)?;
            crate::validate_string(&a.kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_new_comment() {
        let ok = NewComment::new(None, String::from("hello"));
        assert_eq!(ok.validate(), Ok(()));

        let blank = NewComment::new(None, String::from(" \n\t"));
        assert_eq!(blank.validate(), Err(Error::EmptyComment));

        let nul = NewComment::new(None, String::from("a\0b"));
        assert_eq!(
            nul.validate(),
            Err(Error::NullByteInString(String::from("a\0b")))
        );

        let long = NewComment::new(None, "é".repeat(MAX_COMMENT_LEN + 1));
        assert_eq!(long.validate(), Err(Error::CommentTooLong(MAX_COMMENT_LEN + 1)));

        let at_limit = NewComment::new(None, "é".repeat(MAX_COMMENT_LEN));
        assert_eq!(at_limit.validate(), Ok(()));
    }

    #[test]
    fn serializes_as_camel_case() {
        let c = crate::test_util::comment(None, 3, 1);
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("parentId").is_some());
        assert_eq!(json.get("likeCount"), Some(&serde_json::json!(3)));
        assert_eq!(json.get("replyCount"), Some(&serde_json::json!(1)));
        assert_eq!(json.get("likedByViewer"), Some(&serde_json::json!(false)));
    }

    #[test]
    fn viewer_reaction() {
        let mut c = crate::test_util::comment(None, 0, 0);
        assert_eq!(c.viewer_reaction(), None);
        c.disliked_by_viewer = true;
        assert_eq!(c.viewer_reaction(), Some(Reaction::Dislike));
        c.liked_by_viewer = true;
        assert_eq!(c.viewer_reaction(), Some(Reaction::Like));
    }
}
