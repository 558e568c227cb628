use std::{cmp::Reverse, fmt, str::FromStr};

use anyhow::anyhow;

use crate::Comment;

/// Display order of a discussion's comments, applied before threading
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CommentOrder {
    /// Most liked first, then most replied to, then newest
    #[default]
    Top,
    Newest,
    Oldest,
}

impl CommentOrder {
    pub fn sort(&self, comments: &mut [Comment]) {
        // ids break the remaining ties, so that every order is total
        match self {
            CommentOrder::Top => comments.sort_unstable_by_key(|c| {
                (
                    Reverse(c.like_count),
                    Reverse(c.reply_count),
                    Reverse(c.created_at),
                    c.id,
                )
            }),
            CommentOrder::Newest => {
                comments.sort_unstable_by_key(|c| (Reverse(c.created_at), c.id))
            }
            CommentOrder::Oldest => comments.sort_unstable_by_key(|c| (c.created_at, c.id)),
        }
    }

    /// Assumes the comments table is aliased `c` and the like, dislike and
    /// reply counts are available as columns of the same name
    pub fn to_postgres(&self) -> &'static str {
        match self {
            CommentOrder::Top => {
                "like_count DESC, reply_count DESC, c.created_at DESC, c.id ASC"
            }
            CommentOrder::Newest => "c.created_at DESC, c.id ASC",
            CommentOrder::Oldest => "c.created_at ASC, c.id ASC",
        }
    }
}

impl fmt::Display for CommentOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommentOrder::Top => "top",
            CommentOrder::Newest => "newest",
            CommentOrder::Oldest => "oldest",
        })
    }
}

impl FromStr for CommentOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<CommentOrder> {
        match s {
            "top" => Ok(CommentOrder::Top),
            "newest" => Ok(CommentOrder::Newest),
            "oldest" => Ok(CommentOrder::Oldest),
            _ => Err(anyhow!("unknown comment order {s:?}, expected top, newest or oldest")),
        }
    }
}
