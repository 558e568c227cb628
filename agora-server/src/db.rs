use agora_api::{
    Attachment, AuthToken, Author, Comment, CommentId, CommentOrder, Db, DbError, Discussion,
    DiscussionId, Error, NewComment, PageRequest, Reaction, Time, UserId, Uuid,
};
use anyhow::Context;
use axum::async_trait;

pub struct PostgresDb {
    pool: sqlx::PgPool,
}

impl PostgresDb {
    pub fn new(pool: sqlx::PgPool) -> PostgresDb {
        PostgresDb { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    parent_id: Option<Uuid>,
    discussion_id: Uuid,
    author_id: Uuid,
    author_name: String,
    author_image: Option<String>,
    content: String,
    attachment_url: Option<String>,
    attachment_kind: Option<String>,
    created_at: Time,
    like_count: i64,
    dislike_count: i64,
    reply_count: i64,
    liked_by_viewer: bool,
    disliked_by_viewer: bool,
}

impl From<CommentRow> for Comment {
    fn from(c: CommentRow) -> Comment {
        Comment {
            id: CommentId(c.id),
            parent_id: c.parent_id.map(CommentId),
            discussion_id: DiscussionId(c.discussion_id),
            author: Author {
                id: UserId(c.author_id),
                name: c.author_name,
                image: c.author_image,
            },
            content: c.content,
            attachment: match (c.attachment_url, c.attachment_kind) {
                (Some(url), Some(kind)) => Some(Attachment { url, kind }),
                _ => None,
            },
            created_at: c.created_at,
            like_count: c.like_count,
            dislike_count: c.dislike_count,
            reply_count: c.reply_count,
            liked_by_viewer: c.liked_by_viewer,
            disliked_by_viewer: c.disliked_by_viewer,
        }
    }
}

/// Columns of `CommentRow`, assuming `c` is v_comments, `u` is the author in
/// users and `vr` is the viewer's reaction
const COMMENT_COLUMNS: &str = "
    c.id, c.parent_id, c.discussion_id, c.author_id,
    u.name AS author_name, u.image AS author_image,
    c.content, c.attachment_url, c.attachment_kind, c.created_at,
    c.like_count, c.dislike_count, c.reply_count,
    COALESCE(vr.is_like, false) AS liked_by_viewer,
    COALESCE(NOT vr.is_like, false) AS disliked_by_viewer
";

async fn fetch_comment<'e, E>(
    conn: E,
    id: CommentId,
    viewer: Option<UserId>,
) -> anyhow::Result<Option<Comment>>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, CommentRow>(&format!(
        "
            SELECT {COMMENT_COLUMNS}
                FROM v_comments c
            INNER JOIN users u
                ON u.id = c.author_id
            LEFT JOIN reactions vr
                ON vr.comment_id = c.id AND vr.user_id = $2
            WHERE c.id = $1
        "
    ))
    .bind(id.0)
    .bind(viewer.map(|v| v.0))
    .fetch_optional(conn)
    .await
    .with_context(|| format!("fetching comment {id:?}"))?;
    Ok(row.map(Comment::from))
}

/// Returns the comment's author and the owner of its discussion, if the
/// comment exists and is visible
async fn fetch_comment_owners<'e, E>(
    conn: E,
    id: CommentId,
) -> anyhow::Result<Option<(UserId, UserId)>>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: Option<(Uuid, Uuid)> = sqlx::query_as(
        "
            SELECT c.author_id, d.owner_id
                FROM comments c
            INNER JOIN discussions d
                ON d.id = c.discussion_id
            WHERE c.id = $1
            AND NOT c.deleted
        ",
    )
    .bind(id.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("fetching owners of comment {id:?}"))?;
    Ok(row.map(|(author, owner)| (UserId(author), UserId(owner))))
}

#[async_trait]
impl Db for PostgresDb {
    async fn recover_session(&self, token: AuthToken) -> anyhow::Result<Option<UserId>> {
        let user: Option<(Uuid,)> = sqlx::query_as("SELECT user_id FROM sessions WHERE id = $1")
            .bind(token.0)
            .fetch_optional(&self.pool)
            .await
            .context("recovering session")?;
        Ok(user.map(|(u,)| UserId(u)))
    }

    async fn fetch_discussion(&self, id: DiscussionId) -> anyhow::Result<Option<Discussion>> {
        let row: Option<(Uuid, String, Time, i64)> = sqlx::query_as(
            "
                SELECT
                    d.owner_id,
                    d.title,
                    d.created_at,
                    (
                        SELECT COUNT(*)
                            FROM comments c
                        WHERE c.discussion_id = d.id
                        AND NOT c.deleted
                    ) AS comment_count
                FROM discussions d
                WHERE d.id = $1
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("fetching discussion {id:?}"))?;
        Ok(row.map(|(owner, title, created_at, comment_count)| Discussion {
            id,
            owner_id: UserId(owner),
            title,
            created_at,
            comment_count,
        }))
    }

    async fn fetch_comments(
        &self,
        discussion: DiscussionId,
        viewer: Option<UserId>,
        order: CommentOrder,
        page: PageRequest,
    ) -> anyhow::Result<(Vec<Comment>, u64)> {
        let (total,): (i64,) = sqlx::query_as(
            "
                SELECT COUNT(*)
                    FROM comments
                WHERE discussion_id = $1
                AND parent_id IS NULL
            ",
        )
        .bind(discussion.0)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("counting top-level comments of {discussion:?}"))?;

        // Hidden comments, top-level ones included, keep their place in the
        // window and in the recursion, so that their replies are still part
        // of the page; only the final select drops them
        let order_clause = order.to_postgres();
        let comments = sqlx::query_as::<_, CommentRow>(&format!(
            "
                WITH RECURSIVE
                top_level AS (
                    SELECT c.id
                        FROM v_comments c
                    WHERE c.discussion_id = $1
                    AND c.parent_id IS NULL
                    ORDER BY {order_clause}
                    LIMIT $2
                    OFFSET $3
                ),
                thread AS (
                    SELECT id FROM top_level
                    UNION ALL
                    SELECT child.id
                        FROM comments child
                    INNER JOIN thread
                        ON child.parent_id = thread.id
                )
                SELECT {COMMENT_COLUMNS}
                    FROM thread t
                INNER JOIN v_comments c
                    ON c.id = t.id
                INNER JOIN users u
                    ON u.id = c.author_id
                LEFT JOIN reactions vr
                    ON vr.comment_id = c.id AND vr.user_id = $4
                WHERE NOT c.deleted
                ORDER BY {order_clause}
            "
        ))
        .bind(discussion.0)
        .bind(i64::from(page.limit))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .bind(viewer.map(|v| v.0))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("fetching comments of {discussion:?}"))?;

        Ok((
            comments.into_iter().map(Comment::from).collect(),
            u64::try_from(total).context("negative comment count")?,
        ))
    }

    async fn submit_comment(
        &self,
        author: UserId,
        discussion: DiscussionId,
        comment: NewComment,
    ) -> Result<Comment, DbError> {
        comment.validate()?;
        let mut tx = self.pool.begin().await.context("starting transaction")?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM discussions WHERE id = $1")
            .bind(discussion.0)
            .fetch_optional(&mut tx)
            .await
            .with_context(|| format!("checking existence of {discussion:?}"))?;
        if exists.is_none() {
            return Err(Error::DiscussionNotFound(discussion).into());
        }

        if let Some(parent) = comment.parent_id {
            let row: Option<(Uuid, bool)> =
                sqlx::query_as("SELECT discussion_id, deleted FROM comments WHERE id = $1")
                    .bind(parent.0)
                    .fetch_optional(&mut tx)
                    .await
                    .with_context(|| format!("fetching parent comment {parent:?}"))?;
            match row {
                Some((d, _)) if d != discussion.0 => {
                    return Err(Error::ParentNotInDiscussion(parent).into())
                }
                Some((_, false)) => (),
                _ => return Err(Error::CommentNotFound(parent).into()),
            }
        }

        let (url, kind) = match comment.attachment {
            Some(a) => (Some(a.url), Some(a.kind)),
            None => (None, None),
        };
        let res = sqlx::query(
            "
                INSERT INTO comments
                    (id, discussion_id, parent_id, author_id, content,
                     attachment_url, attachment_kind, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                ON CONFLICT DO NOTHING
            ",
        )
        .bind(comment.id.0)
        .bind(discussion.0)
        .bind(comment.parent_id.map(|p| p.0))
        .bind(author.0)
        .bind(comment.content)
        .bind(url)
        .bind(kind)
        .execute(&mut tx)
        .await
        .with_context(|| format!("inserting comment {:?}", comment.id))?;
        if res.rows_affected() != 1 {
            return Err(Error::UuidAlreadyUsed(comment.id.0).into());
        }

        let res = fetch_comment(&mut tx, comment.id, Some(author))
            .await?
            .ok_or_else(|| anyhow::anyhow!("comment {:?} vanished after insertion", comment.id))?;
        tx.commit().await.context("committing transaction")?;
        Ok(res)
    }

    async fn delete_comment(&self, user: UserId, comment: CommentId) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.context("starting transaction")?;
        let (author, owner) = fetch_comment_owners(&mut tx, comment)
            .await?
            .ok_or(Error::CommentNotFound(comment))?;
        if user != author && user != owner {
            return Err(Error::PermissionDenied.into());
        }
        sqlx::query("UPDATE comments SET deleted = true WHERE id = $1")
            .bind(comment.0)
            .execute(&mut tx)
            .await
            .with_context(|| format!("hiding comment {comment:?}"))?;
        tx.commit().await.context("committing transaction")?;
        Ok(())
    }

    async fn set_reaction(
        &self,
        user: UserId,
        comment: CommentId,
        reaction: Option<Reaction>,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.context("starting transaction")?;
        fetch_comment_owners(&mut tx, comment)
            .await?
            .ok_or(Error::CommentNotFound(comment))?;
        match reaction {
            None => sqlx::query("DELETE FROM reactions WHERE user_id = $1 AND comment_id = $2")
                .bind(user.0)
                .bind(comment.0),
            Some(r) => sqlx::query(
                "
                    INSERT INTO reactions (user_id, comment_id, is_like)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (user_id, comment_id)
                    DO UPDATE SET is_like = EXCLUDED.is_like
                ",
            )
            .bind(user.0)
            .bind(comment.0)
            .bind(r == Reaction::Like),
        }
        .execute(&mut tx)
        .await
        .with_context(|| format!("setting reaction of {user:?} on {comment:?}"))?;
        tx.commit().await.context("committing transaction")?;
        Ok(())
    }
}
