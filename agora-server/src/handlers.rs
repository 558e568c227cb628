use std::sync::Arc;

use agora_api::{
    build_tree, Comment, CommentId, CommentOrder, CommentPage, Db, Discussion, DiscussionId,
    Error as ApiError, NewComment, PageMeta, PageRequest, Paginated, Reaction, Uuid,
};
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{extractors::*, Error};

#[derive(Debug, Default, serde::Deserialize)]
pub struct CommentsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Option<CommentOrder>,
}

pub async fn fetch_discussion(
    State(db): State<Arc<dyn Db>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Discussion>, Error> {
    let id = DiscussionId(id);
    Ok(Json(
        db.fetch_discussion(id)
            .await
            .with_context(|| format!("fetching discussion {id:?}"))?
            .ok_or(ApiError::DiscussionNotFound(id))?,
    ))
}

pub async fn fetch_comments(
    MaybeAuth(viewer): MaybeAuth,
    State(db): State<Arc<dyn Db>>,
    State(limits): State<Limits>,
    Path(id): Path<Uuid>,
    Query(q): Query<CommentsQuery>,
) -> Result<Json<CommentPage>, Error> {
    let id = DiscussionId(id);
    if db
        .fetch_discussion(id)
        .await
        .with_context(|| format!("fetching discussion {id:?}"))?
        .is_none()
    {
        return Err(ApiError::DiscussionNotFound(id).into());
    }

    let order = q.sort.unwrap_or_default();
    let page = PageRequest::new(
        q.page.unwrap_or(1),
        q.limit.unwrap_or(PageRequest::DEFAULT_LIMIT),
    )
    .clamped(limits.max_page_size);
    let (comments, total) = db
        .fetch_comments(id, viewer, order, page)
        .await
        .with_context(|| format!("fetching comments of {id:?} for {viewer:?}"))?;
    tracing::debug!(
        discussion = ?id,
        %order,
        page = page.page,
        num_comments = comments.len(),
        total,
        "threading comment page"
    );

    Ok(Json(Paginated {
        data: build_tree(comments),
        meta: PageMeta::new(page, total),
    }))
}

pub async fn submit_comment(
    Auth(user): Auth,
    State(db): State<Arc<dyn Db>>,
    Path(id): Path<Uuid>,
    Json(c): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    c.validate()?;
    let comment = db.submit_comment(user, DiscussionId(id), c).await?;
    tracing::info!(comment = ?comment.id, ?user, "new comment");
    Ok(Json(comment))
}

pub async fn delete_comment(
    Auth(user): Auth,
    State(db): State<Arc<dyn Db>>,
    Path(id): Path<Uuid>,
) -> Result<(), Error> {
    let id = CommentId(id);
    db.delete_comment(user, id).await?;
    tracing::info!(comment = ?id, ?user, "comment hidden");
    Ok(())
}

pub async fn set_reaction(
    Auth(user): Auth,
    State(db): State<Arc<dyn Db>>,
    Path(id): Path<Uuid>,
    Json(r): Json<Option<Reaction>>,
) -> Result<(), Error> {
    db.set_reaction(user, CommentId(id), r).await?;
    Ok(())
}
