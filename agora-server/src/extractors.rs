use std::sync::Arc;

use agora_api::{AuthToken, Db, UserId};
use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};

use crate::Error;

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: Arc<dyn Db>,
    pub limits: Limits,
}

#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_page_size: u32,
}

pub struct PreAuth(pub Option<AuthToken>);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Ok(PreAuth(None)),
            Some(auth) => {
                let auth = auth.to_str().map_err(|_| Error::permission_denied())?;
                let token = AuthToken::from_header(auth).ok_or_else(Error::permission_denied)?;
                Ok(PreAuth(Some(token)))
            }
        }
    }
}

/// Viewer of a public route: anonymous if no token was provided, but a
/// token that was provided must be valid
pub struct MaybeAuth(pub Option<UserId>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<MaybeAuth, Error> {
        let token = match PreAuth::from_request_parts(req, state).await?.0 {
            None => return Ok(MaybeAuth(None)),
            Some(token) => token,
        };
        match state
            .db
            .recover_session(token)
            .await
            .context("recovering session")?
        {
            Some(user) => Ok(MaybeAuth(Some(user))),
            None => Err(Error::permission_denied()),
        }
    }
}

pub struct Auth(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        match MaybeAuth::from_request_parts(req, state).await?.0 {
            Some(user) => Ok(Auth(user)),
            None => Err(Error::permission_denied()),
        }
    }
}
