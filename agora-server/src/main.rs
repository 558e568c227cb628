use std::{net::SocketAddr, sync::Arc};

use agora_api::Db;
use anyhow::Context;
use axum::{
    routing::{get, put},
    Router,
};
use structopt::StructOpt;

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

pub use db::PostgresDb;
pub use error::Error;
use extractors::*;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
struct Opt {
    /// Address to listen on
    #[structopt(long, env = "LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "MAX_CONNECTIONS", default_value = "8")]
    max_connections: u32,

    /// Maximum number of top-level comments per page
    #[structopt(long, env = "MAX_PAGE_SIZE", default_value = "50")]
    max_page_size: u32,
}

pub async fn create_sqlx_pool(db_url: &str, max_connections: u32) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .with_context(|| format!("opening database {:?}", db_url))
}

pub fn app(db: Arc<dyn Db>, limits: Limits) -> Router {
    Router::new()
        .route("/api/discussions/:id", get(handlers::fetch_discussion))
        .route(
            "/api/discussions/:id/comments",
            get(handlers::fetch_comments).post(handlers::submit_comment),
        )
        .route(
            "/api/comments/:id",
            axum::routing::delete(handlers::delete_comment),
        )
        .route("/api/comments/:id/reaction", put(handlers::set_reaction))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(AppState { db, limits })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();

    let pool = create_sqlx_pool(&opt.database_url, opt.max_connections).await?;
    MIGRATOR
        .run(&pool)
        .await
        .context("running pending migrations")?;

    let app = app(
        Arc::new(PostgresDb::new(pool)),
        Limits {
            max_page_size: opt.max_page_size,
        },
    );

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
