#![cfg(test)]

use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};

use agora_api::{
    build_tree, Comment, CommentId, CommentNode, CommentOrder, Db, DbError, Discussion,
    DiscussionId, Error as ApiError, NewComment, PageRequest, Reaction, Time, User, UserId, Uuid,
};
use agora_mock_server::MockServer;
use chrono::{TimeZone, Utc};

use crate::*;

fn build_pg_cluster(data: &Path) -> postgresfixture::cluster::Cluster {
    let mut best = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match &best {
                Some((_, best_version)) if *best_version >= v => (),
                _ => best = Some((r, v)),
            }
        }
    }
    let (runtime, _) = best.expect("postgresql seems to not be installed in path");
    postgresfixture::cluster::Cluster::new(data, runtime)
}

/// Spins up a throwaway postgres cluster with the migrations applied, and
/// hands a pool to it to `test`
fn with_test_pool(test: impl FnOnce(&tokio::runtime::Runtime, sqlx::PgPool)) {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt::try_init();
    }
    let lockfile = tempfile::tempfile().expect("creating tempfile");
    let datadir = tempfile::tempdir().expect("creating tempdir");
    let datadir_path: &Path = datadir.as_ref();
    let cluster = build_pg_cluster(datadir_path);
    let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
    postgresfixture::coordinate::run_and_destroy(
        &cluster,
        lockfile.into(),
        AssertUnwindSafe(|| {
            cluster
                .createdb("test_db")
                .expect("creating test_db database");
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed initializing tokio runtime");
            let pool = runtime.block_on(async move {
                let pool = create_sqlx_pool(
                    &format!("postgresql://?host={}&dbname=test_db", datadir_path),
                    4,
                )
                .await
                .expect("creating sqlx pool");
                MIGRATOR
                    .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                    .await
                    .expect("failed applying migrations");
                pool
            });
            test(&runtime, pool)
        }),
    )
    .expect("coordinating spinup and shutdown of the pg cluster");
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            with_test_pool(|runtime, pool| {
                let runtime = AssertUnwindSafe(runtime);
                let pool = AssertUnwindSafe(pool);
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(reset_db(&pool));
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
        }
    };
}

async fn reset_db(pool: &sqlx::PgPool) {
    let mut conn = pool.acquire().await.expect("getting db cleanup connection");
    sqlx::query(include_str!("../reset-test-db.sql"))
        .execute(&mut *conn)
        .await
        .expect("failed cleaning up database");
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end);
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1))
}

fn compare<T>(name: &str, app_res: T, mock_res: T) -> T
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "postgres and mock did not return the same result for {name}"
    );
    app_res
}

fn api<T>(name: &str, res: Result<T, DbError>) -> Result<T, ApiError> {
    res.map_err(|e| match e {
        DbError::Api(e) => e,
        DbError::Internal(e) => panic!("internal error while running {name}: {e:?}"),
    })
}

/// Creation dates come from each store's own clock
fn normalize(c: Comment) -> Comment {
    Comment {
        created_at: Time::MIN_UTC,
        ..c
    }
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    Submit {
        author: usize,
        discussion: usize,
        parent: Option<usize>,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        content: String,
    },
    Resubmit {
        author: usize,
        comment: usize,
    },
    Delete {
        user: usize,
        comment: usize,
    },
    React {
        user: usize,
        comment: usize,
        like: Option<bool>,
    },
    Fetch {
        discussion: usize,
        viewer: Option<usize>,
        order: u8,
        page: u8,
        limit: u8,
    },
    FetchDiscussion {
        discussion: usize,
    },
}

/// Runs every operation against both `PostgresDb` and `MockServer`, and
/// checks that they agree
struct ComparativeFuzzer {
    pg: PostgresDb,
    mock: MockServer,
    users: Vec<UserId>,
    discussions: Vec<DiscussionId>,
    comments: Vec<CommentId>,
}

impl ComparativeFuzzer {
    async fn new(pool: sqlx::PgPool) -> ComparativeFuzzer {
        let mock = MockServer::new();

        let mut users = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let user = User {
                id: UserId(Uuid::new_v4()),
                name: String::from(name),
                image: None,
            };
            sqlx::query("INSERT INTO users (id, name, image) VALUES ($1, $2, $3)")
                .bind(user.id.0)
                .bind(&user.name)
                .bind(&user.image)
                .execute(&pool)
                .await
                .expect("inserting user");
            users.push(user.id);
            mock.insert_user(user).await;
        }

        let created_at = Utc
            .with_ymd_and_hms(2022, 11, 20, 0, 0, 0)
            .single()
            .expect("valid date");
        let mut discussions = Vec::new();
        for (owner, title) in [(users[0], "Ownership"), (users[1], "Borrowing")] {
            let id = DiscussionId(Uuid::new_v4());
            sqlx::query(
                "INSERT INTO discussions (id, owner_id, title, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(id.0)
            .bind(owner.0)
            .bind(title)
            .bind(created_at)
            .execute(&pool)
            .await
            .expect("inserting discussion");
            discussions.push(id);
            mock.insert_discussion(id, owner, title, created_at).await;
        }

        ComparativeFuzzer {
            pg: PostgresDb::new(pool),
            mock,
            users,
            discussions,
            comments: Vec::new(),
        }
    }

    /// Out-of-range indices map to an id that does not exist
    fn comment(&self, idx: usize) -> CommentId {
        self.comments
            .get(idx)
            .copied()
            .unwrap_or_else(CommentId::stub)
    }

    async fn submit_new(
        &mut self,
        author: usize,
        discussion: usize,
        comment: NewComment,
    ) -> Result<Comment, ApiError> {
        let (author, discussion) = (self.users[author], self.discussions[discussion]);
        let pg = api(
            "submit_comment",
            self.pg.submit_comment(author, discussion, comment.clone()).await,
        );
        let mock = api(
            "submit_comment",
            self.mock.submit_comment(author, discussion, comment).await,
        );
        let res = compare("submit_comment", pg.map(normalize), mock.map(normalize));
        if let Ok(c) = &res {
            self.comments.push(c.id);
        }
        res
    }

    async fn submit(
        &mut self,
        author: usize,
        discussion: usize,
        parent: Option<usize>,
        content: &str,
    ) -> Result<Comment, ApiError> {
        let parent = parent.map(|p| self.comment(p));
        let comment = NewComment::new(parent, String::from(content));
        self.submit_new(author, discussion, comment).await
    }

    async fn resubmit(&mut self, author: usize, comment: usize) -> Result<Comment, ApiError> {
        let mut new = NewComment::new(None, String::from("again"));
        new.id = self.comment(comment);
        self.submit_new(author, 0, new).await
    }

    async fn delete(&mut self, user: usize, comment: usize) -> Result<(), ApiError> {
        let (user, comment) = (self.users[user], self.comment(comment));
        compare(
            "delete_comment",
            api("delete_comment", self.pg.delete_comment(user, comment).await),
            api("delete_comment", self.mock.delete_comment(user, comment).await),
        )
    }

    async fn react(
        &mut self,
        user: usize,
        comment: usize,
        reaction: Option<Reaction>,
    ) -> Result<(), ApiError> {
        let (user, comment) = (self.users[user], self.comment(comment));
        compare(
            "set_reaction",
            api(
                "set_reaction",
                self.pg.set_reaction(user, comment, reaction).await,
            ),
            api(
                "set_reaction",
                self.mock.set_reaction(user, comment, reaction).await,
            ),
        )
    }

    async fn fetch(
        &mut self,
        discussion: usize,
        viewer: Option<usize>,
        order: CommentOrder,
        page: PageRequest,
    ) -> (Vec<Comment>, u64) {
        let discussion = self.discussions[discussion];
        let viewer = viewer.map(|v| self.users[v]);
        let normalized = |(comments, total): (Vec<Comment>, u64)| {
            (comments.into_iter().map(normalize).collect::<Vec<_>>(), total)
        };
        compare(
            "fetch_comments",
            normalized(
                self.pg
                    .fetch_comments(discussion, viewer, order, page)
                    .await
                    .expect("fetching comments from postgres"),
            ),
            normalized(
                self.mock
                    .fetch_comments(discussion, viewer, order, page)
                    .await
                    .expect("fetching comments from mock"),
            ),
        )
    }

    async fn fetch_discussion(&mut self, discussion: usize) -> Option<Discussion> {
        let discussion = self.discussions[discussion];
        compare(
            "fetch_discussion",
            self.pg
                .fetch_discussion(discussion)
                .await
                .expect("fetching discussion from postgres"),
            self.mock
                .fetch_discussion(discussion)
                .await
                .expect("fetching discussion from mock"),
        )
    }

    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        let users = ..self.users.len();
        let discussions = ..self.discussions.len();
        let comments = ..self.comments.len();
        let pick = |fuzz, range| resize_int(fuzz, range).unwrap_or(usize::MAX);
        match op {
            FuzzOp::Submit {
                author,
                discussion,
                parent,
                content,
            } => {
                let _ = self
                    .submit(
                        pick(author, users),
                        pick(discussion, discussions),
                        parent.map(|p| pick(p, comments)),
                        &content,
                    )
                    .await;
            }
            FuzzOp::Resubmit { author, comment } => {
                let _ = self
                    .resubmit(pick(author, users), pick(comment, comments))
                    .await;
            }
            FuzzOp::Delete { user, comment } => {
                let _ = self
                    .delete(pick(user, users), pick(comment, comments))
                    .await;
            }
            FuzzOp::React {
                user,
                comment,
                like,
            } => {
                let reaction = like.map(|like| match like {
                    true => Reaction::Like,
                    false => Reaction::Dislike,
                });
                let _ = self
                    .react(pick(user, users), pick(comment, comments), reaction)
                    .await;
            }
            FuzzOp::Fetch {
                discussion,
                viewer,
                order,
                page,
                limit,
            } => {
                let order = match order % 3 {
                    0 => CommentOrder::Top,
                    1 => CommentOrder::Newest,
                    _ => CommentOrder::Oldest,
                };
                let page = PageRequest::new(u32::from(page % 4) + 1, u32::from(limit % 5) + 1);
                self.fetch(
                    pick(discussion, discussions),
                    viewer.map(|v| pick(v, users)),
                    order,
                    page,
                )
                .await;
            }
            FuzzOp::FetchDiscussion { discussion } => {
                self.fetch_discussion(pick(discussion, discussions)).await;
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..50usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);

fn shape(forest: &[CommentNode<Comment>]) -> Vec<(CommentId, Vec<CommentId>)> {
    forest
        .iter()
        .map(|n| {
            (
                n.comment.id,
                n.replies.iter().map(|r| r.comment.id).collect(),
            )
        })
        .collect()
}

#[test]
fn moderation_and_reactions_on_postgres() {
    with_test_pool(|runtime, pool| {
        runtime.block_on(async move {
            let mut f = ComparativeFuzzer::new(pool).await;
            let (alice, bob, carol) = (0, 1, 2);

            let rude = f.submit(bob, 0, None, "rude").await.unwrap();
            let answer = f.submit(alice, 0, Some(0), "no").await.unwrap();
            let nested = f.submit(bob, 0, Some(1), "yes").await.unwrap();
            let hello = f.submit(carol, 0, None, "hello").await.unwrap();
            assert_eq!(rude.author.name, "bob");

            f.react(bob, 3, Some(Reaction::Like)).await.unwrap();
            f.react(alice, 3, Some(Reaction::Dislike)).await.unwrap();
            f.react(carol, 1, Some(Reaction::Like)).await.unwrap();
            f.react(carol, 1, Some(Reaction::Dislike)).await.unwrap();
            f.react(carol, 1, None).await.unwrap();

            assert_eq!(
                f.resubmit(alice, 1).await,
                Err(ApiError::UuidAlreadyUsed(answer.id.0))
            );
            assert_eq!(
                f.submit(bob, 1, Some(1), "elsewhere").await,
                Err(ApiError::ParentNotInDiscussion(answer.id))
            );
            assert_eq!(
                f.submit(bob, 0, Some(99), "ghost").await,
                Err(ApiError::CommentNotFound(CommentId::stub()))
            );

            assert_eq!(f.delete(carol, 0).await, Err(ApiError::PermissionDenied));
            f.delete(alice, 0).await.unwrap();
            assert_eq!(
                f.submit(carol, 0, Some(0), "late").await,
                Err(ApiError::CommentNotFound(rude.id))
            );
            assert_eq!(
                f.react(carol, 0, Some(Reaction::Like)).await,
                Err(ApiError::CommentNotFound(rude.id))
            );

            // the hidden top-level comment keeps its slot, its replies are promoted
            let (comments, total) = f
                .fetch(0, Some(bob), CommentOrder::Oldest, PageRequest::new(1, 5))
                .await;
            assert_eq!(total, 2);
            let forest = build_tree(comments);
            assert_eq!(
                shape(&forest),
                vec![(hello.id, vec![]), (answer.id, vec![nested.id])]
            );
            assert_eq!(forest[0].comment.like_count, 1);
            assert_eq!(forest[0].comment.dislike_count, 1);
            assert!(forest[0].comment.liked_by_viewer);
            assert!(!forest[0].comment.disliked_by_viewer);
            assert_eq!(forest[1].comment.like_count, 0);
            assert_eq!(forest[1].comment.reply_count, 1);

            let (comments, _) = f
                .fetch(0, Some(alice), CommentOrder::Top, PageRequest::new(1, 5))
                .await;
            let disliked = comments.iter().find(|c| c.id == hello.id).unwrap();
            assert!(disliked.disliked_by_viewer);
            assert!(!disliked.liked_by_viewer);

            let (comments, total) = f
                .fetch(0, None, CommentOrder::Newest, PageRequest::new(2, 1))
                .await;
            assert_eq!(total, 2);
            assert_eq!(
                comments.iter().map(|c| c.id).collect::<Vec<_>>(),
                vec![nested.id, answer.id]
            );

            assert_eq!(f.fetch_discussion(0).await.unwrap().comment_count, 3);
            assert_eq!(f.fetch_discussion(1).await.unwrap().comment_count, 0);
        })
    })
}
