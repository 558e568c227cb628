use std::collections::HashSet;

use chrono::{Duration, Utc};
use rand::Rng;
use uuid::Uuid;

const NUM_USERS: usize = 8;
const NUM_SESSIONS: usize = 8;

const NUM_DISCUSSIONS: usize = 5;
const DISCUSSION_TITLE_LEN: usize = 6;

const NUM_COMMENTS: usize = 400;
const COMMENT_WORD_COUNT: usize = 30;
const REPLY_PROBABILITY: f64 = 0.7;
const DELETED_PROBABILITY: f64 = 0.05;
const ATTACHMENT_PROBABILITY: f64 = 0.05;

const NUM_REACTIONS: usize = 1000;

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

fn gen_text(words: usize) -> String {
    let n = rand::thread_rng().gen_range(1..=words);
    escape(&lipsum::lipsum_words(n))
}

struct GenComment {
    id: Uuid,
    discussion: usize,
}

fn main() {
    let mut rng = rand::thread_rng();
    let start = Utc::now() - Duration::days(30);

    // Generate users
    let mut users = Vec::new();
    gen_n_items("users", NUM_USERS, |i| {
        let uuid = Uuid::new_v4();
        users.push(uuid);
        format!("('{uuid}', 'user{i}', NULL)")
    });
    let gen_user = |rng: &mut rand::rngs::ThreadRng| users[rng.gen_range(0..users.len())];

    // Generate sessions, printing the tokens on stderr so they can be used from agora-ctl
    gen_n_items("sessions", NUM_SESSIONS, |i| {
        let uuid = Uuid::new_v4();
        let user = users[i % users.len()];
        eprintln!("session for user {user}: {uuid}");
        format!("('{uuid}', '{user}', NOW())")
    });

    // Generate discussions
    let mut discussions = Vec::new();
    gen_n_items("discussions", NUM_DISCUSSIONS, |_| {
        let uuid = Uuid::new_v4();
        discussions.push(uuid);
        eprintln!("discussion: {uuid}");
        format!(
            "('{uuid}', '{}', '{}', '{}')",
            gen_user(&mut rng),
            gen_text(DISCUSSION_TITLE_LEN),
            start.to_rfc3339(),
        )
    });

    // Generate comments, parents are always inserted before their replies
    let mut comments: Vec<GenComment> = Vec::new();
    gen_n_items("comments", NUM_COMMENTS, |i| {
        let uuid = Uuid::new_v4();
        let parent = match !comments.is_empty() && rng.gen_bool(REPLY_PROBABILITY) {
            true => Some(&comments[rng.gen_range(0..comments.len())]),
            false => None,
        };
        let discussion = match parent {
            Some(p) => p.discussion,
            None => rng.gen_range(0..discussions.len()),
        };
        let parent_id = match parent {
            Some(p) => format!("'{}'", p.id),
            None => String::from("NULL"),
        };
        let (attachment_url, attachment_kind) = match rng.gen_bool(ATTACHMENT_PROBABILITY) {
            true => (
                format!("'https://example.org/{uuid}.png'"),
                String::from("'image/png'"),
            ),
            false => (String::from("NULL"), String::from("NULL")),
        };
        let created_at = start + Duration::minutes(i as i64);
        let res = format!(
            "('{uuid}', '{}', {parent_id}, '{}', '{}', {attachment_url}, {attachment_kind}, '{}', {})",
            discussions[discussion],
            gen_user(&mut rng),
            gen_text(COMMENT_WORD_COUNT),
            created_at.to_rfc3339(),
            rng.gen_bool(DELETED_PROBABILITY),
        );
        comments.push(GenComment {
            id: uuid,
            discussion,
        });
        res
    });

    // Generate reactions, at most one per user and comment
    let mut seen = HashSet::new();
    while seen.len() < NUM_REACTIONS.min(users.len() * comments.len()) {
        seen.insert((
            gen_user(&mut rng),
            comments[rng.gen_range(0..comments.len())].id,
        ));
    }
    let reactions = seen.into_iter().collect::<Vec<_>>();
    gen_n_items("reactions", reactions.len(), |i| {
        let (user, comment) = reactions[i];
        format!("('{user}', '{comment}', {})", rng.gen_bool(0.8))
    });
}
