use std::io::Read;

use agora_api::{AuthToken, Comment, CommentOrder, CommentPage, Uuid};
use anyhow::{anyhow, Context};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, default_value = "http://127.0.0.1:3000")]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Fetch one page of a discussion's comments and print it as a tree
    Comments {
        /// Discussion id
        discussion: Uuid,

        #[structopt(long, default_value = "1")]
        page: u32,

        #[structopt(long)]
        limit: Option<u32>,

        /// One of top, newest, oldest
        #[structopt(long, default_value = "top")]
        sort: CommentOrder,

        /// Print the raw JSON response instead
        #[structopt(long)]
        json: bool,

        /// Session token, sent as a bearer token
        #[structopt(long, env = "AGORA_TOKEN")]
        token: Option<Uuid>,
    },

    /// Thread a flat JSON list of comments read from a file, or `-` for stdin
    Thread {
        file: String,
    },
}

fn read_input(file: &str) -> anyhow::Result<String> {
    let mut res = String::new();
    match file {
        "-" => {
            std::io::stdin()
                .read_to_string(&mut res)
                .context("reading stdin")?;
        }
        _ => {
            res = std::fs::read_to_string(file).with_context(|| format!("reading {file:?}"))?;
        }
    }
    Ok(res)
}

fn print_page(page: &CommentPage) {
    for root in &page.data {
        for (depth, c) in root.walk() {
            let indent = "  ".repeat(depth);
            println!(
                "{indent}- {} ({}, +{} -{}, {} replies) {}",
                c.author.name,
                c.created_at.format("%Y-%m-%d %H:%M"),
                c.like_count,
                c.dislike_count,
                c.reply_count,
                c.id.0,
            );
            for line in c.content.lines() {
                println!("{indent}  {line}");
            }
        }
    }
    println!(
        "page {}/{}, {} top-level comments{}",
        page.meta.page,
        page.meta.total_pages,
        page.meta.total,
        if page.meta.has_more { ", more available" } else { "" },
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    match opt.cmd {
        Command::Comments {
            discussion,
            page,
            limit,
            sort,
            json,
            token,
        } => {
            let client = reqwest::Client::new();
            let mut query = vec![("page", page.to_string()), ("sort", sort.to_string())];
            if let Some(limit) = limit {
                query.push(("limit", limit.to_string()));
            }
            let mut req = client
                .get(format!("{}/api/discussions/{discussion}/comments", opt.host))
                .query(&query);
            if let Some(token) = token {
                req = req.header("authorization", AuthToken(token).to_header());
            }
            let resp = req.send().await.context("sending request")?;
            let status = resp.status();
            let body = resp.bytes().await.context("reading response body")?;
            if !status.is_success() {
                let err = agora_api::Error::parse(&body)
                    .with_context(|| format!("server returned {status}"))?;
                return Err(anyhow!("server returned {status}: {err}"));
            }
            let page: CommentPage =
                serde_json::from_slice(&body).context("parsing comment page")?;
            match json {
                true => println!("{}", serde_json::to_string_pretty(&page)?),
                false => print_page(&page),
            }
        }
        Command::Thread { file } => {
            let input = read_input(&file)?;
            let comments: Vec<Comment> =
                serde_json::from_str(&input).context("parsing comment list")?;
            let forest = agora_api::build_tree(comments);
            println!("{}", serde_json::to_string_pretty(&forest)?);
        }
    }

    Ok(())
}
