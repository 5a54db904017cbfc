//! # Skygate CLI
//!
//! Runs one gateway operation per invocation and prints its outcome.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          skygate <command>                              │
//! │                                                                         │
//! │  load config ──► build Gateway ──► resume stored session (best effort) │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                         run command ──► print Outcome JSON             │
//! │                                        │                                │
//! │                              exit 0 on success, 1 on failure           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use skygate_core::{NewPost, RecordRef, ReplyRef};
use skygate_sync::{Gateway, GatewayConfig, Outcome};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skygate")]
#[command(about = "Client gateway for the Bluesky social network")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "SKYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Print compact JSON
    #[arg(long, default_value_t = false)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        /// Handle, DID or email
        identifier: String,
        /// App password (prefer --password-stdin)
        #[arg(long, env = "SKYGATE_APP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Read the app password from stdin
        #[arg(long, default_value_t = false)]
        password_stdin: bool,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Read one page of a feed
    Feed {
        /// Feed descriptor, e.g. `following` or `author|alice.bsky.social|posts_no_replies`.
        /// Omit for the default feed.
        descriptor: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Read a post thread
    Thread { uri: String },
    /// Read a profile
    Profile { actor: String },
    /// Search posts
    SearchPosts { query: String },
    /// Search accounts
    SearchActors { query: String },
    /// Suggested accounts to follow
    Suggestions,
    /// Popular feed generators
    PopularFeeds,
    /// Like a post, or remove the like
    Like { uri: String, cid: String },
    /// Repost a post, or remove the repost
    Repost { uri: String, cid: String },
    /// Follow an account, or unfollow it
    Follow { did: String },
    /// Publish a post
    Post {
        text: String,
        #[command(flatten)]
        reply: ReplyArgs,
    },
    /// Delete one of your posts
    Delete { uri: String },
}

#[derive(Args)]
struct ReplyArgs {
    /// Thread root to reply in
    #[arg(long, requires = "root_cid")]
    root_uri: Option<String>,
    #[arg(long, requires = "root_uri")]
    root_cid: Option<String>,
    /// Direct parent, defaults to the root
    #[arg(long, requires_all = ["parent_cid", "root_uri"])]
    parent_uri: Option<String>,
    #[arg(long, requires = "parent_uri")]
    parent_cid: Option<String>,
}

impl ReplyArgs {
    fn into_reply(self) -> Option<ReplyRef> {
        let root = RecordRef {
            uri: self.root_uri?,
            cid: self.root_cid?,
        };
        let parent = match (self.parent_uri, self.parent_cid) {
            (Some(uri), Some(cid)) => RecordRef { uri, cid },
            _ => root.clone(),
        };
        Some(ReplyRef { root, parent })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("SKYGATE_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info,skygate_sync=debug,skygate_cli=debug"));

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let config = GatewayConfig::load_or_default(cli.config.clone());
    let gateway = Gateway::from_config(config).context("failed to build gateway")?;

    if gateway.resume().await {
        debug!("Resumed stored session");
    }

    let printer = Printer {
        compact: cli.compact,
    };
    let ok = run(&gateway, cli.command, &printer).await?;

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run(gateway: &Gateway, command: Commands, out: &Printer) -> Result<bool> {
    match command {
        Commands::Login {
            identifier,
            password,
            password_stdin,
        } => {
            let password = read_password(password, password_stdin)?;
            let outcome = gateway.login(&identifier, &password).await;
            if outcome.is_success() {
                info!(identifier = %identifier, "Signed in");
            }
            // Tokens stay on disk; only the identity is printed.
            out.print(&outcome.map(|credentials| serde_json::json!({
                "did": credentials.actor_id,
                "handle": credentials.actor_handle,
            })))
        }
        Commands::Logout => out.print(&gateway.logout().await),
        Commands::Whoami => out.print(&Outcome::Success(gateway.profile_summary().await)),
        Commands::Feed {
            descriptor,
            limit,
            cursor,
        } => out.print(
            &gateway
                .feed(descriptor.as_deref(), limit, cursor.as_deref())
                .await,
        ),
        Commands::Thread { uri } => out.print(&gateway.thread(&uri).await),
        Commands::Profile { actor } => out.print(&gateway.profile(&actor).await),
        Commands::SearchPosts { query } => out.print(&gateway.search_posts(&query).await),
        Commands::SearchActors { query } => out.print(&gateway.search_actors(&query).await),
        Commands::Suggestions => out.print(&gateway.suggestions().await),
        Commands::PopularFeeds => out.print(&gateway.popular_feeds().await),
        Commands::Like { uri, cid } => out.print(&gateway.toggle_like(&uri, &cid).await),
        Commands::Repost { uri, cid } => out.print(&gateway.toggle_repost(&uri, &cid).await),
        Commands::Follow { did } => out.print(&gateway.toggle_follow(&did).await),
        Commands::Post { text, reply } => {
            let post = NewPost {
                reply: reply.into_reply(),
                ..NewPost::new(text)
            };
            out.print(&gateway.create_post(post).await)
        }
        Commands::Delete { uri } => out.print(&gateway.delete_post(&uri).await),
    }
}

fn read_password(flag: Option<String>, from_stdin: bool) -> Result<String> {
    if from_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read password from stdin")?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }

    match flag {
        Some(password) => Ok(password),
        None => bail!("an app password is required: pass --password-stdin or set SKYGATE_APP_PASSWORD"),
    }
}

struct Printer {
    compact: bool,
}

impl Printer {
    /// Prints the outcome and reports whether it succeeded.
    fn print<T: Serialize>(&self, outcome: &Outcome<T>) -> Result<bool> {
        let json = if self.compact {
            serde_json::to_string(outcome)?
        } else {
            serde_json::to_string_pretty(outcome)?
        };
        println!("{}", json);
        Ok(outcome.is_success())
    }
}
