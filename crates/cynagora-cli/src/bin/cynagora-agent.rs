// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `cynagora-agent`: a thin command-line front end over
//! [`cynagora_client::AgentClient`], registering one name and
//! answering a single pending question per invocation.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cynagora_client::AgentClient;
use std::path::PathBuf;

const DEFAULT_SOCKET_DIR: &str = "/var/run/cynagora";

/// Register as a built-in-agent handler, or answer a pending question.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override the agent socket path (defaults to
    /// `$CYNAGORA_SOCKET_AGENT`, then `/var/run/cynagora/agent`).
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register this connection under `name`; exits once registered,
    /// since the wire protocol's question/answer exchange happens over
    /// a connection a scripted front end cannot usefully hold open.
    Register {
        name: String,
    },
    /// Answer a previously delivered question by id. `expire` is
    /// expiration grammar text, same as `cynagora-admin set`.
    Reply {
        id: String,
        verdict: String,
        #[arg(default_value = "forever")]
        expire: String,
    },
}

fn socket_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.socket {
        return path.clone();
    }
    if let Ok(over) = std::env::var("CYNAGORA_SOCKET_AGENT") {
        if !over.is_empty() {
            return PathBuf::from(over);
        }
    }
    PathBuf::from(DEFAULT_SOCKET_DIR).join("agent")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let socket = socket_path(&args);
    let mut agent = AgentClient::connect(&socket).context("connecting to agent socket")?;

    match &args.command {
        Command::Register { name } => {
            agent.register(name).context("registering agent name")?;
            println!("registered as {name}");
        }
        Command::Reply { id, verdict, expire } => {
            agent
                .reply(id, verdict, expire)
                .context("replying to a pending question")?;
        }
    }
    Ok(())
}
