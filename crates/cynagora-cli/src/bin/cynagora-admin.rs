// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `cynagora-admin`: a thin command-line front end over
//! [`cynagora_client::AdminClient`], one invocation per rule edit.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cynagora_client::{AdminClient, Query};
use std::path::PathBuf;

const DEFAULT_SOCKET_DIR: &str = "/var/run/cynagora";

/// Edit or inspect the rule database.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override the admin socket path (defaults to
    /// `$CYNAGORA_SOCKET_ADMIN`, then `/var/run/cynagora/admin`).
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add or replace a rule. `expire` is expiration grammar text: a
    /// relative duration (`1h30m`), `forever`, or a leading `-` for
    /// "valid but do not cache at the checker".
    Set {
        client: String,
        session: String,
        user: String,
        permission: String,
        value: String,
        #[arg(default_value = "forever")]
        expire: String,
    },
    /// Remove every rule matching a pattern.
    Drop {
        client: String,
        session: String,
        user: String,
        permission: String,
    },
    /// List every rule matching a pattern.
    Get {
        client: String,
        session: String,
        user: String,
        permission: String,
    },
    /// Remove every rule.
    Clearall,
}

fn socket_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.socket {
        return path.clone();
    }
    if let Ok(over) = std::env::var("CYNAGORA_SOCKET_ADMIN") {
        if !over.is_empty() {
            return PathBuf::from(over);
        }
    }
    PathBuf::from(DEFAULT_SOCKET_DIR).join("admin")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let socket = socket_path(&args);
    let mut admin = AdminClient::connect(&socket).context("connecting to admin socket")?;

    match &args.command {
        Command::Set {
            client,
            session,
            user,
            permission,
            value,
            expire,
        } => {
            let query = Query {
                client: client.clone(),
                session: session.clone(),
                user: user.clone(),
                permission: permission.clone(),
            };
            admin.enter().context("entering critical section")?;
            admin.set(&query, value, expire).context("setting rule")?;
            admin.leave(true).context("leaving critical section")?;
        }
        Command::Drop {
            client,
            session,
            user,
            permission,
        } => {
            let query = Query {
                client: client.clone(),
                session: session.clone(),
                user: user.clone(),
                permission: permission.clone(),
            };
            admin.enter().context("entering critical section")?;
            admin.drop(&query).context("dropping rules")?;
            admin.leave(true).context("leaving critical section")?;
            println!("dropped matching rule(s)");
        }
        Command::Get {
            client,
            session,
            user,
            permission,
        } => {
            let query = Query {
                client: client.clone(),
                session: session.clone(),
                user: user.clone(),
                permission: permission.clone(),
            };
            for line in admin.get(&query).context("listing rules")? {
                println!("{line}");
            }
        }
        Command::Clearall => {
            admin.enter().context("entering critical section")?;
            admin.clearall().context("clearing all rules")?;
            admin.leave(true).context("leaving critical section")?;
        }
    }
    Ok(())
}
