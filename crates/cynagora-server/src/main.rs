// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `cynagorad`: the permission-checking daemon.

mod asks;
mod connection;
mod server;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use cynagora_config_fs::settings::{load_settings, resolve_socket_path, SocketKind as SettingsSocketKind};
use cynagora_db::Db;
use mio::net::UnixListener;
use server::{Daemon, Listeners};
use state::ServerState;
use std::path::PathBuf;
use tracing::info;

/// Command-line flags, mirroring the options `cynagorad` has always
/// taken: config file location, directory overrides, and first-boot
/// initialization.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the settings file (defaults to `/etc/cynagora.conf` if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the rule database directory.
    #[arg(long)]
    dbdir: Option<PathBuf>,

    /// Override the socket directory.
    #[arg(long)]
    socketdir: Option<PathBuf>,

    /// Re-apply the initial rule set even if the database already exists.
    #[arg(long)]
    force_init: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref()).context("loading daemon settings")?;
    if let Some(dbdir) = &args.dbdir {
        settings.dbdir = dbdir.display().to_string();
    }
    if let Some(socketdir) = &args.socketdir {
        settings.socketdir = socketdir.display().to_string();
    }
    settings.force_init = settings.force_init || args.force_init;

    let dbdir = PathBuf::from(&settings.dbdir);
    let db_already_existed = dbdir.join("cynagora.rules").exists();
    let mut db = Db::open(&dbdir).context("opening rule database")?;
    if settings.force_init || !db_already_existed {
        let init_dir = PathBuf::from(&settings.init);
        if init_dir.exists() {
            for entry in std::fs::read_dir(&init_dir).context("reading init directory")? {
                let entry = entry?;
                if entry.path().is_file() {
                    let count = db.import_initial(&entry.path(), ServerState::now())?;
                    info!(file = %entry.path().display(), count, "imported initial rules");
                }
            }
        }
    }

    let check_path = resolve_socket_path(&settings, SettingsSocketKind::Check);
    let admin_path = resolve_socket_path(&settings, SettingsSocketKind::Admin);
    let agent_path = resolve_socket_path(&settings, SettingsSocketKind::Agent);
    for path in [&check_path, &admin_path, &agent_path] {
        let _ = std::fs::remove_file(path);
    }

    let listeners = Listeners {
        check: UnixListener::bind(&check_path).context("binding check socket")?,
        admin: UnixListener::bind(&admin_path).context("binding admin socket")?,
        agent: UnixListener::bind(&agent_path).context("binding agent socket")?,
    };
    info!(
        check = %check_path.display(),
        admin = %admin_path.display(),
        agent = %agent_path.display(),
        "listening"
    );

    let mut daemon = Daemon::new(listeners, ServerState::new(db))?;
    daemon.run().context("event loop failed")
}
