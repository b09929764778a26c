//! Access Warden CLI
//!
//! Operator interface to the permission engine: check access, manage entries,
//! and run cleanup after resources or users are deleted.

use access_warden::{
    access_control::{
        AccessManager, Capabilities, EntryId, PermissionEngine, ResourceRef, TeamId, UserId,
    },
    config::{AppConfig, LogFormat, load_config},
    directory::{CascadeCleanup, Directory, PrincipalProvider},
    error::StoreError,
    store::{AccessEntry, FileEntryStore},
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Access Warden - granular per-resource access control
#[derive(Parser, Debug)]
#[command(name = "access-warden")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "ACCESS_WARDEN_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(long, env = "ACCESS_WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct Actor {
    /// User performing the change
    #[arg(long = "as", value_name = "USER")]
    actor: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate an action for a user
    Check {
        #[arg(long)]
        user: u64,
        /// view, deploy, update or delete
        #[arg(long)]
        action: String,
        /// TYPE:ID, e.g. project:10
        #[arg(long)]
        resource: ResourceRef,
        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Grant a user a permission level on a resource
    Grant {
        #[command(flatten)]
        actor: Actor,
        #[arg(long)]
        user: u64,
        #[arg(long)]
        resource: ResourceRef,
        /// view_only, deploy or full_access
        #[arg(long)]
        level: String,
    },
    /// Change the level of an existing entry
    SetLevel {
        #[command(flatten)]
        actor: Actor,
        #[arg(long)]
        resource: ResourceRef,
        #[arg(long)]
        entry: u64,
        #[arg(long)]
        level: String,
    },
    /// Set individual capabilities of an existing entry
    SetCaps {
        #[command(flatten)]
        actor: Actor,
        #[arg(long)]
        resource: ResourceRef,
        #[arg(long)]
        entry: u64,
        #[arg(long)]
        view: bool,
        #[arg(long)]
        deploy: bool,
        #[arg(long)]
        manage: bool,
        #[arg(long)]
        delete: bool,
    },
    /// Remove one entry
    Revoke {
        #[command(flatten)]
        actor: Actor,
        #[arg(long)]
        resource: ResourceRef,
        #[arg(long)]
        entry: u64,
    },
    /// Grant full access to every team member without a bypass role
    GrantAll {
        #[command(flatten)]
        actor: Actor,
        #[arg(long)]
        resource: ResourceRef,
    },
    /// Remove every entry on a resource
    RevokeAll {
        #[command(flatten)]
        actor: Actor,
        #[arg(long)]
        resource: ResourceRef,
    },
    /// List entries on a resource
    List {
        #[arg(long)]
        resource: ResourceRef,
    },
    /// Give existing team members full access to all team projects
    Backfill {
        #[arg(long)]
        team: u64,
    },
    /// Delete a resource and every entry on it or below it
    DeleteResource {
        #[arg(long)]
        resource: ResourceRef,
    },
    /// Delete a user and all of their entries
    DeleteUser {
        #[arg(long)]
        user: u64,
    },
}

fn init_logging(config: &AppConfig, override_level: Option<&str>) {
    let level = override_level.unwrap_or(config.logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn print_entry(entry: &AccessEntry) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        entry.id,
        entry.user,
        entry.resource,
        entry.level(),
        entry.updated_at.to_rfc3339()
    );
}

/// Serialize command output; only map keys that are not strings can fail here
fn to_json<T: Serialize>(value: &T) -> access_warden::Result<String> {
    Ok(serde_json::to_string(value).map_err(StoreError::from)?)
}

fn run(command: Command, config: &AppConfig) -> access_warden::Result<()> {
    let directory = Arc::new(
        Directory::load(&config.storage.directory_path)
            .inspect_err(|e| error!(error = %e, "Failed to load directory"))?,
    );
    let store = Arc::new(
        FileEntryStore::open(&config.storage.entries_path)
            .inspect_err(|e| error!(error = %e, "Failed to open entry store"))?,
    );
    let engine = Arc::new(PermissionEngine::new(
        config.permissions.flag(),
        store.clone(),
        directory.clone(),
        directory.clone(),
    ));
    let manager = AccessManager::new(engine.clone());

    match command {
        Command::Check {
            user,
            action,
            resource,
            json,
        } => {
            let principal = directory.principal(UserId(user))?;
            let verdict = engine.evaluate_named(&principal, &action, resource)?;
            if json {
                println!("{}", to_json(&verdict)?);
            } else {
                println!("{verdict}");
            }
        }
        Command::Grant {
            actor,
            user,
            resource,
            level,
        } => {
            let actor = directory.principal(UserId(actor.actor))?;
            let entry = manager.grant(&actor, resource, UserId(user), &level)?;
            print_entry(&entry);
        }
        Command::SetLevel {
            actor,
            resource,
            entry,
            level,
        } => {
            let actor = directory.principal(UserId(actor.actor))?;
            let entry = manager.update_level(&actor, resource, EntryId(entry), &level)?;
            print_entry(&entry);
        }
        Command::SetCaps {
            actor,
            resource,
            entry,
            view,
            deploy,
            manage,
            delete,
        } => {
            let actor = directory.principal(UserId(actor.actor))?;
            let capabilities = Capabilities::new(view, deploy, manage, delete);
            let entry =
                manager.update_capabilities(&actor, resource, EntryId(entry), capabilities)?;
            print_entry(&entry);
        }
        Command::Revoke {
            actor,
            resource,
            entry,
        } => {
            let actor = directory.principal(UserId(actor.actor))?;
            let removed = manager.revoke(&actor, resource, EntryId(entry))?;
            print_entry(&removed);
        }
        Command::GrantAll { actor, resource } => {
            let actor = directory.principal(UserId(actor.actor))?;
            let report = manager.grant_full_access_to_all(&actor, resource)?;
            println!("{}", to_json(&report)?);
        }
        Command::RevokeAll { actor, resource } => {
            let actor = directory.principal(UserId(actor.actor))?;
            let removed = manager.revoke_all(&actor, resource)?;
            println!("{removed}");
        }
        Command::List { resource } => {
            for entry in engine.list_access(resource)? {
                print_entry(&entry);
            }
        }
        Command::Backfill { team } => {
            let created = engine.backfill_team_access(TeamId(team))?;
            println!("{created}");
        }
        Command::DeleteResource { resource } => {
            let cleanup = CascadeCleanup::new(store.clone(), directory.clone());
            let report = cleanup.resource_deleted(resource)?;
            directory.remove_resource(resource)?;
            directory.save(&config.storage.directory_path)?;
            println!("{}", to_json(&report)?);
        }
        Command::DeleteUser { user } => {
            let cleanup = CascadeCleanup::new(store.clone(), directory.clone());
            let removed = cleanup.user_deleted(UserId(user))?;
            directory.remove_user(UserId(user))?;
            directory.save(&config.storage.directory_path)?;
            println!("{removed}");
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Pick up .env before anything reads the environment
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    init_logging(&config, args.log_level.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        directory = %config.storage.directory_path.display(),
        entries = %config.storage.entries_path.display(),
        "Starting access-warden"
    );

    run(args.command, &config)?;
    Ok(())
}
