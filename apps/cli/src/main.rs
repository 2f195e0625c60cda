use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::load_settings, AddOutcome, BookmarkViewModel, FileSessionStore, MemorySessionStore,
    SessionStore, SupabaseClient, ViewEvent,
};
use shared::domain::{BookmarkId, OAuthProvider};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod render;

use render::{identity_label, render_view};

#[derive(Parser, Debug)]
#[command(name = "bookmarks", about = "Personal bookmarks backed by a hosted database")]
struct Cli {
    /// Settings file (defaults to ./bookmarks.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Keep the session in memory only.
    #[arg(long, global = true)]
    ephemeral: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the OAuth sign-in URL.
    Login {
        #[arg(long)]
        provider: Option<String>,
    },
    /// Finish sign-in with the URL the provider redirected to.
    Callback { redirect_url: String },
    Logout,
    Whoami,
    List,
    Add { title: String, url: String },
    Delete { id: String },
    /// Re-render whenever the session or list changes.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref())?;
    let store: Arc<dyn SessionStore> = if cli.ephemeral {
        Arc::new(MemorySessionStore::default())
    } else {
        Arc::new(FileSessionStore::new(&settings.session_path))
    };
    let backend = Arc::new(
        SupabaseClient::new(&settings, store).context("failed to initialize backend client")?,
    );
    let view_model = BookmarkViewModel::new(backend.clone(), backend.clone());

    match cli.command {
        Command::Login { provider } => {
            let provider = match provider {
                Some(raw) => raw.parse::<OAuthProvider>().map_err(anyhow::Error::msg)?,
                None => settings.oauth_provider,
            };
            let url = view_model.sign_in(provider).await?;
            println!("Open this URL to sign in with {provider}:\n{url}");
            println!("Then run: bookmarks callback '<redirected url>'");
        }
        Command::Callback { redirect_url } => {
            let session = backend.complete_oauth(&redirect_url).await?;
            println!("Signed in as {}", identity_label(&session.user));
        }
        Command::Logout => {
            view_model.sign_out().await?;
            println!("Signed out");
        }
        Command::Whoami => {
            let _tracker = view_model.start().await;
            match view_model.snapshot().await.identity {
                Some(identity) => println!("{} ({})", identity_label(&identity), identity.id),
                None => println!("Not signed in"),
            }
        }
        Command::List => {
            let _tracker = view_model.start().await;
            print!("{}", render_view(&view_model.snapshot().await));
        }
        Command::Add { title, url } => {
            let _tracker = view_model.start().await;
            if !view_model.snapshot().await.is_signed_in() {
                bail!("not signed in; run `bookmarks login` first");
            }
            match view_model.add(title, url).await {
                AddOutcome::Submitted => {}
                AddOutcome::Skipped => bail!("title and url are both required"),
                AddOutcome::Rejected(err) => return Err(err.into()),
                AddOutcome::SignedOut => bail!("not signed in; run `bookmarks login` first"),
            }
            print!("{}", render_view(&view_model.snapshot().await));
        }
        Command::Delete { id } => {
            let id: BookmarkId = id
                .parse()
                .with_context(|| format!("'{id}' is not a bookmark id"))?;
            let _tracker = view_model.start().await;
            view_model.delete(id).await;
            print!("{}", render_view(&view_model.snapshot().await));
        }
        Command::Watch => {
            let _tracker = view_model.start().await;
            let mut events = view_model.subscribe();
            print!("{}", render_view(&view_model.snapshot().await));
            info!("watching for changes; press Ctrl-C to stop");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(ViewEvent::StateChanged(state)) => print!("\n{}", render_view(&state)),
                        Ok(ViewEvent::Alert(message)) => eprintln!("{message}"),
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }
    }

    Ok(())
}
