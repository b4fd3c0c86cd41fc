use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::commands::{self, Output, TagChange};
use cli::render::render;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uploader_core::config;
use uploader_core::PhotoClient;

#[derive(Parser)]
#[command(name = "photoup", version, about = "Upload, browse and tag photos")]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PHOTOUP_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: String,
    },
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PHOTOUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Upload files or directories of images
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Only pick files matching these patterns inside directories
        #[arg(long = "glob")]
        globs: Vec<String>,
        /// Simultaneous uploads (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// List photos, optionally filtered by tag
    Gallery {
        #[arg(long)]
        tag: Option<String>,
        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long)]
        size: Option<u32>,
        /// Refetch periodically until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Inspect or edit tags
    Tags {
        #[command(subcommand)]
        action: TagsCommand,
    },
}

#[derive(Subcommand)]
enum TagsCommand {
    /// All tags in use
    List,
    Add { photo_id: String, tag: String },
    Remove { photo_id: String, tag: String },
    /// Replace every tag on a photo
    Set { photo_id: String, tags: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Commands::Upload {
        concurrency: Some(n),
        ..
    } = &cli.command
    {
        cfg.upload.concurrency = *n;
    }
    let client = PhotoClient::from_config(&cfg).await?;
    let json = cli.json;

    let output = match cli.command {
        Commands::Register {
            email,
            password,
            name,
        } => commands::register(&client, &email, &password, &name).await?,
        Commands::Login { email, password } => commands::login(&client, &email, &password).await?,
        Commands::Logout => commands::logout(&client).await?,
        Commands::Whoami => commands::whoami(&client)?,
        Commands::Upload { paths, globs, .. } => commands::upload(&client, &paths, &globs).await?,
        Commands::Gallery {
            tag,
            page,
            size,
            watch,
        } => {
            if watch {
                return watch_gallery(&client, tag.as_deref(), page, size, json).await;
            }
            commands::gallery(&client, tag.as_deref(), page, size).await?
        }
        Commands::Tags { action } => match action {
            TagsCommand::List => commands::tags_list(&client).await?,
            TagsCommand::Add { photo_id, tag } => {
                commands::edit_tags(&client, &photo_id, TagChange::Add(tag)).await?
            }
            TagsCommand::Remove { photo_id, tag } => {
                commands::edit_tags(&client, &photo_id, TagChange::Remove(tag)).await?
            }
            TagsCommand::Set { photo_id, tags } => {
                commands::edit_tags(&client, &photo_id, TagChange::Set(tags)).await?
            }
        },
    };
    println!("{}", render(&output, json)?);
    Ok(())
}

/// Reprints the gallery every refresh interval until Ctrl-C. Fetch errors
/// are reported and the loop keeps going.
async fn watch_gallery(
    client: &PhotoClient,
    tag: Option<&str>,
    page: u32,
    size: Option<u32>,
    json: bool,
) -> Result<()> {
    let mut ticker = tokio::time::interval(client.gallery.config().refresh_interval());
    let mut session = client.session.subscribe();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match commands::gallery(client, tag, page, size).await {
                    Ok(output) => println!("{}", render(&output, json)?),
                    Err(e) => tracing::warn!("refresh failed: {:#}", e),
                }
            }
            changed = session.changed() => {
                if changed.is_err() || session.borrow_and_update().is_none() {
                    println!("{}", render(&Output::Message("session ended".into()), json)?);
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
