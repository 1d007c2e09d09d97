use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, Dispatch, FileSessionStore, MemorySessionStore, RefreshOutcome,
    RestaurantApi, SessionStore, Store,
};
use shared::{
    domain::{RestaurantId, ReviewId, UserId},
    protocol::{QueryParams, Review},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reviews", about = "Restaurant reviews client")]
struct Args {
    /// Settings file; defaults to ./client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Cuisines,
    Restaurants {
        #[arg(long = "query", value_parser = parse_pair)]
        query: Vec<(String, String)>,
        #[arg(long = "page", value_parser = parse_pair)]
        page: Vec<(String, String)>,
    },
    Restaurant {
        id: String,
    },
    #[command(subcommand)]
    Review(ReviewCommand),
    /// Exchange the stored refresh token for a new access token.
    Refresh,
}

#[derive(Subcommand, Debug)]
enum ReviewCommand {
    Add {
        #[arg(long)]
        restaurant: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        text: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: u8,
    },
    Edit {
        id: String,
        #[arg(long)]
        restaurant: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        text: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: u8,
    },
    Delete {
        id: String,
        #[arg(long)]
        restaurant: String,
        #[arg(long)]
        user: String,
    },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let settings = load_settings(args.config)?;
    let session: Arc<dyn SessionStore> = match &settings.session_path {
        Some(path) => Arc::new(FileSessionStore::new(path.clone())),
        None => Arc::new(MemorySessionStore::new()),
    };
    info!(base_url = %settings.base_url, "starting reviews client");

    let store = Arc::new(Store::new());
    let api = RestaurantApi::new(settings, store.clone(), session);
    api.auth().await.context("authentication failed")?;

    match args.command {
        Command::Cuisines => {
            api.get_cuisines().await?;
        }
        Command::Restaurants { query, page } => {
            let query: QueryParams = query.into_iter().collect();
            let page: QueryParams = page.into_iter().collect();
            api.get_restaurants(page, query).await?;
        }
        Command::Restaurant { id } => {
            api.get_restaurant(RestaurantId::new(id)).await?;
        }
        Command::Review(command) => run_review(&api, command).await?,
        Command::Refresh => {
            let tokens = api
                .tokens()
                .await
                .ok_or_else(|| anyhow!("no session tokens to refresh"))?;
            match api.auth_refresh(tokens).await? {
                RefreshOutcome::Skipped => info!("refresh skipped during cooldown"),
                _ => info!("access token refreshed"),
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(store.state().as_ref())?);
    Ok(())
}

async fn run_review(api: &Arc<RestaurantApi>, command: ReviewCommand) -> Result<()> {
    match command {
        ReviewCommand::Add {
            restaurant,
            user,
            text,
            rating,
        } => {
            let restaurant_id = RestaurantId::new(restaurant);
            api.get_restaurant(restaurant_id.clone()).await?;
            let review = Review {
                id: ReviewId::generate(),
                restaurant_id,
                user_id: UserId::new(user),
                text,
                rating,
                timestamp: Utc::now(),
            };
            api.create_review(review).await?;
        }
        ReviewCommand::Edit {
            id,
            restaurant,
            user,
            text,
            rating,
        } => {
            let restaurant_id = RestaurantId::new(restaurant);
            api.get_restaurant(restaurant_id.clone()).await?;
            let review = Review {
                id: ReviewId::new(id),
                restaurant_id,
                user_id: UserId::new(user),
                text,
                rating,
                timestamp: Utc::now(),
            };
            api.update_review(review).await?;
        }
        ReviewCommand::Delete {
            id,
            restaurant,
            user,
        } => {
            let restaurant_id = RestaurantId::new(restaurant);
            api.get_restaurant(restaurant_id.clone()).await?;
            api.delete_review(ReviewId::new(id), UserId::new(user), restaurant_id)
                .await?;
        }
    }
    Ok(())
}
