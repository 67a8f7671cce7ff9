//! Leaderboard - claim points and watch the rankings move live

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use leaderboard::{
    config::{Args, StoreKind},
    db::{mongo::redact_uri, MongoClient},
    logging,
    server::{self, AppState},
    store::{self, MemoryScoreStore, MongoScoreStore, ScoreStore},
};

/// Base delay between MongoDB connection attempts at startup
const MONGO_CONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Leaderboard");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {:?}", args.store);
    if args.store == StoreKind::Mongo {
        info!("MongoDB: {} (db: {})", redact_uri(&args.mongo_uri), args.mongodb_db);
    }
    info!("Sync on connect: {}", args.sync_on_connect);
    info!("CORS origins: {}", args.cors_allow_origin);
    info!("======================================");

    let store: Arc<dyn ScoreStore> = match args.store {
        StoreKind::Memory => Arc::new(MemoryScoreStore::new()),
        StoreKind::Mongo => match open_mongo_store(&args).await {
            Ok(store) => {
                info!("MongoDB connected successfully");
                Arc::new(store)
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("MongoDB connection failed (dev mode, using memory store): {}", e);
                    Arc::new(MemoryScoreStore::new())
                } else {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        },
    };

    let seeds = args.seed_user_list();
    if !seeds.is_empty() {
        match store::seed_users(store.as_ref(), &seeds).await {
            Ok(created) => info!("Seeded {} of {} users", created, seeds.len()),
            Err(e) => warn!("Seeding users failed: {}", e),
        }
    }

    let state = Arc::new(AppState::new(args, store));
    server::run(state).await?;

    Ok(())
}

async fn open_mongo_store(args: &Args) -> leaderboard::Result<MongoScoreStore> {
    let mongo = MongoClient::connect_with_retry(
        &args.mongo_uri,
        &args.mongodb_db,
        args.mongo_connect_attempts,
        MONGO_CONNECT_BACKOFF,
    )
    .await?;
    MongoScoreStore::new(&mongo).await
}
