//! canopy - Authenticated Key-Value Store Services
//!
//! Run modes:
//!   canopy api        - Start the REST API together with the sync scheduler
//!   canopy sync       - Run the sync scheduler alone (background daemon)
//!   canopy check      - Run the store integrity self-checks and exit

use std::env;
use std::sync::Arc;

use canopy::api;
use canopy::config::Config;
use canopy::logging::{init_logging, LogLevel};
use canopy::store::DataStore;
use canopy::sync::{HttpTransport, HttpWalletClient, SyncService};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(LogLevel::from(config.log_level.as_str()), config.log_json) {
        eprintln!("Logging error: {}", e);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "api" => run_api(&config, &args[2..]).await,
        "sync" => run_sync(&config, &args[2..]).await,
        "check" => run_check(&config).await,
        "bench" => run_bench(&args[2..]).await,
        "help" | "--help" | "-h" => print_usage(),
        _ => print_usage(),
    }
}

fn print_usage() {
    println!("canopy - Authenticated Key-Value Store Services");
    println!();
    println!("Usage:");
    println!("  canopy api [--port <port>]          Start REST API and sync scheduler");
    println!("  canopy sync [--interval <secs>]     Run the sync scheduler alone");
    println!("  canopy check                        Run store integrity checks");
    println!("  canopy bench [--count <n>]          Time random insertions in memory");
    println!();
    println!("Configuration is environment-based; see CANOPY_* variables.");
}

fn build_service(config: &Config, store: Arc<DataStore>) -> Arc<SyncService> {
    let wallet = Arc::new(HttpWalletClient::new(&config.wallet_rpc_url));
    let transport = match HttpTransport::new(
        &config.custom_headers,
        std::time::Duration::from_secs(config.connect_timeout_secs),
    ) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Transport error: {}", e);
            std::process::exit(1);
        }
    };

    Arc::new(SyncService::new(
        store,
        wallet,
        Arc::new(transport),
        config.sync_config(),
    ))
}

fn open_store(config: &Config) -> Arc<DataStore> {
    match DataStore::new(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Store error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_api(config: &Config, args: &[String]) {
    let mut port = config.api_port;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                port = args[i + 1].parse().unwrap_or(config.api_port);
                i += 2;
            }
            _ => i += 1,
        }
    }

    config.print_summary();

    let store = open_store(config);
    let service = build_service(config, store.clone());

    let scheduler = service.clone();
    let sync_task = tokio::spawn(async move { scheduler.run().await });

    if let Err(e) = api::start_server(store, service, port).await {
        eprintln!("API server error: {}", e);
    }
    sync_task.abort();
}

async fn run_sync(config: &Config, args: &[String]) {
    let mut config = config.clone();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--interval" if i + 1 < args.len() => {
                config.fetch_interval_secs = args[i + 1].parse().unwrap_or(config.fetch_interval_secs);
                i += 2;
            }
            _ => i += 1,
        }
    }

    config.print_summary();

    let store = open_store(&config);
    let service = build_service(&config, store);

    println!("Watching subscribed stores... Press Ctrl+C to stop");
    service.run().await;
}

async fn run_check(config: &Config) {
    let store = open_store(config);

    match store.check().await {
        Ok(()) => println!("Integrity checks passed"),
        Err(e) => {
            eprintln!("Integrity check failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_bench(args: &[String]) {
    use canopy::types::Status;
    use rand::RngCore;

    let mut count: u32 = 1000;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--count" if i + 1 < args.len() => {
                count = args[i + 1].parse().unwrap_or(1000);
                i += 2;
            }
            _ => i += 1,
        }
    }

    let store = match DataStore::in_memory() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Store error: {}", e);
            std::process::exit(1);
        }
    };

    let mut rng = rand::thread_rng();
    let mut store_id = [0u8; 32];
    rng.fill_bytes(&mut store_id);
    store.create_store(store_id, Status::Committed).await.unwrap();

    println!("Timing {} random autoinserts...", count);
    let start = std::time::Instant::now();
    for index in 0..count {
        let mut value = [0u8; 16];
        rng.fill_bytes(&mut value);
        store
            .autoinsert(&index.to_be_bytes(), &value, store_id, Status::Committed)
            .await
            .unwrap();
    }
    let elapsed = start.elapsed();

    println!(
        "Inserted {} keys in {:.2?} ({:.0} inserts/second)",
        count,
        elapsed,
        count as f64 / elapsed.as_secs_f64()
    );

    let root = store.get_tree_root(&store_id, None).await.unwrap();
    println!(
        "Final generation {} root {}",
        root.generation,
        hex::encode(root.node_hash.unwrap())
    );
}
