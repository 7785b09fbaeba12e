//! d4k Cart CLI - Drive a local cart from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Add two medium tees
//! cart add -p 3 -n "Logo Tee" --price 19.99 -s M -q 2
//!
//! # Show the cart
//! cart show
//!
//! # Reconcile with the remote cart (requires CART_API_TOKEN)
//! cart sync
//! ```
//!
//! # Commands
//!
//! - `show` - Print the cart
//! - `add` / `remove` / `update` / `clear` - Edit the cart
//! - `sync` - Reconcile with the remote cart
//! - `status` - Print sync status and unconfirmed edits
//! - `checkout-done` - Forget the cart after an order was placed

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use d4k_cart::{CartConfig, CartService};

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "cart")]
#[command(author, version, about = "d4k cart CLI")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cart
    Show,
    /// Add units of a product
    Add {
        /// Catalog product ID
        #[arg(short, long)]
        product: i64,

        /// Product display name
        #[arg(short, long)]
        name: String,

        /// Unit price (e.g. 19.99)
        #[arg(long)]
        price: String,

        /// Variant size
        #[arg(short, long)]
        size: Option<String>,

        /// Variant color
        #[arg(short, long)]
        color: Option<String>,

        /// Known stock for this product/size
        #[arg(long, allow_negative_numbers = true)]
        stock: Option<i32>,

        /// Product image URL
        #[arg(long)]
        image: Option<String>,

        /// Units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Remove a line
    Remove {
        #[arg(short, long)]
        product: i64,

        #[arg(short, long)]
        size: Option<String>,
    },
    /// Set a line's quantity (0 or less removes it)
    Update {
        #[arg(short, long)]
        product: i64,

        #[arg(short, long)]
        size: Option<String>,

        #[arg(short, long, allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Empty the cart
    Clear,
    /// Reconcile with the remote cart
    Sync,
    /// Print sync status and unconfirmed edits
    Status,
    /// Forget the cart after a completed checkout
    CheckoutDone,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Warnings and errors become Sentry events; info and debug become breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "d4k_cart=info,d4k_cart_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match CartConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let sentry_guard = init_sentry(&config);
    init_tracing();

    let code = match run(cli, &config).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("Command failed: {e}");
            1
        }
    };

    // Flush pending Sentry events before exiting.
    drop(sentry_guard);
    std::process::exit(code);
}

async fn run(cli: Cli, config: &CartConfig) -> Result<(), CliError> {
    let service = CartService::from_config(config)?;
    let json = cli.json;

    match cli.command {
        Commands::Show => commands::cart::show(&service, json)?,
        Commands::Add {
            product,
            name,
            price,
            size,
            color,
            stock,
            image,
            quantity,
        } => {
            let item = commands::cart::catalog_item(
                product,
                name,
                &price,
                size,
                color,
                stock,
                image,
            )?;
            let update = service.add_item(item, quantity).await;
            commands::cart::print_update(&update, json)?;
        }
        Commands::Remove { product, size } => {
            let update = service.remove_item(&commands::cart::key(product, size)).await;
            commands::cart::print_update(&update, json)?;
        }
        Commands::Update {
            product,
            size,
            quantity,
        } => {
            let update = service
                .update_quantity(&commands::cart::key(product, size), quantity)
                .await;
            commands::cart::print_update(&update, json)?;
        }
        Commands::Clear => {
            let update = service.clear().await;
            commands::cart::print_update(&update, json)?;
        }
        Commands::Sync => commands::sync::sync(&service, json).await?,
        Commands::Status => commands::sync::status(&service, json)?,
        Commands::CheckoutDone => {
            service.complete_checkout();
            tracing::info!("Cart discarded after checkout");
        }
    }
    Ok(())
}
