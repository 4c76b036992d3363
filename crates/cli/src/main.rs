//! Amor Chai CLI - shop from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Check whether an address can be delivered to
//! amor zone postal 63701
//! amor zone coords 37.31 -89.52
//!
//! # Manage the cart (kept in $AMOR_DATA_DIR, mirrored to Supabase when signed in)
//! amor cart add classic-chai --name "Classic Chai" --price 4.99 --image /classic.png
//! amor cart show
//!
//! # Sign in and check out
//! amor auth sign-in -e me@example.com -p secret
//! amor checkout --postal-code 63701 --lat 37.31 --lng -89.52
//! amor payment status pi_123_secret_456
//! ```
//!
//! # Commands
//!
//! - `zone` - Evaluate the delivery-zone gates offline
//! - `cart` - Show and edit the cart
//! - `auth` - Sign in, sign out, show the current user
//! - `checkout` - Verify the delivery zone and initialize payment
//! - `payment status` - Outcome of a payment after the redirect

#![cfg_attr(not(test), forbid(unsafe_code))]

use amor_chai_storefront::config::ClientConfig;
use amor_chai_storefront::context::ClientContext;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "amor")]
#[command(author, version, about = "Amor Chai storefront client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the delivery-zone gates without contacting the server
    Zone {
        #[command(subcommand)]
        check: ZoneCheck,
    },
    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands that run against a client session.
#[derive(Subcommand)]
enum SessionCommand {
    /// Show and edit the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Manage the signed-in session
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// Verify the delivery zone and initialize payment
    Checkout {
        /// Postal code of the delivery address
        #[arg(long)]
        postal_code: String,

        /// Latitude of the delivery address
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude of the delivery address
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
    },
    /// Look up payments
    Payment {
        #[command(subcommand)]
        action: PaymentAction,
    },
}

#[derive(Subcommand)]
enum ZoneCheck {
    /// Check a postal code against the allowlist
    Postal { code: String },
    /// Check a coordinate against the delivery radius
    Coords {
        #[arg(allow_hyphen_values = true)]
        lat: f64,
        #[arg(allow_hyphen_values = true)]
        lng: f64,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// List cart lines and totals
    Show,
    /// Add one unit of a product
    Add {
        /// Product id
        id: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Unit price in USD
        #[arg(long)]
        price: Decimal,

        /// Image URI
        #[arg(long, default_value = "")]
        image: String,
    },
    /// Remove one unit of a product
    Remove { id: String },
    /// Set the quantity of a line (at least 1)
    SetQty { id: String, qty: u32 },
    /// Empty the cart
    Clear,
}

#[derive(Subcommand)]
enum AuthAction {
    /// Sign in with email and password
    SignIn {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },
    /// Sign out and clear local session data
    SignOut,
    /// Show the signed-in user
    Whoami,
}

#[derive(Subcommand)]
enum PaymentAction {
    /// Outcome of a payment, by client secret
    Status { client_secret: String },
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "amor_chai_storefront=warn".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Zone { check } => {
            match check {
                ZoneCheck::Postal { code } => commands::zone::postal(&code),
                ZoneCheck::Coords { lat, lng } => commands::zone::coords(lat, lng),
            }
            Ok(())
        }
        Commands::Session(command) => {
            let config = ClientConfig::from_env()?;
            let context = ClientContext::from_config(&config)?;
            context.start().await;

            let result = dispatch(&context, command).await;
            context.shutdown().await;
            result
        }
    }
}

async fn dispatch(context: &ClientContext, command: SessionCommand) -> Result<(), CliError> {
    match command {
        SessionCommand::Cart { action } => {
            match action {
                CartAction::Show => {}
                CartAction::Add {
                    id,
                    name,
                    price,
                    image,
                } => commands::cart::add(context, id, name, price, image),
                CartAction::Remove { id } => commands::cart::remove(context, &id)?,
                CartAction::SetQty { id, qty } => commands::cart::set_qty(context, &id, qty)?,
                CartAction::Clear => commands::cart::clear(context),
            }
            commands::cart::show(context);
            Ok(())
        }
        SessionCommand::Auth { action } => match action {
            AuthAction::SignIn { email, password } => {
                commands::auth::sign_in(context, &email, &password).await
            }
            AuthAction::SignOut => {
                commands::auth::sign_out(context).await;
                Ok(())
            }
            AuthAction::Whoami => {
                commands::auth::whoami(context);
                Ok(())
            }
        },
        SessionCommand::Checkout {
            postal_code,
            lat,
            lng,
        } => commands::checkout::run(context, postal_code, lat, lng).await,
        SessionCommand::Payment {
            action: PaymentAction::Status { client_secret },
        } => {
            commands::payment::status(context, &client_secret).await;
            Ok(())
        }
    }
}
