//! WalletVault command-line host
//!
//! Opens the card database, runs the key migration sweep, then performs one
//! card action.

mod commands;
mod file_keystore;

use clap::{Parser, Subcommand};
use commands::{CardEdit, Vault};
use std::path::PathBuf;
use walletvault_storage::{config, CardInfo, VaultConfig};

#[derive(Parser)]
#[command(name = "walletvault")]
#[command(about = "Encrypted payment card vault", long_about = None)]
struct Cli {
    /// Config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file; overrides the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a card
    Add {
        /// Card name
        #[arg(short, long)]
        name: String,

        /// Card number
        #[arg(long)]
        number: String,

        /// Expiry date (MM/yy)
        #[arg(short, long)]
        expiry: String,

        /// CVV / CID
        #[arg(short, long)]
        cvv: String,

        /// PIN
        #[arg(short, long, default_value = "")]
        pin: String,

        /// Mark as favorite
        #[arg(short, long)]
        favorite: bool,
    },

    /// Edit a card
    Edit {
        /// Card ID
        id: i64,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        number: Option<String>,

        #[arg(short, long)]
        expiry: Option<String>,

        #[arg(short, long)]
        cvv: Option<String>,

        #[arg(short, long)]
        pin: Option<String>,
    },

    /// List cards
    List,

    /// Show one card
    Show {
        /// Card ID
        id: i64,

        /// Print number, CVV and PIN in full
        #[arg(long)]
        reveal: bool,
    },

    /// Remove one or more cards
    Remove {
        /// Card IDs
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Mark or unmark a card as favorite
    Favorite {
        /// Card ID
        id: i64,

        /// Unmark instead
        #[arg(long)]
        off: bool,
    },

    /// Print a share code for a card
    Share {
        /// Card ID
        id: i64,

        /// Print readable text instead of a code
        #[arg(long)]
        text: bool,
    },

    /// Import a card from a share code
    Import {
        /// Share code
        code: String,
    },

    /// Run the key migration sweep and print its report
    Migrate,

    /// Show where the encryption key comes from
    KeyStatus,

    /// Delete the encryption key and all cards
    ResetKey {
        /// Confirm
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let vault_config = VaultConfig::load(&config_path)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&vault_config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| vault_config.resolved_database_path());
    tracing::debug!("Using database {}", db_path.display());

    let mut vault = Vault::open(vault_config, &db_path)?;

    // `migrate` reports its own sweep
    if !matches!(cli.command, Commands::Migrate) {
        vault.migrate_on_start();
    }

    match cli.command {
        Commands::Add {
            name,
            number,
            expiry,
            cvv,
            pin,
            favorite,
        } => {
            vault.add(CardInfo::new(name, number, expiry, cvv, pin).with_favorited(favorite))?;
        }
        Commands::Edit {
            id,
            name,
            number,
            expiry,
            cvv,
            pin,
        } => {
            vault.edit(
                id,
                CardEdit {
                    name,
                    number,
                    expiry,
                    cvv,
                    pin,
                },
            )?;
        }
        Commands::List => vault.list()?,
        Commands::Show { id, reveal } => vault.show(id, reveal)?,
        Commands::Remove { ids } => vault.remove(&ids)?,
        Commands::Favorite { id, off } => vault.favorite(id, !off)?,
        Commands::Share { id, text } => vault.share(id, text)?,
        Commands::Import { code } => vault.import(&code)?,
        Commands::Migrate => {
            let report = vault.migrate()?;
            Vault::print_report(&report);
        }
        Commands::KeyStatus => vault.key_status()?,
        Commands::ResetKey { yes } => vault.reset_key(yes)?,
    }

    Ok(())
}
