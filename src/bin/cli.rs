//! everdb CLI
//!
//! Command-line interface for inspecting a database file and editing
//! string-to-string hashes stored in it.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use everdb::{Config, Database, DbError, Hash};
use tracing_subscriber::{fmt, EnvFilter};

/// everdb CLI
#[derive(Parser, Debug)]
#[command(name = "everdb-cli")]
#[command(about = "CLI for everdb block storage files")]
#[command(version)]
struct Args {
    /// Database file
    #[arg(short, long, default_value = "./everdb.dat")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show block and free-list counts
    Info,

    /// Create an empty hash and print its root block
    HashNew,

    /// Get a value by key
    Get {
        /// Root block of the hash
        #[arg(short, long)]
        root: u32,

        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// Root block of the hash
        #[arg(short, long)]
        root: u32,

        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// Root block of the hash
        #[arg(short, long)]
        root: u32,

        /// The key to delete
        key: String,
    },
}

type StringHash = Hash<String, String>;

fn run(args: Args) -> everdb::Result<()> {
    let readonly = matches!(args.command, Commands::Info | Commands::Get { .. });
    let config = Config::builder().path(&args.db).readonly(readonly).build();
    let mut db = Database::open(config)?;

    match args.command {
        Commands::Info => {
            println!("blocks: {}", db.block_count());
            println!("free:   {}", db.free_count());
        }
        Commands::HashNew => {
            let hash: StringHash = db.hash()?;
            println!("{}", hash.root());
        }
        Commands::Get { root, key } => {
            let mut hash = StringHash::load(&db, root)?;
            match hash.get(&db, &key) {
                Ok(value) => println!("{}", value),
                Err(DbError::KeyNotFound) => println!("(nil)"),
                Err(e) => return Err(e),
            }
        }
        Commands::Set { root, key, value } => {
            let mut hash = StringHash::load(&db, root)?;
            hash.set(&mut db, key, value)?;
            println!("OK");
        }
        Commands::Del { root, key } => {
            let mut hash = StringHash::load(&db, root)?;
            match hash.delete(&mut db, &key) {
                Ok(()) => println!("1"),
                Err(DbError::KeyNotFound) => println!("0"),
                Err(e) => return Err(e),
            }
        }
    }

    db.close()
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,everdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("everdb CLI v{}", everdb::VERSION);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
