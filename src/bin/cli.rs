//! docwire CLI Client
//!
//! Command-line interface for talking to a docwire server.

use bson::{Bson, Document};
use clap::{Parser, Subcommand};
use docwire::{ClientConfig, Database, DocwireError, FindOptions, SortSpec};
use tracing_subscriber::{fmt, EnvFilter};

/// docwire CLI
#[derive(Parser, Debug)]
#[command(name = "docwire-cli")]
#[command(about = "CLI for docwire document servers")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:27017")]
    server: String,

    /// Database name
    #[arg(short, long, default_value = "test")]
    database: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the server
    Ping,

    /// Query a collection
    Find {
        collection: String,

        /// Filter as JSON
        #[arg(default_value = "{}")]
        filter: String,

        /// Sort as JSON, e.g. '[["a", -1]]' or '["b", "a"]'
        #[arg(long)]
        sort: Option<String>,

        #[arg(long)]
        limit: Option<u64>,

        #[arg(long)]
        skip: Option<u64>,
    },

    /// Count matching documents
    Count {
        collection: String,

        /// Filter as JSON
        #[arg(default_value = "{}")]
        filter: String,
    },

    /// Insert one document (JSON object) or many (JSON array)
    Insert { collection: String, documents: String },

    /// Run an aggregation pipeline (JSON array of stages)
    Aggregate { collection: String, pipeline: String },
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("(error) {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> docwire::Result<()> {
    let config = ClientConfig::builder()
        .endpoint(&args.server)
        .database(&args.database)
        .connect_attempts(1)
        .build();
    let db = Database::connect(config).await?;

    match args.command {
        Commands::Ping => {
            db.ping().await?;
            println!("PONG");
        }
        Commands::Find {
            collection,
            filter,
            sort,
            limit,
            skip,
        } => {
            let sort = match sort {
                Some(sort) => Some(SortSpec::from_bson(&parse_json(&sort)?)?),
                None => None,
            };
            let options = FindOptions {
                sort,
                limit,
                skip,
                ..FindOptions::default()
            };
            let mut cursor = db.collection(collection).find(parse_document(&filter)?, options);
            while let Some(document) = cursor.next().await? {
                print_document(document);
            }
        }
        Commands::Count { collection, filter } => {
            let n = db.collection(collection).count(parse_document(&filter)?).await?;
            println!("{}", n);
        }
        Commands::Insert {
            collection,
            documents,
        } => {
            let documents = match parse_json(&documents)? {
                Bson::Document(document) => vec![document],
                Bson::Array(items) => documents_of(items)?,
                other => return Err(invalid(format!("expected object or array, got {}", other))),
            };
            let outcome = db.collection(collection).insert_many(documents).await?;
            println!("(integer) {}", outcome.n);
        }
        Commands::Aggregate {
            collection,
            pipeline,
        } => {
            let stages = match parse_json(&pipeline)? {
                Bson::Array(items) => documents_of(items)?,
                other => return Err(invalid(format!("expected array of stages, got {}", other))),
            };
            let mut cursor = db.collection(collection).aggregate(stages, Default::default());
            for document in cursor.to_array().await? {
                print_document(document);
            }
        }
    }

    db.close().await;
    Ok(())
}

fn parse_json(text: &str) -> docwire::Result<Bson> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| invalid(format!("bad JSON: {}", e)))?;
    Bson::try_from(value).map_err(|e| invalid(format!("bad extended JSON: {}", e)))
}

fn parse_document(text: &str) -> docwire::Result<Document> {
    match parse_json(text)? {
        Bson::Document(document) => Ok(document),
        other => Err(invalid(format!("expected a JSON object, got {}", other))),
    }
}

fn documents_of(items: Vec<Bson>) -> docwire::Result<Vec<Document>> {
    items
        .into_iter()
        .map(|item| match item {
            Bson::Document(document) => Ok(document),
            other => Err(invalid(format!("expected a JSON object, got {}", other))),
        })
        .collect()
}

fn print_document(document: Document) {
    let json = Bson::Document(document).into_relaxed_extjson();
    match serde_json::to_string(&json) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("(error) {}", e),
    }
}

fn invalid(message: String) -> DocwireError {
    DocwireError::Validation(message)
}
