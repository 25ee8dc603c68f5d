use std::{error::Error, path::PathBuf};

use clap::{Parser, Subcommand};
use cqlbridge::{Client, ClientConfig, RawOptions, SchemaCatalog};
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a JSON client configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Keyspace to use, overriding the configuration
    #[arg(short, long)]
    keyspace: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the key sets derived for every table
    Describe,
    /// Run a raw statement and print the rows as JSON
    Query {
        statement: String,
        #[arg(short, long)]
        limit: Option<i32>,
    },
}

fn describe(catalog: &SchemaCatalog) {
    for (table, keys) in catalog.tables() {
        println!("{table}");
        println!("  primary: ({})", keys.primary_keys.join(", "));
        for index in &keys.index_keys {
            println!("  index:   ({})", index.join(", "));
        }
    }
}

async fn run(client: &Client, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Describe => {
            let catalog = client.ready().await?;
            describe(&catalog);
        }
        Command::Query { statement, limit } => {
            client.connect().await?;
            let options = RawOptions {
                limit,
                ..Default::default()
            };
            match client.execute(statement, vec![], options).await? {
                Some(rows) => println!("{}", serde_json::to_string_pretty(&rows)?),
                None => eprintln!("no reply within {:?}", client.config().request_timeout),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(keyspace) = cli.keyspace {
        config.keyspace = keyspace;
    }
    config.validate()?;

    let (stop, mut stopped) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop.send(true);
    })?;

    let client = Client::new(config);
    let result = tokio::select! {
        result = run(&client, cli.command) => result,
        _ = stopped.wait_for(|stop| *stop) => {
            eprintln!("interrupted");
            Ok(())
        }
    };

    client.close().await;
    result
}
