use std::path::Path;
use std::sync::Arc;

use beetree::codec::Utf8;
use beetree::config::TreeConfig;
use beetree::storage::FileLog;
use beetree::{Bee, HistoryOptions, ReadOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: beetree <log-file> <command>

commands:
  get <key>
  put <key> <value>
  del <key>
  scan [<from> [<to>]]      keys in from..to, both optional
  history [reverse]
  header";

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beetree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((path, command)) = args.split_first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    // Load configuration from environment variables
    let config = match TreeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let db = match open(Path::new(path), &config) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open {path}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&db, command) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn open(path: &Path, config: &TreeConfig) -> Result<Bee<Utf8, Utf8>, Box<dyn std::error::Error>> {
    let log = FileLog::open(path)?;
    Ok(Bee::with_codecs(Arc::new(log), config, Utf8, Utf8)?)
}

fn run(db: &Bee<Utf8, Utf8>, command: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<&str> = command.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["get", key] => match db.get(key)? {
            Some(entry) => println!("{}", entry.value),
            None => println!("(not found)"),
        },
        ["put", key, value] => {
            db.put(key, value)?;
            println!("version {}", db.version()?);
        }
        ["del", key] => {
            db.del(key)?;
            println!("version {}", db.version()?);
        }
        ["scan", bounds @ ..] if bounds.len() <= 2 => {
            let mut options = ReadOptions::<str>::new();
            if let Some(from) = bounds.first() {
                options = options.gte(*from);
            }
            if let Some(to) = bounds.get(1) {
                options = options.lt(*to);
            }
            for entry in db.read_stream(&options) {
                let entry = entry?;
                println!("{}\t{}", entry.key, entry.value);
            }
        }
        ["history", rest @ ..] if rest.is_empty() || rest == ["reverse"] => {
            let options = HistoryOptions::new().reverse(!rest.is_empty());
            for entry in db.history_stream(options) {
                let entry = entry?;
                match entry.value {
                    Some(value) => println!("{}\tput\t{}\t{}", entry.version, entry.key, value),
                    None => println!("{}\tdel\t{}", entry.version, entry.key),
                }
            }
        }
        ["header"] => match db.header()? {
            Some(header) => println!(
                "protocol {}\nformat {}\norder {}\nkeys {}\nvalues {}\nkey order {}",
                header.protocol,
                header.format,
                header.order,
                header.key_codec,
                header.value_codec,
                header.key_order
            ),
            None => println!("(empty log)"),
        },
        _ => return Err(USAGE.into()),
    }
    Ok(())
}
