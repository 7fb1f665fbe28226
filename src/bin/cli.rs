//! Redwire CLI Client
//!
//! Command-line interface for talking to a RESP server.

use std::process;

use clap::{Parser, Subcommand};
use crossbeam::channel;
use redwire::{Client, Command, Config, Message, ProtocolVersion, Reply};
use tracing_subscriber::{fmt, EnvFilter};

/// Redwire CLI
#[derive(Parser, Debug)]
#[command(name = "redwire-cli")]
#[command(about = "CLI for RESP servers")]
#[command(version)]
struct Args {
    /// Connection URL (redis://[user[:password]@]host[:port][/db]); overrides the flags below
    #[arg(short, long)]
    url: Option<String>,

    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "6379")]
    port: u16,

    /// Password sent with AUTH / HELLO
    #[arg(short = 'a', long)]
    password: Option<String>,

    /// Database index to SELECT after connecting
    #[arg(short = 'n', long, default_value = "0")]
    db: u32,

    /// Negotiate protocol 3 with HELLO
    #[arg(long)]
    resp3: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one command and print the reply
    Exec {
        /// Command name followed by its arguments
        #[arg(required = true, num_args = 1..)]
        args: Vec<String>,
    },

    /// Subscribe to channels and print messages until interrupted
    Subscribe {
        #[arg(required = true, num_args = 1..)]
        channels: Vec<String>,
    },

    /// Subscribe to patterns and print messages until interrupted
    Psubscribe {
        #[arg(required = true, num_args = 1..)]
        patterns: Vec<String>,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,redwire=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid connection settings: {}", e);
            process::exit(2);
        }
    };

    let client = match Client::open(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Could not connect: {}", e);
            process::exit(1);
        }
    };

    let outcome = match &args.command {
        Commands::Exec { args } => exec(&client, args),
        Commands::Subscribe { channels } => listen(&client, channels, false),
        Commands::Psubscribe { patterns } => listen(&client, patterns, true),
    };

    client.close();
    if let Err(e) = outcome {
        eprintln!("(error) {}", e);
        process::exit(1);
    }
}

fn build_config(args: &Args) -> redwire::Result<Config> {
    if let Some(url) = &args.url {
        return Config::from_url(url);
    }

    let mut builder = Config::builder()
        .host(&args.host)
        .port(args.port)
        .database(args.db);
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }
    if args.resp3 {
        builder = builder.protocol(ProtocolVersion::Resp3);
    }
    Ok(builder.build())
}

fn exec(client: &Client, args: &[String]) -> redwire::Result<()> {
    let reply = client.dispatch(&Command::from_args(args))?;
    print_reply(&reply, 0);
    Ok(())
}

fn listen(client: &Client, names: &[String], patterns: bool) -> redwire::Result<()> {
    let (tx, rx) = channel::unbounded::<Message>();
    let forward = move |message: &Message| {
        let _ = tx.send(message.clone());
    };

    if patterns {
        client.psubscribe(names, forward)?;
    } else {
        client.subscribe(names, forward)?;
    }
    println!("Listening on {} subscription(s), Ctrl-C to quit", names.len());

    // The channel closes once the router drops the listener
    for message in rx {
        match &message.pattern {
            Some(pattern) => println!(
                "[{} via {}] {}",
                String::from_utf8_lossy(&message.channel),
                String::from_utf8_lossy(pattern),
                String::from_utf8_lossy(&message.payload)
            ),
            None => println!(
                "[{}] {}",
                String::from_utf8_lossy(&message.channel),
                String::from_utf8_lossy(&message.payload)
            ),
        }
    }

    if client.is_closed() {
        return Err(redwire::RedwireError::Closed);
    }
    Ok(())
}

fn print_reply(reply: &Reply, depth: usize) {
    let indent = "   ".repeat(depth);
    match reply {
        Reply::Status(s) => println!("{}{}", indent, s),
        Reply::Error(e) => println!("{}(error) {}", indent, e),
        Reply::Integer(n) => println!("{}(integer) {}", indent, n),
        Reply::Bulk(b) => println!("{}\"{}\"", indent, String::from_utf8_lossy(b)),
        Reply::Nil => println!("{}(nil)", indent),
        Reply::Array(items) if items.is_empty() => println!("{}(empty array)", indent),
        Reply::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                println!("{}{})", indent, i + 1);
                print_reply(item, depth + 1);
            }
        }
    }
}
