//! Tether CLI
//!
//! Operator-facing tool for pairing two devices through a relay. The
//! requesting side displays a PIN; the responding side asks its operator
//! to type that PIN in, closing the loop that no attacker on the relay can
//! observe.

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tether::link::ChallengeOutcome;
use tether::protocol::{Ability, Capability};
use tether::{Channel, Identity, Requestor, Responder};

/// Tether: PIN-authenticated device pairing over an untrusted relay
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to identity file (default: ~/.tether/identity.key)
    #[arg(short, long)]
    identity: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new long-term identity
    Init {
        /// Force overwrite existing identity
        #[arg(short, long)]
        force: bool,
    },

    /// Display your long-term identifier
    Identity,

    /// Request access from an already-authorized device
    Request {
        /// Relay origin, e.g. ws://127.0.0.1:8787
        #[arg(short, long)]
        relay: String,

        /// Topic both devices rendezvous on
        #[arg(short, long)]
        topic: String,

        /// Requested capabilities as resource=ability pairs
        /// (e.g. account=link/device)
        #[arg(short, long = "cap")]
        caps: Vec<String>,
    },

    /// Answer a pairing request and verify its PIN
    Respond {
        /// Relay origin, e.g. ws://127.0.0.1:8787
        #[arg(short, long)]
        relay: String,

        /// Topic both devices rendezvous on
        #[arg(short, long)]
        topic: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let identity_path = cli.identity.unwrap_or_else(default_identity_path);

    match cli.command {
        Commands::Init { force } => cmd_init(&identity_path, force),
        Commands::Identity => cmd_identity(&identity_path),
        Commands::Request { relay, topic, caps } => {
            cmd_request(&identity_path, &relay, &topic, &caps).await
        }
        Commands::Respond { relay, topic } => cmd_respond(&identity_path, &relay, &topic).await,
    }
}

fn default_identity_path() -> PathBuf {
    dirs::home_dir()
        .expect("Could not find home directory")
        .join(".tether")
        .join("identity.key")
}

fn load_identity(path: &Path) -> Identity {
    let bytes = fs::read(path).unwrap_or_else(|_| {
        eprintln!("Error: No identity found at {path:?}");
        eprintln!("Run 'tether init' to create one.");
        std::process::exit(1);
    });

    Identity::from_bytes(&bytes).unwrap_or_else(|e| {
        eprintln!("Error: Invalid identity file: {e}");
        std::process::exit(1);
    })
}

fn save_identity(identity: &Identity, path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|e| {
            eprintln!("Error creating directory: {e}");
            std::process::exit(1);
        });
    }

    fs::write(path, identity.to_bytes()).unwrap_or_else(|e| {
        eprintln!("Error saving identity: {e}");
        std::process::exit(1);
    });
}

fn cmd_init(path: &Path, force: bool) {
    if path.exists() && !force {
        eprintln!("Identity already exists at {path:?}");
        eprintln!("Use --force to overwrite.");
        std::process::exit(1);
    }

    let identity = Identity::generate();
    save_identity(&identity, path);

    println!("Identity created successfully!");
    println!();
    println!("Your identifier (share this with peers):");
    println!("{}", identity.did());
    println!();
    println!("Identity saved to: {path:?}");
    println!();
    println!("IMPORTANT: Back up your identity file securely!");
}

fn cmd_identity(path: &Path) {
    let identity = load_identity(path);
    println!("{}", identity.did());
}

/// Parse a `resource=ability` capability argument
fn parse_cap(arg: &str) -> Capability {
    match arg.split_once('=') {
        Some((with, can)) => Capability::new(with, Ability::from(can.to_string())),
        None => {
            eprintln!("Error: capability must look like resource=ability, got '{arg}'");
            std::process::exit(1);
        }
    }
}

async fn cmd_request(identity_path: &Path, relay: &str, topic: &str, caps: &[String]) {
    let identity = load_identity(identity_path);
    let caps: Vec<Capability> = if caps.is_empty() {
        vec![Capability::new("account", Ability::LinkDevice)]
    } else {
        caps.iter().map(|c| parse_cap(c)).collect()
    };

    let channel = Channel::open(relay, topic);
    let mut requestor = Requestor::new(channel, identity).unwrap_or_else(|e| {
        eprintln!("Error: could not start pairing: {e}");
        std::process::exit(1);
    });

    println!("Pairing PIN: {}", requestor.pin());
    println!("Read this PIN to the operator of the authorized device.");
    println!();
    println!("Waiting for the authorized device on topic '{topic}'...");

    match requestor.broadcast_intent(caps).await {
        Ok(grant) => {
            println!();
            println!("Authorized by {}", grant.iss);
            for cap in &grant.caps {
                println!("  {} on {}", cap.can.as_str(), cap.with);
            }
        }
        Err(e) => {
            eprintln!("Pairing failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn cmd_respond(identity_path: &Path, relay: &str, topic: &str) {
    let identity = load_identity(identity_path);

    let channel = Channel::open(relay, topic);
    let mut responder = Responder::new(channel, identity).unwrap_or_else(|e| {
        eprintln!("Error: could not start pairing: {e}");
        std::process::exit(1);
    });

    println!("Waiting for a pairing request on topic '{topic}'...");

    if let Err(e) = responder.bootstrap().await {
        eprintln!("Pairing failed: {e}");
        std::process::exit(1);
    }

    println!();
    println!(
        "Request from {}",
        responder.claimant_did().unwrap_or("<unknown>")
    );
    println!("Requested capabilities:");
    for cap in responder.requested_capabilities() {
        println!("  {} on {}", cap.can.as_str(), cap.with);
    }
    println!();

    loop {
        let pin = prompt("Enter the PIN shown on the requesting device (empty to abort): ");
        if pin.is_empty() {
            eprintln!("Pairing aborted.");
            std::process::exit(1);
        }

        match responder.challenge(&pin) {
            Ok(ChallengeOutcome::Verified) => {
                println!("PIN verified. Devices are linked.");
                break;
            }
            Ok(ChallengeOutcome::Rejected) => {
                eprintln!("That PIN did not verify. Check it and try again.");
            }
            Err(e) => {
                eprintln!("Pairing failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn prompt(message: &str) -> String {
    print!("{message}");
    io::stdout().flush().ok();

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return String::new();
    }
    line.trim().to_string()
}
