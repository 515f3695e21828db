use chunkswarm::config::Config;
use chunkswarm::error::ChunkSwarmError;
use chunkswarm::leecher::CancellationToken;
use chunkswarm::peer::Peer;
use chunkswarm::tracker::TrackerServer;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the registry: accepts REGISTER/KEEPALIVE/REQUEST/GET_COUNT over UDP.
    Tracker,
    /// Host a local file and serve chunk requests until killed.
    Seed {
        #[clap(long, help = "name to register the file under")]
        name: String,
        #[clap(long, help = "path to the file to host")]
        file: PathBuf,
    },
    /// Download a file registered with the tracker, then keep seeding it.
    Leech {
        #[clap(long, help = "name the file is registered under")]
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(2);
        }
    };

    let result = match cli.role {
        Role::Tracker => run_tracker(&config),
        Role::Seed { name, file } => run_seed(&config, name, &file),
        Role::Leech { name } => run_leech(&config, &name),
    };

    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(exit_code_for(&err));
    }
}

fn run_tracker(config: &Config) -> Result<(), ChunkSwarmError> {
    let server = TrackerServer::start(config.tracker_addr, config.liveness_timeout, config.reap_interval)?;
    println!("tracker listening on {}", server.local_addr());
    park_forever();
}

fn run_seed(config: &Config, name: String, file: &PathBuf) -> Result<(), ChunkSwarmError> {
    let peer = Peer::new(config.clone());
    peer.seed_file(name.clone(), file)?;
    println!(
        "seeding {name:?} on {}",
        peer.local_seeder_addr().expect("seed_file started the acceptor")
    );
    park_forever();
}

fn run_leech(config: &Config, name: &str) -> Result<(), ChunkSwarmError> {
    let peer = Peer::new(config.clone());
    let cancel = CancellationToken::new();
    let (path, progress) = peer.download(name, &cancel)?;
    println!(
        "downloaded {name:?} to {} ({}/{} chunks)",
        path.display(),
        progress.completed(),
        progress.total()
    );
    park_forever();
}

/// Tracker and seed-promoted processes have nothing more to do on the main
/// thread; the background threads started by `TrackerServer`/`SeederServer`
/// do the work. Never returns (diverges with `!`), so callers can treat it
/// as terminating the `Result` chain.
fn park_forever() -> ! {
    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}

fn exit_code_for(err: &ChunkSwarmError) -> i32 {
    match err {
        ChunkSwarmError::Config(_) => 2,
        ChunkSwarmError::ConnectFailed(_, _) | ChunkSwarmError::ReadTimeout(_) => 3,
        ChunkSwarmError::NoSeeders(_) => 4,
        ChunkSwarmError::ChunkHashMismatch { .. }
        | ChunkSwarmError::FileHashMismatch { .. }
        | ChunkSwarmError::FailedChunk(_)
        | ChunkSwarmError::FailedFile(_) => 5,
        ChunkSwarmError::Cancelled => 130,
        _ => 1,
    }
}
