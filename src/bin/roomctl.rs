//! roomctl - operator command line for a room allocation server
//!
//! Run with: cargo run --bin roomctl -- --api-url http://host/api/spec rooms --building H7

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use roomsync::allocation::{AllocationTransaction, Selection, TransactionError};
use roomsync::flow::{load_location, ClaimantMirror};
use roomsync::network::http::ReqwestTransport;
use roomsync::network::{HypermediaClient, Link, Method, Session};
use roomsync::occupancy;
use roomsync::types::{ClaimantDemand, RoomId, Sex};
use roomsync::{EngineConfig, ResourceMirror};

#[derive(Debug, Parser)]
#[command(name = "roomctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capability manifest URL. Overrides the configuration file.
    #[arg(long, env = "ROOMSYNC_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the relations in the capability manifest.
    Manifest,
    /// Load a building and show every room.
    Rooms {
        /// Manifest relation or href of the building.
        #[arg(long)]
        building: String,
        /// Classify rooms from this claimant's point of view.
        #[arg(long)]
        claimant: Option<String>,
    },
    /// Allot rooms to a claimant arrival in one batch.
    Allot {
        #[arg(long)]
        building: String,
        /// Href of the claimant arrival.
        #[arg(long)]
        claimant_link: String,
        /// Room id, optionally with a partial size: `12` or `12:2`.
        #[arg(long = "room", required = true)]
        rooms: Vec<String>,
        /// Check the request against this part of the demand.
        #[arg(long)]
        sex: Option<SexArg>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SexArg {
    Male,
    Female,
}

impl From<SexArg> for Sex {
    fn from(arg: SexArg) -> Self {
        match arg {
            SexArg::Male => Sex::Male,
            SexArg::Female => Sex::Female,
        }
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .with_env_overrides();
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    Ok(config)
}

/// A manifest relation if the session has it, otherwise a plain href.
fn building_link(session: &Session, building: &str) -> Link {
    session
        .lookup(building)
        .unwrap_or_else(|| Link::new("self", building, Method::Get))
}

fn parse_room(spec: &str) -> Result<(RoomId, Option<String>)> {
    let (id, partial) = match spec.split_once(':') {
        Some((id, partial)) => (id, Some(partial.to_string())),
        None => (spec, None),
    };
    let id = id
        .trim()
        .parse()
        .with_context(|| format!("invalid room id '{}'", spec))?;
    Ok((id, partial))
}

async fn open_session(client: &HypermediaClient) -> Result<Arc<Session>> {
    let session = Session::empty();
    client
        .refresh_session(&session)
        .await
        .context("fetching capability manifest")?;
    Ok(session)
}

async fn connect(config: &EngineConfig) -> Result<(HypermediaClient, Arc<Session>)> {
    let transport = ReqwestTransport::new(config)?;
    let client = HypermediaClient::new(Arc::new(transport), config.api_url.clone());
    let session = open_session(&client).await?;
    Ok((client, session))
}

/// One line per relation in the session's manifest.
fn manifest_lines(session: &Session) -> Vec<String> {
    session
        .manifest()
        .links()
        .iter()
        .map(|link| format!("{:<28} {:<7} {}", link.rel, link.method, link.href))
        .collect()
}

async fn rooms(config: &EngineConfig, building: &str, claimant: Option<&str>) -> Result<()> {
    let (client, session) = connect(config).await?;
    let mirror = ResourceMirror::new();
    load_location(&client, &building_link(&session, building), &mirror).await?;

    println!("{} ({})", mirror.full_name(), mirror.location().unwrap_or_default());
    for room in mirror.rooms() {
        println!(
            "  {:>8}  {:<20} free {:>3}/{:<3} {}",
            room.room_id,
            room.room_name,
            occupancy::free_capacity(&room),
            room.capacity,
            occupancy::classify(&room, claimant, false)
        );
    }
    let summary = mirror.summary();
    println!(
        "rooms: {} empty, {} partial, {} filled, {} not ready",
        summary.rooms_empty, summary.rooms_partial, summary.rooms_filled, summary.rooms_not_ready
    );
    println!(
        "places: {} free, {} taken, {} not ready",
        summary.capacity_empty, summary.capacity_filled, summary.capacity_not_ready
    );
    Ok(())
}

async fn allot(
    config: &EngineConfig,
    building: &str,
    claimant_link: &str,
    room_specs: &[String],
    sex: Option<Sex>,
) -> Result<()> {
    let (client, session) = connect(config).await?;
    let mirror = Arc::new(ResourceMirror::new());
    load_location(&client, &building_link(&session, building), &mirror).await?;

    let demand: ClaimantDemand = client
        .invoke(&Link::new("self", claimant_link, Method::Get))
        .await
        .context("fetching claimant")?;
    let claimant = Arc::new(ClaimantMirror::new(client.clone(), demand));

    let mut selection = Selection::new();
    for spec in room_specs {
        let (id, partial) = parse_room(spec)?;
        selection.select(id);
        if partial.is_some() {
            selection.set_partial(id, true, partial.as_deref());
        }
    }

    let mut transaction = AllocationTransaction::new(client, mirror).with_claimant(claimant);
    if let Some(sex) = sex {
        transaction = transaction.with_sex(sex);
    }

    match transaction.submit(&selection).await {
        Ok(committed) => {
            println!("Allotted rooms {:?}", committed.rooms);
            if let Some(demand) = committed.claimant {
                println!(
                    "Remaining: {} male, {} female",
                    demand.remaining(Sex::Male),
                    demand.remaining(Sex::Female)
                );
            }
            Ok(())
        }
        Err(TransactionError::Invalid(errors)) => {
            for error in &errors {
                eprintln!("{}", error);
            }
            bail!("{} problem(s) with the selection", errors.len())
        }
        Err(TransactionError::Rejected { message }) => bail!("{}", message),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    log::debug!("Using manifest at {}", config.api_url);

    match &cli.command {
        Commands::Manifest => {
            let (_, session) = connect(&config).await?;
            for line in manifest_lines(&session) {
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Rooms { building, claimant } => {
            rooms(&config, building, claimant.as_deref()).await
        }
        Commands::Allot {
            building,
            claimant_link,
            rooms,
            sex,
        } => allot(&config, building, claimant_link, rooms, sex.map(Sex::from)).await,
    }
}
