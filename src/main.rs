//! Patio Radar - parking-yard console client
//!
//! Plate capture through a phone hand-off or local OCR, and a live
//! occupancy board for the yard's parking slots.

mod api;
mod config;
mod radar;
mod storage;
mod vagas;
mod vision;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::api::{ApiClient, PageRequest, ParkRequest, Resource, SlotMapSource};
use crate::config::AppConfig;
use crate::radar::{render_qr, Handoff, MobileUploader, PollOutcome, RadarScanner};
use crate::vagas::{GridWatcher, OccupancyGrid};
use crate::vision::TesseractCli;

/// Patio Radar - parking-yard console client
#[derive(Parser, Debug)]
#[command(name = "patio-radar")]
#[command(about = "Plate capture and live slot occupancy for the parking yard")]
struct Args {
    /// Backend base URL (overrides config file and environment)
    #[arg(long, global = true)]
    api: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a phone hand-off and wait for the recognized plate.
    /// Type `r` for a new QR code, `q` to give up.
    Scan {
        /// Park the plate in the first free box once recognized
        #[arg(long)]
        park: bool,
    },
    /// Upload an image to an OCR session (phone side of the hand-off)
    Upload {
        session_id: String,
        image: PathBuf,
    },
    /// Recognize a plate locally with tesseract
    Recognize {
        image: PathBuf,
        /// Park the plate in the first free box once recognized
        #[arg(long)]
        park: bool,
    },
    /// Watch the occupancy map. Type `release <id|name>` to free a box, `q` to quit.
    Map {
        /// Box id, box name or plate to highlight
        #[arg(long)]
        highlight: Option<String>,
        /// Print one snapshot and exit
        #[arg(long)]
        once: bool,
    },
    /// Free a box
    Release { box_id: i64 },
    /// Park a plate, in a given box or the first free one
    Park {
        plate: String,
        #[arg(long)]
        box_id: Option<i64>,
    },
    /// Find the box holding a plate
    Locate { plate: String },
    /// Entity maintenance (clientes, veiculos, patios, boxes, zonas)
    Crud {
        #[arg(value_enum)]
        resource: Resource,
        #[command(subcommand)]
        action: CrudAction,
    },
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CrudAction {
    /// Filtered, paginated listing
    List {
        /// Filter as key=value, repeatable
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        #[arg(long, default_value = "0")]
        page: u32,
        #[arg(long, default_value = "10")]
        size: u32,
        /// Sort as field,direction
        #[arg(long)]
        sort: Option<String>,
    },
    Get { id: i64 },
    /// Create from a JSON file
    Create { file: PathBuf },
    /// Replace from a JSON file
    Update { id: i64, file: PathBuf },
    Delete { id: i64 },
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    if let Command::InitConfig { force } = args.command {
        return init_config(args.config.as_deref(), force);
    }

    let mut config = load_or_create_config(args.config.as_deref());
    config.apply_env_overrides();
    if let Some(url) = args.api {
        config.api.base_url = url;
    }

    let api = Arc::new(ApiClient::new(&config.api)?);
    info!("Using backend at {}", api.base_url());

    match args.command {
        Command::Scan { park } => run_scan(api, &config, park).await,
        Command::Upload { session_id, image } => run_upload(api, &config, &session_id, &image).await,
        Command::Recognize { image, park } => run_recognize(api, &config, &image, park).await,
        Command::Map { highlight, once } => run_map(api, &config, highlight.as_deref(), once).await,
        Command::Release { box_id } => run_release(&api, box_id).await,
        Command::Park { plate, box_id } => park_plate(&api, &plate, box_id).await,
        Command::Locate { plate } => run_locate(&api, &plate).await,
        Command::Crud { resource, action } => run_crud(&api, resource, action).await,
        Command::InitConfig { .. } => Ok(()),
    }
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => storage::config_file_path().ok(),
    };

    if let Some(path) = path {
        if path.exists() {
            match config::load_config(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    return config;
                }
                Err(e) => warn!("Ignoring unreadable configuration {:?}: {}", path, e),
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn init_config(explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => storage::config_file_path()?,
    };
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }
    config::save_config(&AppConfig::default(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Start (or restart) a hand-off and show it. The receiver yields the outcome.
async fn phone_handoff(
    scanner: &mut RadarScanner,
    restart: bool,
) -> Result<oneshot::Receiver<PollOutcome>> {
    let (tx, rx) = oneshot::channel();
    let on_outcome = move |outcome: PollOutcome| {
        let _ = tx.send(outcome);
    };

    let handoff = if restart {
        scanner.restart(on_outcome).await?
    } else {
        scanner.use_phone(on_outcome).await?
    };
    print_handoff(&handoff);
    Ok(rx)
}

fn print_handoff(handoff: &Handoff) {
    println!("Session {}", handoff.session_id);
    match render_qr(&handoff.upload_url) {
        Ok(qr) => println!("{}", qr),
        Err(e) => warn!("Could not render QR code: {}", e),
    }
    println!("Open on your phone: {}", handoff.upload_url);
    println!("Waiting for the image... (r: new QR code, q or Ctrl-C: cancel)");
}

async fn run_scan(api: Arc<ApiClient>, config: &AppConfig, park: bool) -> Result<()> {
    let mut scanner = RadarScanner::new(api.clone(), &config.radar);
    let mut rx = phone_handoff(&mut scanner, false).await?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let outcome = loop {
        tokio::select! {
            outcome = &mut rx => break outcome.context("Polling ended without a result")?,
            line = input.next_line(), if stdin_open => match line?.as_deref().map(str::trim) {
                None => stdin_open = false,
                Some("r") | Some("restart") => rx = phone_handoff(&mut scanner, true).await?,
                Some("q") | Some("quit") => {
                    scanner.cancel();
                    println!("Cancelled.");
                    return Ok(());
                }
                Some(_) => println!("Commands: r (new QR code), q"),
            },
            _ = tokio::signal::ctrl_c() => {
                if scanner.is_waiting_for_phone() {
                    scanner.cancel();
                }
                println!("Cancelled.");
                return Ok(());
            }
        }
    };

    match outcome {
        PollOutcome::Recognized(plate) => {
            println!("{}", scanner.status().message);
            if park {
                park_plate(&api, &plate, None).await?;
            }
            Ok(())
        }
        PollOutcome::Failed(message) => bail!("Phone error: {}", message),
    }
}

async fn run_upload(
    api: Arc<ApiClient>,
    config: &AppConfig,
    session_id: &str,
    image: &Path,
) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {:?}", image))?;
    let file_name = image.file_name().and_then(|n| n.to_str());

    let uploader = MobileUploader::new(api, config.image.jpeg_quality);
    let ack = uploader.upload(session_id, bytes, file_name).await?;

    match (ack.plate, ack.message) {
        (Some(plate), _) => println!("Photo sent. Plate recognized: {}", plate),
        (None, Some(message)) => println!("Photo sent: {}", message),
        (None, None) => println!("Photo sent. You can close this window."),
    }
    Ok(())
}

async fn run_recognize(api: Arc<ApiClient>, config: &AppConfig, image: &Path, park: bool) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {:?}", image))?;

    let mut scanner = RadarScanner::new(api.clone(), &config.radar);
    let recognizer = TesseractCli::new(config.radar.tesseract_lang.clone());
    let plate = scanner.scan_local(&bytes, &recognizer).await?;
    println!("{}", plate);

    if park {
        park_plate(&api, &plate, None).await?;
    }
    Ok(())
}

async fn run_map(
    api: Arc<ApiClient>,
    config: &AppConfig,
    highlight: Option<&str>,
    once: bool,
) -> Result<()> {
    if once {
        let grid = OccupancyGrid::from_snapshot(&api.fetch_map().await?);
        print!("{}", board_text(&grid, highlight));
        return Ok(());
    }

    let watcher = GridWatcher::spawn(api, config.vagas.poll_interval());
    let mut updates = watcher.subscribe();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let board = updates
                    .borrow_and_update()
                    .as_ref()
                    .map(|grid| board_text(grid, highlight));
                if let Some(board) = board {
                    // Clear screen, cursor home
                    print!("\x1B[2J\x1B[H{}", board);
                    println!("release <id|name> | q");
                    std::io::stdout().flush()?;
                }
            }
            line = input.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("q"), _) | (Some("quit"), _) => break,
                    (Some("release"), Some(key)) | (Some("r"), Some(key)) => {
                        match resolve_box(watcher.latest().as_ref(), key) {
                            Some(id) => {
                                if let Err(e) = watcher.release(id).await {
                                    println!("Release failed: {}", e);
                                }
                            }
                            None => println!("No such box: {}", key),
                        }
                    }
                    (None, _) => {}
                    _ => println!("Commands: release <id|name>, q"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

/// Board plus a summary line. `highlight` may be a box id, a box name or a
/// plate; a plate highlights the box holding it.
fn board_text(grid: &OccupancyGrid, highlight: Option<&str>) -> String {
    let holder = highlight.and_then(|key| grid.find_plate(key));
    let key = holder.map(|slot| slot.id.to_string());
    let mut text = grid.render(key.as_deref().or(highlight));

    text.push_str(&format!("{} free\n", grid.free_count()));
    if let Some(slot) = holder {
        text.push_str(&format!("{} is in {}\n", slot.display_value(), slot.label));
    }
    text
}

/// Box id from a numeric id or a name on the current board
fn resolve_box(grid: Option<&OccupancyGrid>, key: &str) -> Option<i64> {
    key.parse::<i64>()
        .ok()
        .or_else(|| grid.and_then(|g| g.slot(key)).map(|slot| slot.id))
}

async fn run_release(api: &ApiClient, box_id: i64) -> Result<()> {
    api.release_box(box_id).await?;
    let grid = OccupancyGrid::from_snapshot(&api.fetch_map().await?);
    match grid.slot_by_id(box_id) {
        Some(slot) => println!("{}: {}", slot.label, slot.display_value()),
        None => println!("Box {} released", box_id),
    }
    Ok(())
}

async fn park_plate(api: &ApiClient, plate: &str, box_id: Option<i64>) -> Result<()> {
    let response = api.park_plate(&ParkRequest::new(plate, box_id)).await?;
    println!(
        "{} parked in box {}{}",
        response.placa,
        response.box_id,
        response
            .message
            .map(|m| format!(" ({})", m))
            .unwrap_or_default()
    );
    Ok(())
}

async fn run_locate(api: &ApiClient, plate: &str) -> Result<()> {
    let location = api.locate_plate(plate).await?;
    let Some(box_id) = location.box_id.filter(|_| location.found) else {
        println!("Plate {} is not parked in any box.", location.placa);
        return Ok(());
    };

    println!(
        "Plate {} is in box {}",
        location.placa,
        location.box_nome.as_deref().unwrap_or("?")
    );
    let grid = OccupancyGrid::from_snapshot(&api.fetch_map().await?);
    print!("{}", board_text(&grid, Some(&box_id.to_string())));
    Ok(())
}

async fn run_crud(api: &ApiClient, resource: Resource, action: CrudAction) -> Result<()> {
    let output = match action {
        CrudAction::List {
            filters,
            page,
            size,
            sort,
        } => {
            let filter: Map<String, Value> = filters
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let page = PageRequest { page, size, sort };
            let result = api.search(resource, &filter, &page).await?;
            eprintln!(
                "Page {}/{} ({} total)",
                result.number + 1,
                result.total_pages.max(1),
                result.total_elements
            );
            Value::Array(result.content)
        }
        CrudAction::Get { id } => api.get(resource, id).await?,
        CrudAction::Create { file } => api.create(resource, &read_json(&file)?).await?,
        CrudAction::Update { id, file } => api.update(resource, id, &read_json(&file)?).await?,
        CrudAction::Delete { id } => {
            api.delete(resource, id).await?;
            println!("Deleted {} {}", resource.path(), id);
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vagas::grid::tests::{cell, snapshot};

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("placa=ABC1D23").unwrap(),
            ("placa".to_string(), "ABC1D23".to_string())
        );
        assert_eq!(
            parse_key_value("observacao=a=b").unwrap(),
            ("observacao".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_parses_map_flags() {
        let args = Args::try_parse_from(["patio-radar", "map", "--highlight", "A1", "--once"]).unwrap();
        match args.command {
            Command::Map { highlight, once } => {
                assert_eq!(highlight.as_deref(), Some("A1"));
                assert!(once);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_crud_list() {
        let args = Args::try_parse_from([
            "patio-radar",
            "--api",
            "http://yard:8080/api",
            "crud",
            "veiculos",
            "list",
            "--filter",
            "placa=ABC",
            "--size",
            "20",
        ])
        .unwrap();
        assert_eq!(args.api.as_deref(), Some("http://yard:8080/api"));
        match args.command {
            Command::Crud {
                resource: Resource::Veiculos,
                action: CrudAction::List { filters, size, page, .. },
            } => {
                assert_eq!(filters, vec![("placa".to_string(), "ABC".to_string())]);
                assert_eq!(size, 20);
                assert_eq!(page, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn yard() -> OccupancyGrid {
        OccupancyGrid::from_snapshot(&snapshot(vec![
            cell(1, "A1", "O", Some("XYZ9999")),
            cell(2, "A2", "L", None),
            cell(3, "B1", "L", None),
        ]))
    }

    #[test]
    fn test_board_highlights_box_holding_plate() {
        let text = board_text(&yard(), Some("xyz9999"));
        assert!(text.contains("*A1 XYZ9999*"));
        assert!(text.contains("2 free\n"));
        assert!(text.ends_with("XYZ9999 is in A1\n"));
    }

    #[test]
    fn test_board_highlights_box_by_name() {
        let text = board_text(&yard(), Some("B1"));
        assert!(text.contains("*B1 FREE*"));
        assert!(!text.contains(" is in "));
    }

    #[test]
    fn test_resolve_box_by_id_or_name() {
        let grid = yard();
        assert_eq!(resolve_box(Some(&grid), "3"), Some(3));
        assert_eq!(resolve_box(Some(&grid), "a2"), Some(2));
        assert_eq!(resolve_box(Some(&grid), "Z9"), None);
        assert_eq!(resolve_box(None, "A2"), None);
        assert_eq!(resolve_box(None, "7"), Some(7));
    }

    #[test]
    fn test_load_config_falls_back_on_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not = [valid").unwrap();
        let config = load_or_create_config(Some(file.path()));
        assert_eq!(config.api.base_url, AppConfig::default().api.base_url);
    }
}
