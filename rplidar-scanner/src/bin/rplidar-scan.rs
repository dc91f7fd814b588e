use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use env_logger::Env;
use log::{error, info, warn};
use rplidar_scanner::rplidar_data::SessionState;
use rplidar_scanner::{
    list_ports, query_device, PortResolver, Result, ScanConfig, ScanController, ScanEvent,
    ScanRequest, SystemBackend,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EVENT_POLL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "rplidar-scan", about = "Captures one RPLidar sweep as CSV and PLY.")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports and how much each looks like the sensor
    Ports,
    /// Print the sensor's model, firmware and health
    Info {
        /// Serial port; discovered when omitted
        #[arg(long)]
        port: Option<String>,
    },
    /// Capture one sweep
    Scan {
        /// Serial port; discovered when omitted
        #[arg(long)]
        port: Option<String>,
        /// Tilt of the scan plane in degrees
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        tilt: f64,
        /// Session time limit in seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// Directory receiving scan.csv and scan.ply
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Add the sweep to the points already in scan.csv
        #[arg(long)]
        accumulate: bool,
        /// Merge sweeps until the circle is covered
        #[arg(long)]
        merge: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e.reason());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    };

    match cli.command {
        Command::Ports => {
            for listing in list_ports(&config.ports)? {
                if cli.json {
                    println!("{}", to_json(&listing));
                } else {
                    println!(
                        "{:<24} {:<16} {}",
                        listing.device_name,
                        format!("{:?}", listing.strength),
                        listing.description
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Info { port } => {
            let resolver = PortResolver::new(&config.ports);
            let port_name = resolver.resolve(&SystemBackend, port.as_deref())?;
            let (info, health) = query_device(&port_name, &config.sensor)?;
            println!("port:     {}", port_name);
            println!("model:    {:#04x}", info.model_number);
            println!(
                "firmware: {}.{:02}",
                info.firmware_major_version, info.firmware_minor_version
            );
            println!("hardware: {}", info.hardware_version);
            println!("serial:   {}", info.serial_hex());
            println!("health:   {:?}", health);
            Ok(ExitCode::SUCCESS)
        }
        Command::Scan {
            port,
            tilt,
            timeout,
            out_dir,
            accumulate,
            merge,
        } => {
            if let Some(dir) = out_dir {
                config.output.dir = dir;
            }
            if merge {
                config.session.merge_until_coverage = true;
            }
            let timeout = timeout
                .filter(|secs| secs.is_finite() && *secs > 0.)
                .map(Duration::from_secs_f64);
            let interrupted = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&interrupted);
            if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
                warn!("Failed to install the Ctrl-C handler: {}", e);
            }

            let controller = ScanController::with_system_backend(config);
            let events = controller.subscribe_all();
            let session_id = controller.start(ScanRequest {
                port,
                tilt_deg: tilt,
                timeout,
                outputs: None,
                accumulate,
            })?;

            let mut cancel_requested = false;
            loop {
                match events.recv_timeout(EVENT_POLL) {
                    Ok(event) if event.session_id() == session_id => {
                        if cli.json {
                            println!("{}", to_json(&event));
                        } else {
                            print_event(&event);
                        }
                        if event.is_terminal() {
                            break;
                        }
                    }
                    Ok(_) | Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if interrupted.load(Ordering::SeqCst) && !cancel_requested {
                    info!("Interrupted, cancelling the scan");
                    controller.cancel(session_id)?;
                    cancel_requested = true;
                }
            }

            let session = controller.wait(session_id)?;
            Ok(match session.state {
                SessionState::Succeeded => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

fn print_event(event: &ScanEvent) {
    match event {
        ScanEvent::Started { port, .. } => println!("Scanning on {}", port),
        ScanEvent::Progress { progress, .. } => println!(
            "{:>5.1}%  {} samples, {} usable",
            progress.fraction() * 100.,
            progress.samples_seen,
            progress.samples_accepted
        ),
        ScanEvent::RotationRejected {
            accepted,
            required,
            attempt,
            ..
        } => println!(
            "Sweep {} rejected: {} usable samples, {} required",
            attempt, accepted, required
        ),
        ScanEvent::RotationMerged {
            merged, coverage, ..
        } => println!(
            "Merged {} sweeps: {:.1}% coverage, largest gap {:.1} deg",
            merged,
            coverage.coverage * 100.,
            coverage.max_gap_deg
        ),
        ScanEvent::Succeeded {
            outputs,
            points,
            coverage,
            ..
        } => println!(
            "Wrote {} points ({:.1}% coverage, largest gap {:.1} deg) to {} and {}",
            points,
            coverage.coverage * 100.,
            coverage.max_gap_deg,
            outputs.csv.display(),
            outputs.ply.display()
        ),
        ScanEvent::Failed { reason, .. } => println!("Scan failed. {}", reason),
        ScanEvent::Cancelled { reason, .. } => println!("Scan {}", reason),
    }
}
