//! Entry point for `rft`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv**
//! mode.  All actual protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing, file I/O).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use rft::config::Config;
use rft::socket::Socket;
use rft::transfer::{FileReceiver, FileSender, StopHandle};

/// Reliable whole-file transfer over lossy UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a receiving peer.
    Send {
        /// Path of the file to transfer.
        #[arg(short, long)]
        file: PathBuf,
        /// Receiving peer address (e.g. 192.0.2.1:9000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
    },
    /// Receive a file from whichever sender speaks first.
    Recv {
        /// Path to write the received file to.
        #[arg(short, long)]
        out: PathBuf,
        /// Local address to listen on.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::default();

    // Ctrl-C raises the stop flag; the driver exits at its loop boundary.
    let stop = StopHandle::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, stopping transfer");
            ctrl_c.stop();
        }
    });

    match cli.mode {
        Mode::Send { file, peer, bind } => {
            let data = match tokio::fs::read(&file).await {
                Ok(data) => data,
                Err(e) => {
                    log::error!("cannot read {}: {e}", file.display());
                    return ExitCode::FAILURE;
                }
            };
            let socket = match Socket::bind(bind).await {
                Ok(s) => s,
                Err(e) => {
                    log::error!("cannot bind {bind}: {e}");
                    return ExitCode::FAILURE;
                }
            };

            let sender = match FileSender::new(socket, peer, &data, &config, stop) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            match sender.run().await {
                Ok(stats) => {
                    log::info!(
                        "sent {} byte(s): {} fresh frame(s), {} retransmission(s)",
                        data.len(),
                        stats.frames_sent,
                        stats.retransmits
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    log::error!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Mode::Recv { out, bind } => {
            let socket = match Socket::bind(bind).await {
                Ok(s) => s,
                Err(e) => {
                    log::error!("cannot bind {bind}: {e}");
                    return ExitCode::FAILURE;
                }
            };

            let stopped = stop.clone();
            match FileReceiver::new(socket, &config, stop).run().await {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::write(&out, &bytes).await {
                        log::error!("cannot write {}: {e}", out.display());
                        return ExitCode::FAILURE;
                    }
                    if stopped.is_stopped() {
                        // Partial prefix only; make the truncation loud.
                        log::warn!(
                            "wrote {} byte(s) of an incomplete transfer to {}",
                            bytes.len(),
                            out.display()
                        );
                        ExitCode::FAILURE
                    } else {
                        log::info!("wrote {} byte(s) to {}", bytes.len(), out.display());
                        ExitCode::SUCCESS
                    }
                }
                Err(e) => {
                    log::error!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
