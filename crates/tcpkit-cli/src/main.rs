use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, select};
use eyre::WrapErr;
use tcpkit::{Error, Listener, ServerSettings, Status};
use tracing_subscriber::EnvFilter;

mod lights;

use lights::Lights;

#[derive(Debug, Parser)]
#[command(name = "tcpkit", about = "Demo programs for the tcpkit library")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the lights server
    Serve {
        /// Interface prefix and port to listen on, e.g. "192.168:7879"
        #[clap(long = "use")]
        interface: Option<String>,

        /// JSON settings file
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Handle one connection at a time on the accepting thread
        #[clap(long)]
        sequential: bool,
    },

    /// Talk to a lights server, one request per stdin line
    Client {
        #[clap(short, long)]
        server: String,

        #[clap(long, default_value_t = 1000)]
        timeout_ms: u64,

        #[clap(long)]
        buffered: bool,
    },

    /// Print a local IPv4 address
    Ip {
        #[clap(default_value = "")]
        filter: String,
    },
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "parsed command line arguments");

    match args.command {
        Command::Serve {
            interface,
            config,
            sequential,
        } => serve(interface, config, sequential),
        Command::Client {
            server,
            timeout_ms,
            buffered,
        } => client(&server, Duration::from_millis(timeout_ms), buffered),
        Command::Ip { filter } => {
            let address = tcpkit::find_ipv4(&filter).wrap_err("finding interface address")?;
            println!("{address}");
            Ok(())
        }
    }
}

fn serve(interface: Option<String>, config: Option<PathBuf>, sequential: bool) -> eyre::Result<()> {
    let mut settings = match config {
        Some(path) => ServerSettings::load(&path)
            .wrap_err_with(|| format!("loading settings from {}", path.display()))?,
        None => ServerSettings::default(),
    };
    if let Some(interface) = interface {
        let address = tcpkit::find_ipv4(&interface).wrap_err("finding interface address")?;
        if !address.contains(':') {
            eyre::bail!("interface filter {interface:?} must include a port");
        }
        settings.listen = address;
    }
    tracing::info!(listen = %settings.listen, sequential, "starting lights server");

    let (status_tx, status_rx) = crossbeam_channel::bounded(16);
    let (error_tx, error_rx) = crossbeam_channel::bounded(16);

    let mut listener =
        Listener::bind(&settings.listen, Some(status_tx)).wrap_err("binding listener")?;
    listener.set_timeout(settings.accept_timeout());
    listener.set_write_mode(settings.stream.write_mode());
    let listener = Arc::new(listener);

    let handler = Lights {
        settings: settings.stream.clone(),
    };
    let accepting = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || {
            let stopped = if sequential {
                serve_sequentially(&listener, &handler, &error_tx)
            } else {
                listener.dispatch_loop(handler, Some(error_tx))
            };
            listener.close();
            stopped
        })
    };
    // the accepting thread owns the remaining senders from here on
    drop(listener);

    drain(&status_rx, &error_rx);

    let stopped = accepting
        .join()
        .map_err(|_| eyre::eyre!("accepting thread panicked"))?;
    tracing::info!(reason = %stopped, "server stopped");
    Ok(())
}

/// Accept and serve connections one at a time until accepting fails.
fn serve_sequentially(
    listener: &Listener,
    handler: &Lights,
    errors: &crossbeam_channel::Sender<Error>,
) -> Error {
    loop {
        let (_, before) = listener.counts();
        let outcome = listener.dispatch_once(handler);
        let (_, after) = listener.counts();
        match outcome {
            Ok(()) => {}
            // nothing was accepted, so the listener itself failed
            Err(e) if after == before => return e,
            Err(e) => {
                let _ = errors.send(e);
            }
        }
    }
}

/// Log status lines and handler errors until every sender is gone.
fn drain(status_rx: &Receiver<Status>, error_rx: &Receiver<Error>) {
    let mut status_open = true;
    let mut errors_open = true;
    while status_open || errors_open {
        select! {
            recv(status_rx) -> status => match status {
                Ok(status) => tracing::info!(%status),
                Err(_) => status_open = false,
            },
            recv(error_rx) -> error => match error {
                Ok(error) if error.is_end_of_stream() => tracing::debug!(%error, "connection ended"),
                Ok(error) => tracing::warn!(%error, "connection failed"),
                Err(_) => errors_open = false,
            },
        }
    }
}

fn client(server: &str, timeout: Duration, buffered: bool) -> eyre::Result<()> {
    let mut stream = tcpkit::dial(server, timeout, buffered)
        .wrap_err_with(|| format!("connecting to {server}"))?;
    stream.set_read_timeout(timeout);

    let greeting = stream.read_string().wrap_err("reading greeting")?;
    print!("{greeting}");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.wrap_err("reading stdin")?;
        match request(&mut stream, line.trim()) {
            Ok(()) => {}
            Err(e) if e.is_end_of_stream() => {
                tracing::debug!(error = %e, "conversation finished");
                break;
            }
            Err(e) => return Err(e).wrap_err("talking to server"),
        }
    }

    stream.close().wrap_err("closing connection")?;
    Ok(())
}

fn request(stream: &mut tcpkit::StreamIo, line: &str) -> tcpkit::Result<()> {
    if line == "quit" {
        return Err(Error::UserExit);
    }
    stream.write_string(&format!("{line}\n"))?;
    stream.flush()?;

    match line {
        "byte" => println!("{}", stream.read_byte()?),
        "done" => {
            // the server hangs up
            return Err(Error::ClosedByUser);
        }
        _ if line.starts_with("I am: ") => {}
        _ => print!("{}", stream.read_string()?),
    }
    Ok(())
}
