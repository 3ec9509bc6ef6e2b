use clap::{ArgGroup, Parser};
use logtap::{Connector, LineSubscriber, StreamHub};
use logtap_core::{Config, LineFilter, LogLine, MemoryWatchdog, StateListener};
use logtap_feeds::{EofMode, SourceReader, SourceTarget};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "logtap", about = "Tail, deduplicate and filter a live log stream")]
#[command(group(ArgGroup::new("source").required(true).args(["file", "host"])))]
struct Cli {
    /// Read lines from this file.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Read lines from a TCP peer.
    #[arg(long, requires = "port")]
    host: Option<String>,

    #[arg(long, requires = "host")]
    port: Option<u16>,

    /// Only print lines that match this pattern in full.
    #[arg(long, default_value = ".*")]
    filter: String,

    /// Keep tailing the file and reconnect when it goes away.
    #[arg(long)]
    follow: bool,

    /// One JSON object per record.
    #[arg(long)]
    json: bool,

    /// Config file to layer over the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level on stderr.
    #[arg(long)]
    debug: bool,
}

/// Forwards matching records to the printing task.
struct Printer {
    filter: String,
    records: mpsc::UnboundedSender<Arc<LogLine>>,
}

impl LineSubscriber for Printer {
    fn name(&self) -> &str {
        "stdout"
    }

    fn filter(&self) -> &str {
        &self.filter
    }

    fn on_record(&self, record: Arc<LogLine>) {
        let _ = self.records.send(record);
    }

    fn on_block(&self, records: &[Arc<LogLine>]) {
        for record in records {
            let _ = self.records.send(Arc::clone(record));
        }
    }
}

/// Wakes the main task once a static source is done.
struct Finished(Arc<Notify>);

impl StateListener for Finished {
    fn name(&self) -> &str {
        "finished"
    }

    fn on_opened(&self) {}

    fn on_closed(&self) {
        self.0.notify_one();
    }

    fn on_eof_reached(&self) {
        self.0.notify_one();
    }
}

fn print_record(out: &mut impl Write, record: &LogLine, json: bool) -> anyhow::Result<()> {
    if json {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{record}")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::load(cli.config.as_deref())?;
    LineFilter::try_new(cli.filter.as_str())?;

    let hub = Arc::new(StreamHub::new(&config));
    let cancel = CancellationToken::new();

    let watchdog = Arc::new(MemoryWatchdog::new(config.watchdog.clone()));
    for reporter in hub.memory_reporters() {
        watchdog.register(reporter);
    }
    let watchdog_task = Arc::clone(&watchdog).spawn(cancel.clone());

    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<LogLine>>();
    let subscription = hub.subscribe(Arc::new(Printer {
        filter: cli.filter.clone(),
        records: tx,
    }));
    let json = cli.json;
    let printer = tokio::spawn(async move {
        let stdout = std::io::stdout();
        while let Some(record) = rx.recv().await {
            let mut out = stdout.lock();
            if let Err(err) = print_record(&mut out, &record, json) {
                tracing::warn!(error = %err, "stdout closed");
                break;
            }
        }
    });

    match (&cli.file, cli.follow) {
        (Some(path), false) => {
            let done = Arc::new(Notify::new());
            hub.add_state_listener(Arc::new(Finished(Arc::clone(&done))));
            let reader = SourceReader::new(SourceTarget::file(path), config.reader.clone(), EofMode::Stop);
            hub.open(Arc::new(reader)).await?;
            tokio::select! {
                _ = done.notified() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            hub.shutdown().await;
        }
        _ => {
            let connector = Connector::attach(Arc::clone(&hub), config.connector.clone());
            match (&cli.file, &cli.host, cli.port) {
                (Some(path), _, _) => connector.connect_to_file(path),
                (None, Some(host), Some(port)) => connector.connect_to_host(host.as_str(), port),
                _ => anyhow::bail!("no source given"),
            }
            tokio::signal::ctrl_c().await?;
            tracing::info!("interrupted, shutting down");
            connector.disconnect().await;
            connector.shutdown().await;
            hub.shutdown().await;
        }
    }

    cancel.cancel();
    let _ = watchdog_task.await;
    hub.unsubscribe(subscription);
    drop(hub);
    let _ = printer.await;
    Ok(())
}
