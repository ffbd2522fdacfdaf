//! nbio Echo Server
//!
//! Echoes every byte back to its sender. Connections are spread over the
//! IO runners round-robin; with a certificate and key it speaks TLS.
//!
//! Usage:
//!     cargo build --release -p nbio-echo
//!     ./target/release/nbio-echo [port] [cert.pem key.pem]
//!
//! Test with:
//!     # Plain:
//!     echo "hello" | nc localhost 9999
//!
//!     # TLS:
//!     openssl s_client -connect localhost:9999 -quiet
//!
//! Tuning comes from the environment (NBIO_IO_THREADS, NBIO_BUFFER_SIZE,
//! NBIO_IDLE_INTERVAL_MS, NBIO_LOG_LEVEL, ...).

use nbio::{
    ninfo, nerror, IoHandler, MemoryStats, Message, NetConfig, Session, SocketContext, TcpServer,
    TlsManager,
};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Stats ──

#[derive(Default)]
struct Stats {
    accepts: AtomicU64,
    closes: AtomicU64,
    messages: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl Stats {
    fn print(&self, server: &TcpServer, elapsed_secs: f64) {
        let mem = MemoryStats::global().snapshot();
        ninfo!(
            "[{:.1}s] conns={} accepts={} close={} msgs={} bytes={} err={} {}",
            elapsed_secs,
            server.session_count(),
            self.accepts.load(Ordering::Relaxed),
            self.closes.load(Ordering::Relaxed),
            self.messages.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            mem,
        );
    }
}

// ── Handler ──

struct Echo {
    stats: Arc<Stats>,
}

impl IoHandler for Echo {
    fn on_connect(&self, _session: &Arc<Session>) -> Option<Message> {
        self.stats.accepts.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn on_disconnect(&self, _session: &Arc<Session>) {
        self.stats.closes.fetch_add(1, Ordering::Relaxed);
    }

    fn on_receive(&self, _session: &Arc<Session>, message: Message) -> Option<Message> {
        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes.fetch_add(message.len() as u64, Ordering::Relaxed);
        Some(message)
    }

    fn on_exception(&self, session: &Arc<Session>, error: &nbio::NetError) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        nerror!("session {} from {}: {}", session.id(), session.remote_addr(), error);
    }
}

// ── Main ──

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_sig: nix::libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn install_signals() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic
    unsafe {
        signal::sigaction(Signal::SIGINT, &action)?;
        signal::sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

fn main() {
    nbio::init_logging();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9999);

    if let Err(e) = install_signals() {
        nerror!("nbio-echo: cannot install signal handlers: {}", e);
        std::process::exit(1);
    }

    let config = NetConfig::from_env();
    config.print();

    let stats = Arc::new(Stats::default());
    let mut ctx = SocketContext::new(Echo {
        stats: Arc::clone(&stats),
    })
    .with_config(config);

    if let (Some(cert), Some(key)) = (args.get(2), args.get(3)) {
        match TlsManager::server_from_files(cert, key) {
            Ok(tls) => ctx = ctx.with_tls(tls),
            Err(e) => {
                nerror!("nbio-echo: cannot load {} / {}: {}", cert, key, e);
                std::process::exit(1);
            }
        }
    }
    let tls = ctx.tls().is_some();

    let server = match TcpServer::bind(("0.0.0.0", port), ctx) {
        Ok(s) => s,
        Err(e) => {
            nerror!("nbio-echo: bind failed: {}", e);
            std::process::exit(1);
        }
    };
    ninfo!(
        "nbio-echo: listening on {} ({})",
        server.local_addr(),
        if tls { "tls" } else { "plain" }
    );

    let start = Instant::now();
    let mut last_stats = start;
    while RUNNING.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
        let now = Instant::now();
        if now.duration_since(last_stats) >= Duration::from_secs(5) {
            stats.print(&server, now.duration_since(start).as_secs_f64());
            last_stats = now;
        }
    }

    ninfo!("nbio-echo: shutting down...");
    stats.print(&server, start.elapsed().as_secs_f64());
    server.shutdown();
    ninfo!("nbio-echo: done.");
}
