use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use turnstile_core::{BUFFER_SIZE, Endpoint};

/// Which broker design the process runs.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Tell each client which worker to reconnect to, then step aside.
    Referral,
    /// Keep every client socket and relay payloads to idle workers.
    Relay,
}

/// How a referral dispatcher treats its cached view of worker occupancy.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Trust the cache until the worker reports back. Two clients arriving
    /// before the first one's `Occupied` report can be referred to the same
    /// worker.
    #[default]
    Cached,
    /// Mark the chosen worker reserved under the registry lock so the next
    /// referral skips it. The worker's `Occupied` report confirms the
    /// reservation.
    Reserve,
}

/// How a relay dispatcher waits for client traffic.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessKind {
    /// One pending read per session, woken by reactor events.
    #[default]
    Event,
    /// Wait for any session to become readable, then sweep all of them with
    /// non-blocking reads.
    Scan,
}

/// Runtime configuration for the `turnstile-server` binary.
///
/// Every value can be given on the command line or through the environment
/// (including a `.env` file), and is fixed for the lifetime of the process.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "turnstile-server",
    version,
    about = "Spreads TCP clients over a bounded pool of single-conversation workers"
)]
pub struct CliArgs {
    /// Broker design to run.
    ///
    /// Environment variable: `MODE`
    #[arg(long, env = "MODE", value_enum, default_value_t = Mode::Referral)]
    pub mode: Mode,

    /// IPv4 address the dispatcher listens on.
    ///
    /// In referral mode, worker `i` listens on the same IP at port
    /// `port + i + 1`. Port 0 gives every socket an ephemeral port.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:8080"))]
    pub server_addr: String,

    /// Size of the worker pool.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Maximum number of clients a relay dispatcher holds at once, counting
    /// those whose request is with a worker. Further clients are dropped on
    /// accept.
    ///
    /// Environment variable: `CLIENT_CAPACITY`
    #[arg(long, env = "CLIENT_CAPACITY", default_value_t = 64)]
    pub client_capacity: usize,

    /// Maximum number of undelivered messages on the bus.
    ///
    /// Environment variable: `BUS_CAPACITY`
    #[arg(long, env = "BUS_CAPACITY", default_value_t = 1024)]
    pub bus_capacity: usize,

    /// Largest frame payload accepted from a client, in bytes. Longer frames
    /// close the connection.
    ///
    /// Environment variable: `MAX_FRAME_LEN`
    #[arg(long, env = "MAX_FRAME_LEN", default_value_t = BUFFER_SIZE)]
    pub max_frame_len: usize,

    /// Referral worker selection policy.
    ///
    /// Environment variable: `SELECTION`
    #[arg(long, env = "SELECTION", value_enum, default_value_t = SelectionPolicy::Cached)]
    pub selection: SelectionPolicy,

    /// Relay readiness strategy.
    ///
    /// Environment variable: `READINESS`
    #[arg(long, env = "READINESS", value_enum, default_value_t = ReadinessKind::Event)]
    pub readiness: ReadinessKind,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: Mode,
    pub server_addr: Endpoint,
    pub num_workers: usize,
    pub client_capacity: usize,
    pub bus_capacity: usize,
    pub max_frame_len: usize,
    pub selection: SelectionPolicy,
    pub readiness: ReadinessKind,
}

impl ServerConfig {
    /// A configuration for `mode` with every other knob at its default and
    /// the dispatcher on an ephemeral loopback port.
    pub fn local(mode: Mode, num_workers: usize) -> Self {
        Self {
            mode,
            server_addr: Endpoint::localhost(0),
            num_workers,
            client_capacity: 64,
            bus_capacity: 1024,
            max_frame_len: BUFFER_SIZE,
            selection: SelectionPolicy::default(),
            readiness: ReadinessKind::default(),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr = Endpoint::parse(&args.server_addr)
            .with_context(|| format!("invalid SERVER_ADDR `{}`", args.server_addr))?;

        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.client_capacity == 0 {
            bail!("CLIENT_CAPACITY must be greater than 0");
        }
        if args.bus_capacity == 0 {
            bail!("BUS_CAPACITY must be greater than 0");
        }
        if args.max_frame_len == 0 || u32::try_from(args.max_frame_len).is_err() {
            bail!(
                "MAX_FRAME_LEN ({}) must be between 1 and {}",
                args.max_frame_len,
                u32::MAX
            );
        }

        if args.mode == Mode::Referral && server_addr.port() != 0 {
            let last = usize::from(server_addr.port()) + args.num_workers;
            if last > usize::from(u16::MAX) {
                bail!(
                    "NUM_WORKERS ({}) does not fit above port {}: the last worker would need port {last}",
                    args.num_workers,
                    server_addr.port()
                );
            }
        }

        Ok(Self {
            mode: args.mode,
            server_addr,
            num_workers: args.num_workers,
            client_capacity: args.client_capacity,
            bus_capacity: args.bus_capacity,
            max_frame_len: args.max_frame_len,
            selection: args.selection,
            readiness: args.readiness,
        })
    }
}
