mod api;
mod cli;
mod config;
mod error;
mod favorites;
mod history;
mod journal;
mod models;
mod poller;
mod queue;
mod render;
mod schedule;
mod session;
mod shops;
mod state;
mod upload;
mod workflow;

use anyhow::Result;
use clap::{Parser, Subcommand};
use models::{ColorMode, PaperSize, PrintMode, Role};
use std::cell::RefCell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "printdrop", about = "Send documents to nearby print shops")]
pub struct Args {
    #[arg(long, global = true, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "PRINTDROP_STATE_DIR",
        help = "Where the session, favorites and desk journal live"
    )]
    pub state_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "PRINTDROP_API_URL",
        help = "Backend base URL (overrides config)"
    )]
    pub api_url: Option<String>,

    #[arg(long, global = true, help = "Verbose output (log requests and state changes)")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Debug output (log HTTP details and settings)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(long, value_enum, default_value = "customer")]
        role: Role,
        #[arg(long, help = "Shop latitude (shopkeepers)")]
        lat: Option<f64>,
        #[arg(long, help = "Shop longitude (shopkeepers)")]
        long: Option<f64>,
    },
    /// Forget the stored session
    Logout,
    /// List nearby shops, favorites starred
    Shops {
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        long: Option<f64>,
    },
    /// Star or unstar a shop
    Favorite { shop_id: i64 },
    /// List favorite shops
    Favorites,
    /// Upload a document for printing
    Upload {
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        copies: u32,
        #[arg(long, value_enum, default_value = "single")]
        print_mode: PrintMode,
        #[arg(long, value_enum, default_value = "bw")]
        color_mode: ColorMode,
        #[arg(long, value_enum, default_value = "A4", ignore_case = true)]
        paper_size: PaperSize,
        #[arg(long, help = "Join a shop's queue instead of getting a private code")]
        queue: bool,
        #[arg(long, help = "Shop id for a queue print")]
        shop: Option<i64>,
        #[arg(long, help = "Do not poll the code after uploading")]
        no_watch: bool,
    },
    /// Show the status of a private code
    Status {
        code: String,
        #[arg(long, help = "Poll until the shop prints it")]
        watch: bool,
    },
    /// List your uploaded files
    Files,
    /// Money spent and pending
    Expenses,
    /// Show the shop queue
    Queue {
        #[arg(long, help = "Refresh on an interval until interrupted")]
        watch: bool,
    },
    /// Print a code or queue job and confirm it
    Print {
        #[arg(long, conflicts_with = "queue_id", required_unless_present = "queue_id")]
        code: Option<String>,
        #[arg(long)]
        queue_id: Option<i64>,
    },
    /// Save a private document to disk without confirming
    Download {
        #[arg(long)]
        code: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Completed prints at this shop
    History,
    /// Earnings summary
    Stats,
    /// Interactive shop desk
    Desk,
}

fn init_tracing(args: &Args) {
    let default = if args.debug {
        "printdrop=debug"
    } else if args.verbose {
        "printdrop=info"
    } else {
        "printdrop=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args);

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    if let Some(url) = &args.api_url {
        cfg.api.base_url = Some(url.clone());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        return Err(anyhow::anyhow!(
            "Invalid configuration ({} error(s))",
            errors.len()
        ));
    }

    if args.debug {
        eprintln!("[DEBUG] API: {}", cfg.api.base_url());
        eprintln!("[DEBUG] Print command: {}", cfg.printing.command_line());
    }

    let state_dir = args
        .state_dir
        .clone()
        .map(state::StateDir::new)
        .unwrap_or_else(state::StateDir::default_location);
    let local = state::LocalState::load(&state_dir);
    tracing::debug!(dir = %state_dir.root().display(), logged_in = local.session.is_some(), "loaded state");

    let loaded = local.clone();

    let ctx = cli::Context {
        args,
        config: cfg,
        state_dir,
        state: RefCell::new(local),
    };

    let result = cli::run(&ctx);

    // Persist whatever the command changed, even when it failed part way
    let state = ctx.state.borrow();
    if *state != loaded {
        if let Err(e) = state.save(&ctx.state_dir) {
            tracing::warn!(error = %e, "failed to save local state");
        }
    }
    drop(state);

    result
}
