mod callback;
mod commands;
mod interactive;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{AuthorizeOptions, ConfigAction, Env, FlowTarget};

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8400/callback";

#[derive(Parser, Debug)]
#[command(
    name = "auth-tool",
    version,
    about = "Walk through an OAuth2 / OIDC authorization code flow with PKCE"
)]
struct Args {
    /// Directory holding state.json and configurations.json [default: ~/.auth-tool]
    #[arg(long, env = "AUTH_TOOL_HOME", global = true)]
    home: Option<PathBuf>,

    /// Keep the pending attempt in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Timeout in seconds for each HTTP request (none by default)
    #[arg(long, value_name = "SECS", global = true)]
    http_timeout: Option<u64>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage named configurations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Fetch and print the provider's discovery document
    Discover {
        #[command(flatten)]
        target: FlowTarget,
    },
    /// Start an authorization attempt and wait for the redirect return
    Authorize {
        #[command(flatten)]
        target: FlowTarget,

        #[arg(long, default_value = DEFAULT_REDIRECT_URI)]
        redirect_uri: String,

        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,

        /// Do not listen on the redirect URI; finish with `callback`
        #[arg(long)]
        no_listen: bool,

        /// Seconds to wait for the redirect return (0 waits forever)
        #[arg(long, value_name = "SECS", default_value_t = 300)]
        callback_timeout: u64,
    },
    /// Handle a redirect return pasted from the browser
    Callback {
        /// Redirect URL or its query string
        input: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let env = Env::new(args.home, args.ephemeral, args.http_timeout)?;

    match args.command {
        Command::Config { action } => commands::config(&env, action),
        Command::Discover { target } => commands::discover(&env, &target).await,
        Command::Authorize {
            target,
            redirect_uri,
            no_browser,
            no_listen,
            callback_timeout,
        } => {
            let options = AuthorizeOptions {
                redirect_uri,
                open_browser: !no_browser,
                listen: !no_listen,
                callback_timeout: (callback_timeout > 0).then(|| Duration::from_secs(callback_timeout)),
            };
            commands::authorize(&env, &target, options).await
        }
        Command::Callback { input } => commands::callback(&env, &input).await,
    }
}
