//! Command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use auth_tool_core::{
    paths, response, Configuration, ConfigurationStore, FileStore, FlowController, FlowResult,
    KeyValueStore, MemoryStore, NavigationStep, ReqwestTransport,
};
use serde_json::json;
use tracing::{info, warn};

use crate::callback::{self, RedirectTarget, Return};
use crate::{interactive, output};

type Store = Box<dyn KeyValueStore>;
type Controller = FlowController<ReqwestTransport, Store>;

/// Field values given on the command line; each one replaces the
/// corresponding field of the base configuration.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct FieldOverrides {
    /// Authentication server (issuer) URL
    #[arg(long = "server")]
    pub authentication_server: Option<String>,
    #[arg(long)]
    pub client_id: Option<String>,
    /// Stored with the configuration; never sent to the provider
    #[arg(long)]
    pub client_secret: Option<String>,
    #[arg(long)]
    pub scope: Option<String>,
    #[arg(long)]
    pub audience: Option<String>,
}

impl FieldOverrides {
    pub fn apply(&self, config: &mut Configuration) {
        let fields = [
            (&self.authentication_server, &mut config.authentication_server),
            (&self.client_id, &mut config.client_id),
            (&self.client_secret, &mut config.client_secret),
            (&self.scope, &mut config.scope),
            (&self.audience, &mut config.audience),
        ];
        for (value, field) in fields {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
    }
}

/// Which configuration a flow command starts from.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct FlowTarget {
    /// Named configuration to use instead of the selected one
    #[arg(long)]
    pub config: Option<String>,
    #[command(flatten)]
    pub fields: FieldOverrides,
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// List stored configurations
    List,
    /// Print a configuration (the selected one by default)
    Show {
        name: Option<String>,
        /// Print the client secret instead of masking it
        #[arg(long)]
        reveal: bool,
    },
    /// Create or update a configuration and select it
    Save {
        name: String,
        /// Rename this existing configuration to NAME
        #[arg(long, value_name = "OLD_NAME")]
        rename_from: Option<String>,
        #[command(flatten)]
        fields: FieldOverrides,
    },
    /// Save as a new configuration; a clashing name becomes "Copy of NAME"
    SaveAs {
        name: String,
        #[command(flatten)]
        fields: FieldOverrides,
    },
    /// Delete a configuration
    Remove { name: String },
    /// Select a configuration; without a name the selection is cleared
    Select { name: Option<String> },
}

/// Where state lives for this invocation.
pub struct Env {
    home: PathBuf,
    /// Shared by every store handle when state is kept in memory.
    ephemeral: Option<Arc<MemoryStore>>,
    http_timeout: Option<Duration>,
}

impl Env {
    pub fn new(home: Option<PathBuf>, ephemeral: bool, http_timeout: Option<u64>) -> anyhow::Result<Self> {
        let home = match home {
            Some(home) => home,
            None => paths::auth_tool_dir()?,
        };
        Ok(Self {
            home,
            ephemeral: ephemeral.then(|| Arc::new(MemoryStore::new())),
            http_timeout: http_timeout.map(Duration::from_secs),
        })
    }

    /// Local state: the pending attempt and the selection. In memory only
    /// when ephemeral.
    fn local_store(&self) -> Store {
        match &self.ephemeral {
            Some(memory) => Box::new(Arc::clone(memory)),
            None => Box::new(FileStore::new(paths::state_file(&self.home))),
        }
    }

    fn is_ephemeral(&self) -> bool {
        self.ephemeral.is_some()
    }

    fn configurations(&self) -> ConfigurationStore<Store, Store> {
        let configurations: Store = Box::new(FileStore::new(paths::configurations_file(&self.home)));
        ConfigurationStore::new(configurations, self.local_store())
    }

    fn controller(&self) -> anyhow::Result<Controller> {
        let transport = ReqwestTransport::new(self.http_timeout)?;
        Ok(FlowController::new(transport, self.local_store()))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Selected (or named) configuration with the overrides applied.
    fn resolve(&self, target: &FlowTarget) -> anyhow::Result<Configuration> {
        let store = self.configurations();
        let mut config = match &target.config {
            Some(name) => store
                .get(name)?
                .with_context(|| format!("No configuration named '{}'", name))?,
            None => store.selected()?.unwrap_or_default(),
        };
        target.fields.apply(&mut config);
        Ok(config)
    }
}

// ── config ──────────────────────────────────────────────────────────────────

pub fn config(env: &Env, action: ConfigAction) -> anyhow::Result<()> {
    if env.is_ephemeral() {
        bail!("--ephemeral cannot be used with 'config': the selection would be lost on exit");
    }
    let store = env.configurations();

    match action {
        ConfigAction::List => {
            let selected = store.selected_name()?;
            let all = store.list()?;
            if all.is_empty() {
                eprintln!("No configurations in {}", env.home().display());
            }
            for config in all {
                let marker = if selected.as_deref() == Some(config.name.as_str()) { "*" } else { " " };
                println!("{} {}  {}", marker, config.name, config.authentication_server);
            }
        }
        ConfigAction::Show { name, reveal } => {
            let config = match name {
                Some(name) => store
                    .get(&name)?
                    .with_context(|| format!("No configuration named '{}'", name))?,
                None => store.selected()?.context("No configuration is selected")?,
            };
            let label = config.name.clone();
            output::json(&label, &masked(config, reveal))?;
        }
        ConfigAction::Save {
            name,
            rename_from,
            fields,
        } => {
            let base_name = rename_from.as_deref().unwrap_or(name.as_str());
            let mut config = store.get(base_name)?.unwrap_or_default();
            fields.apply(&mut config);
            config.name = name;
            store.save(&config, rename_from.as_deref())?;
            info!("Saved configuration '{}'", config.name);
        }
        ConfigAction::SaveAs { name, fields } => {
            let mut config = store.get(&name)?.unwrap_or_default();
            fields.apply(&mut config);
            config.name = name;
            let saved = store.save_as(&config)?;
            println!("{}", saved.name);
        }
        ConfigAction::Remove { name } => store.remove(&name)?,
        ConfigAction::Select { name } => store.select(name.as_deref())?,
    }

    Ok(())
}

fn masked(mut config: Configuration, reveal: bool) -> Configuration {
    if !reveal && !config.client_secret.is_empty() {
        config.client_secret = "********".into();
    }
    config
}

// ── flow ────────────────────────────────────────────────────────────────────

pub async fn discover(env: &Env, target: &FlowTarget) -> anyhow::Result<()> {
    let config = env.resolve(target)?;
    let controller = env.controller()?;
    let document = controller.discover(&config.view()).await?;
    output::json("Discovery document", document.as_json())
}

pub struct AuthorizeOptions {
    pub redirect_uri: String,
    pub open_browser: bool,
    pub listen: bool,
    pub callback_timeout: Option<Duration>,
}

pub async fn authorize(env: &Env, target: &FlowTarget, options: AuthorizeOptions) -> anyhow::Result<()> {
    if env.is_ephemeral() && !options.listen {
        bail!("--ephemeral needs the callback listener: a later 'callback' could not find the pending attempt");
    }

    let config = env.resolve(target)?;
    let mut controller = env.controller()?;

    // Bind first so a port clash fails before anything is persisted.
    let listener = if options.listen {
        let target = RedirectTarget::parse(&options.redirect_uri)?;
        let listener = callback::bind(&target).await?;
        Some((listener, target.path))
    } else {
        None
    };

    let step = controller.authorize(&config.view(), &options.redirect_uri).await?;
    output::json("Discovery document", step.discovery.as_json())?;
    output::json("Authorization request", &step.request)?;
    println!("{}", step.url);

    if options.open_browser {
        if let Err(e) = open::that(&step.url) {
            warn!("Failed to open browser automatically: {}. Visit the URL above.", e);
        }
    }

    let Some((listener, path)) = listener else {
        eprintln!("After signing in, pass the URL the browser lands on to: auth-tool callback '<url>'");
        return Ok(());
    };

    let ret = callback::wait_for_return(&listener, &path, options.callback_timeout).await?;
    let result = controller.on_navigation(ret.query.as_deref()).await;
    finish(&mut controller, result, Some(ret)).await
}

pub async fn callback(env: &Env, input: &str) -> anyhow::Result<()> {
    if env.is_ephemeral() {
        bail!("--ephemeral has no pending attempt to resume");
    }
    let query = response::extract_query(input);
    if query.is_none() {
        bail!("Nothing to handle: the input carries no query string");
    }
    let mut controller = env.controller()?;
    let result = controller.on_navigation(query).await;
    finish(&mut controller, result, None).await
}

/// What the browser page says about a return.
struct Summary {
    usable: bool,
    message: String,
}

fn show_navigation(result: &FlowResult<NavigationStep>) -> anyhow::Result<Summary> {
    let summary = match result {
        Ok(NavigationStep::Idle) => Summary {
            usable: false,
            message: "The redirect carried no query string.".into(),
        },
        Ok(NavigationStep::Rejected { response, verdict }) => {
            output::json("Authorization response", response)?;
            Summary {
                usable: false,
                message: format!("Not exchanged: {}", verdict),
            }
        }
        Ok(NavigationStep::Exchanged { response, outcome }) => {
            output::json("Authorization response", response)?;
            output::token_outcome("Token response", outcome)?;
            Summary {
                usable: outcome.is_usable(),
                message: if outcome.is_usable() {
                    "Tokens received.".into()
                } else {
                    format!("Token endpoint answered HTTP {}.", outcome.status)
                },
            }
        }
        Err(e) => Summary {
            usable: false,
            message: e.report(),
        },
    };
    Ok(summary)
}

async fn finish(
    controller: &mut Controller,
    result: FlowResult<NavigationStep>,
    browser: Option<Return>,
) -> anyhow::Result<()> {
    let summary = show_navigation(&result)?;
    if let Some(browser) = browser {
        if let Err(e) = browser.respond(summary.usable, &summary.message).await {
            warn!("{:#}", e);
        }
    }

    match result? {
        NavigationStep::Idle => {
            warn!("{}", summary.message);
            Ok(())
        }
        NavigationStep::Rejected { verdict, .. } => Err(verdict
            .to_error()
            .map(anyhow::Error::new)
            .unwrap_or_else(|| anyhow!("{}", verdict))),
        NavigationStep::Exchanged { outcome, .. } if outcome.is_usable() => {
            interactive::run(controller).await
        }
        NavigationStep::Exchanged { .. } => {
            let view = controller.view();
            output::json("Session", &json!({ "phase": view.phase, "message": view.message }))?;
            bail!("{}", summary.message)
        }
    }
}
