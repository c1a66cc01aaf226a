use anyhow::{Error, Result, bail};
use clap::{Parser, Subcommand};
use client::{init_tracing, load_config, screen};
use shield_core::actions::ChainAction;
use shield_core::auth::{self, Credentials, Registration};
use shield_core::loaders::{LoadMode, Resource};
use shield_core::render::Target;
use shield_core::{Dashboard, Surface};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "AuthShield CLI tool")]
#[command(long_about = r#"CLI tool for the AuthShield botnet detection API.

Notes:
  - The API address comes from --url, else SHIELD_API_URL, else http://127.0.0.1:8000.
  - login --remember keeps the token in the work folder (WORKFOLDER, default ~/.authshield);
    without it the token only lives for this invocation.
  - Passwords can be passed through SHIELD_PASSWORD instead of the command line."#)]
struct Cli {
    /// Base url of the AuthShield API
    #[arg(long, global = true)]
    url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the token
    Login {
        username: String,
        #[arg(long, env = "SHIELD_PASSWORD", hide_env_values = true)]
        password: String,
        /// Keep the token across invocations
        #[arg(long)]
        remember: bool,
    },
    /// Create an account, the token is not remembered
    Register {
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long = "full-name", default_value = "")]
        full_name: String,
        #[arg(long, env = "SHIELD_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        role: Option<String>,
    },
    /// Forget the stored token
    Logout,
    /// Show the identity behind the stored token
    Whoami,
    /// Backend liveness, no token needed
    Health,
    /// Recent login events, newest first
    Events {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Detected botnet clusters
    Clusters,
    /// Currently frozen accounts
    Frozen,
    /// Unfreeze one account
    Unfreeze { user_id: String },
    /// Freeze and unfreeze audit trail
    FreezeLog,
    /// Analysts with access
    Team,
    /// Show or change the detection thresholds
    Thresholds {
        #[command(subcommand)]
        command: Option<ThresholdsCommand>,
    },
    /// Run cluster detection and freeze what it flags
    CheckClusters,
    /// Simulated attack, optionally followed by the freeze
    Demo {
        #[arg(long)]
        freeze: bool,
    },
    /// Algorand audit trail and wallet actions
    Chain {
        #[command(subcommand)]
        command: ChainCommand,
    },
}

#[derive(Subcommand)]
enum ThresholdsCommand {
    Get,
    Set {
        #[arg(long = "cluster-size")]
        cluster_size: u32,
        #[arg(long)]
        similarity: Option<f64>,
        #[arg(long)]
        risk: f64,
    },
}

#[derive(Subcommand)]
enum ChainCommand {
    /// Ledger status and balance
    Status,
    /// Generate a fresh wallet
    Wallet,
    LogFreeze {
        user_id: String,
        #[arg(long, default_value_t = 0.0)]
        risk: f64,
    },
    MintBadge {
        user_id: String,
        #[arg(long, default_value_t = 0.0)]
        risk: f64,
    },
    Reputation {
        user_id: String,
        #[arg(long, default_value_t = 0.0)]
        risk: f64,
    },
    /// Freeze and record on chain in one call
    Freeze { user_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config(cli.url.as_deref()).await?;
    if let Commands::Events { limit: Some(limit) } = &cli.command {
        config.events_limit = *limit;
    }
    let surface = Arc::new(Surface::new());
    let dash = Dashboard::with_reqwest(config, surface.clone())?;

    match cli.command {
        Commands::Login { username, password, remember } => {
            let identity = auth::login(dash.transport(), &Credentials { username, password, remember })
                .await
                .map_err(|e| Error::msg(e.user_message()))?;
            println!("logged in as {} ({})", identity.display_name(), identity.role.as_deref().unwrap_or("analyst"));
        }
        Commands::Register { username, email, full_name, password, role } => {
            let reg = Registration { full_name, username, email, confirm_password: password.clone(), password, role };
            let identity = auth::register(dash.transport(), &reg).await.map_err(|e| Error::msg(e.user_message()))?;
            println!("registered {}", identity.username);
        }
        Commands::Logout => {
            dash.logout().await;
            println!("logged out");
        }
        Commands::Whoami => match dash.resume().await? {
            Some(identity) => println!("{} ({})", identity.display_name(), identity.role.as_deref().unwrap_or("analyst")),
            None => println!("not logged in"),
        },
        Commands::Health => {
            let health = dash.actions().health().await.map_err(|e| Error::msg(e.user_message()))?;
            println!("{} {}", health.status, health.timestamp.unwrap_or_default());
        }
        Commands::Events { .. } => handle_load(&dash, &surface, Resource::Events).await?,
        Commands::Clusters => handle_load(&dash, &surface, Resource::Clusters).await?,
        Commands::Frozen => handle_load(&dash, &surface, Resource::FrozenUsers).await?,
        Commands::FreezeLog => handle_load(&dash, &surface, Resource::FreezeLog).await?,
        Commands::Team => handle_load(&dash, &surface, Resource::Team).await?,
        Commands::Unfreeze { user_id } => {
            require_session(&dash).await?;
            dash.actions().unfreeze(&user_id).await.map_err(|e| Error::msg(e.user_message()))?;
            println!("unfrozen {user_id}");
        }
        Commands::Thresholds { command: None | Some(ThresholdsCommand::Get) } => {
            handle_load(&dash, &surface, Resource::Thresholds).await?
        }
        Commands::Thresholds { command: Some(ThresholdsCommand::Set { cluster_size, similarity, risk }) } => {
            require_session(&dash).await?;
            dash.actions()
                .save_thresholds(cluster_size, similarity, risk)
                .await
                .map_err(|e| Error::msg(e.user_message()))?;
            print_target(&surface, Target::ThresholdsPanel);
        }
        Commands::CheckClusters => {
            require_session(&dash).await?;
            dash.actions().check_clusters().await.map_err(|e| Error::msg(e.user_message()))?;
            print_note(&surface, Target::ClusterCheckResult);
        }
        Commands::Demo { freeze } => handle_demo(&dash, &surface, freeze).await?,
        Commands::Chain { command } => handle_chain(&dash, &surface, command).await?,
    }

    Ok(())
}

async fn require_session(dash: &Dashboard) -> Result<()> {
    if dash.resume().await?.is_none() {
        bail!("not logged in, run `shield login` first");
    }
    Ok(())
}

async fn handle_load(dash: &Dashboard, surface: &Surface, resource: Resource) -> Result<()> {
    require_session(dash).await?;
    dash.loaders().load(resource, LoadMode::Visible).await;
    if !dash.session().is_authenticated() {
        bail!("session expired, log in again");
    }
    print_target(surface, resource.target());
    if resource == Resource::Events {
        let s = surface.snapshot();
        let stat = |t: Target| s.text(t).unwrap_or("0").to_string();
        println!(
            "total {}  legit {}  suspicious {}",
            stat(Target::StatTotal),
            stat(Target::StatLegit),
            stat(Target::StatSuspicious)
        );
    }
    Ok(())
}

async fn handle_demo(dash: &Dashboard, surface: &Surface, freeze: bool) -> Result<()> {
    require_session(dash).await?;
    let attack = dash.run_attack().await;
    let frozen = match (&attack, freeze) {
        (Ok(_), true) => Some(dash.freeze_all().await),
        _ => None,
    };

    let state = surface.snapshot();
    for line in &state.feed {
        println!("{}", line.text);
    }
    if let Some(card) = &state.result {
        println!("\n{}\n{}", card.title, card.subtitle);
    }

    attack.map_err(|e| Error::msg(e.to_string()))?;
    if let Some(frozen) = frozen {
        frozen.map_err(|e| Error::msg(e.to_string()))?;
    }
    Ok(())
}

async fn handle_chain(dash: &Dashboard, surface: &Surface, command: ChainCommand) -> Result<()> {
    let (action, user_id, risk) = match command {
        ChainCommand::Status => return handle_load(dash, surface, Resource::Blockchain).await,
        ChainCommand::Wallet => {
            require_session(dash).await?;
            dash.actions().generate_wallet().await.map_err(|e| Error::msg(e.user_message()))?;
            print_note(surface, Target::WalletResult);
            return Ok(());
        }
        ChainCommand::LogFreeze { user_id, risk } => (ChainAction::LogFreeze, user_id, risk),
        ChainCommand::MintBadge { user_id, risk } => (ChainAction::MintBadge, user_id, risk),
        ChainCommand::Reputation { user_id, risk } => (ChainAction::UpdateReputation, user_id, risk),
        ChainCommand::Freeze { user_id } => (ChainAction::FreezeAndLog, user_id, 0.0),
    };

    require_session(dash).await?;
    dash.actions().chain_action(action, &user_id, risk).await.map_err(|e| Error::msg(e.user_message()))?;
    print_note(surface, Target::ChainActionResult);
    Ok(())
}

fn print_target(surface: &Surface, target: Target) {
    let state = surface.snapshot();
    if let Some(content) = state.content(target) {
        for line in screen::draw_content(content, false) {
            println!("{line}");
        }
    }
}

fn print_note(surface: &Surface, target: Target) {
    if let Some(text) = surface.snapshot().text(target) {
        println!("{text}");
    }
}
