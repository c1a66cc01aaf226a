use anyhow::{Error, Result, bail};
use clap::Parser;
use client::tui::{self, Command, Prompt};
use client::{init_file_tracing, load_config};
use crossterm::event::{Event, EventStream};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use futures::StreamExt;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use shield_core::auth::Credentials;
use shield_core::{Dashboard, Surface};
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const REDRAW_DEBOUNCE_MILLIS: u64 = 50;
const LOG_FILE: &str = "shield-dash.log";

type Term = Terminal<CrosstermBackend<Stdout>>;

#[derive(Parser)]
#[command(author, version, about = "AuthShield terminal dashboard")]
#[command(long_about = r#"Interactive terminal dashboard for the AuthShield botnet detection API.

Logs go to shield-dash.log inside the work folder, filtered by RUST_LOG."#)]
struct Args {
    /// Base url of the AuthShield API
    #[arg(long)]
    url: Option<String>,
    /// Only needed when no valid token is stored
    #[arg(long)]
    username: Option<String>,
    #[arg(long, env = "SHIELD_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    #[arg(long)]
    remember: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.url.as_deref()).await?;
    init_file_tracing(Path::new(config.get_root()).join(LOG_FILE))?;
    info!("working inside {}, api {}", config.get_root(), config.api_url);
    let surface = Arc::new(Surface::new());
    let dash = Dashboard::with_reqwest(config, surface.clone())?;

    if !dash.init().await? {
        let (Some(username), Some(password)) = (args.username, args.password) else {
            bail!("no stored session, pass --username and --password");
        };
        let creds = Credentials { username, password, remember: args.remember };
        dash.login(&creds).await.map_err(|e| Error::msg(e.to_string()))?;
    }

    let mut terminal = enter_terminal()?;
    let outcome = run(&mut terminal, &dash, &surface).await;
    leave_terminal(&mut terminal)?;
    dash.poller().stop();
    outcome
}

fn enter_terminal() -> Result<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    // restore the shell before the panic message is printed
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |pi| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        default(pi);
    }));

    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn leave_terminal(terminal: &mut Term) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Redraws after key presses and after each burst of surface changes
async fn run(terminal: &mut Term, dash: &Arc<Dashboard>, surface: &Surface) -> Result<()> {
    let mut keys = EventStream::new();
    let mut changes = surface.subscribe();
    let mut prompt = Prompt::default();
    let mut ended = false;

    loop {
        let state = surface.snapshot();
        terminal.draw(|f| tui::draw(f, &state, &prompt))?;

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(REDRAW_DEBOUNCE_MILLIS)).await;
                changes.mark_unchanged();
            }
            event = keys.next() => match event {
                Some(Ok(Event::Key(key))) => {
                    if let Some(command) = prompt.on_key(key) {
                        if !execute(dash, command, &mut prompt).await? {
                            return Ok(());
                        }
                    }
                }
                // resizes only need the redraw
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
        }

        if !ended && !dash.session().is_authenticated() {
            warn!("session ended");
            prompt.set_status("session ended, esc to quit");
            ended = true;
        }
    }
}

/// Runs one command, false once the dashboard should close
async fn execute(dash: &Arc<Dashboard>, command: Command, prompt: &mut Prompt) -> Result<bool> {
    let active = dash.router().current();
    match command {
        Command::Tab(id) => {
            dash.switch_tab(&id);
        }
        Command::NextTab => {
            dash.switch_tab(tui::cycle_tab(active.as_deref(), 1));
        }
        Command::PrevTab => {
            dash.switch_tab(tui::cycle_tab(active.as_deref(), -1));
        }
        Command::Run => {
            tokio::spawn({
                let dash = dash.clone();
                async move {
                    let _ = dash.run_attack().await;
                }
            });
        }
        Command::Freeze => {
            tokio::spawn({
                let dash = dash.clone();
                async move {
                    let _ = dash.freeze_all().await;
                }
            });
        }
        Command::Unfreeze(user_id) => {
            // failures land inline on the frozen tab
            tokio::spawn({
                let dash = dash.clone();
                async move {
                    let _ = dash.actions().unfreeze(&user_id).await;
                }
            });
        }
        Command::Metrics => prompt.set_status(serde_json::to_string(&dash.get_json_metrics())?),
        Command::Logout => {
            dash.logout().await;
            return Ok(false);
        }
        Command::Quit => return Ok(false),
    }
    Ok(true)
}
