use std::error::Error;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use clap::Parser;
use crossterm::ExecutableCommand;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod app;
mod backend;
mod cache;
mod dates;
mod debounce;
mod dialogs;
mod form;
mod list;
#[cfg(test)]
mod memory;
mod models;
mod query;
mod session;
mod storage;
mod ui;

use app::App;
use backend::HttpBackend;
use storage::BackendConfig;

/// Terminal timesheet for tracking time against projects and tasks.
#[derive(Parser, Debug)]
#[command(name = "timesheet", version, about)]
struct Args {
    /// Backend project URL. Saved to the config file when given.
    #[arg(long)]
    url: Option<String>,

    /// Public anon key for the backend. Saved to the config file when given.
    #[arg(long)]
    anon_key: Option<String>,

    /// Ignore the saved session and start at the sign-in screen.
    #[arg(long)]
    login: bool,

    /// Log file (defaults to ~/.timesheet.log).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(path: &Path) -> Result<(), Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_env("TIMESHEET_LOG").unwrap_or_else(|_| EnvFilter::new("timesheet=info"));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    if let Some(path) = args.log_file.clone().or_else(storage::default_log_path) {
        init_tracing(&path)?;
    }

    let explicit = args.url.is_some() || args.anon_key.is_some();
    let config = storage::resolve_backend_config(args.url, args.anon_key)?;
    if explicit {
        save_backend_config(&config);
    }
    let backend = HttpBackend::new(&config.url, &config.anon_key)?;
    info!(url = %config.url, "starting timesheet");

    let session = if args.login {
        None
    } else {
        storage::read_session()
    };
    let theme = storage::read_theme().unwrap_or_default();
    let mut app = App::new(backend, session, theme, true);

    let mut stdout = std::io::stdout();
    enable_raw_mode()?;
    stdout.execute(EnterAlternateScreen)?;
    stdout.execute(EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run(&mut terminal, &mut app);

    disable_raw_mode()?;
    terminal.backend_mut().execute(DisableMouseCapture)?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App<HttpBackend>,
) -> Result<(), Box<dyn Error>> {
    loop {
        terminal.draw(|frame| ui::draw(frame, app))?;

        app.tick(Instant::now());

        if app.should_quit {
            return Ok(());
        }

        if event::poll(Duration::from_millis(120))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    app.handle_key_event(key, Instant::now());
                }
                Event::Mouse(mouse) => app.handle_mouse_event(mouse),
                _ => {}
            }
        }
    }
}

fn save_backend_config(config: &BackendConfig) {
    if let Err(err) = storage::write_backend_config(config) {
        warn!(%err, "failed to save backend config");
    }
}
