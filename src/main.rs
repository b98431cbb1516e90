use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use basicboard::BasicBoard;
use bpaf::{Bpaf, Parser};
use sportsmatrix_core::{Board, Canvas, NullCanvas};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::matrix::Matrix;
use crate::pattern::PatternRenderer;
use crate::schedule::{Clock, ScheduleWindow, SystemClock};

mod config;
mod error;
mod lock;
mod logging;
mod matrix;
mod pattern;
mod schedule;

#[derive(Clone, Debug, Bpaf)]
#[bpaf(options, version, descr(env!("CARGO_PKG_DESCRIPTION")))]
struct Cli {
    /// Config file to use instead of the one in the platform config directory
    #[bpaf(short, long, argument("PATH"))]
    config: Option<PathBuf>,
    /// Enable debug logging. RUST_LOG is honoured in this mode.
    #[bpaf(short, long)]
    debug: bool,
    #[bpaf(external(command))]
    command: Command,
}

#[derive(Clone, Debug, PartialEq)]
enum Command {
    /// Run the board rotation (default).
    Serve { min_dwell: Option<Duration> },
    /// Validate the config and print when each schedule fires next.
    Check,
}

fn min_dwell() -> impl Parser<Option<Duration>> {
    bpaf::long("min-dwell")
        .help("Minimum time a board stays on screen, overriding the config (e.g. 5s)")
        .argument::<humantime::Duration>("DURATION")
        .map(Duration::from)
        .optional()
}

fn command() -> impl Parser<Command> {
    let serve = min_dwell()
        .map(|min_dwell| Command::Serve { min_dwell })
        .to_options()
        .descr("Run the board rotation")
        .command("serve")
        .help("Run the board rotation (default)");

    let check = bpaf::pure(Command::Check)
        .to_options()
        .descr("Validate the config and print when each schedule fires next")
        .command("check")
        .help("Validate the config and print when each schedule fires next");

    bpaf::construct!([serve, check]).fallback(Command::Serve { min_dwell: None })
}

/// Build boards, canvases and schedule windows from the config
fn build_matrix(config: &Config, min_dwell: Option<Duration>) -> Result<Matrix, Box<dyn Error>> {
    config.validate()?;

    let mut matrix_config = config.matrix.clone();
    if let Some(min_dwell) = min_dwell {
        matrix_config.min_dwell = min_dwell;
    }

    let (width, height) = config.matrix.hardware.size();
    info!(
        width,
        height,
        mapping = %config.matrix.hardware.hardware_mapping,
        brightness = config.matrix.hardware.brightness,
        "registering matrix canvas"
    );
    let canvases: Vec<Box<dyn Canvas>> = vec![Box::new(NullCanvas::new(width, height))];

    let mut boards: Vec<Arc<dyn Board>> = Vec::new();
    let mut windows = Vec::new();
    for entry in &config.boards {
        let renderer = PatternRenderer::new(&entry.name, entry.colors.clone());
        let board: Arc<dyn Board> = Arc::new(BasicBoard::new(renderer, &entry.board));
        windows.extend(ScheduleWindow::for_board(
            &board,
            &entry.board.on_times,
            &entry.board.off_times,
        )?);
        boards.push(board);
    }

    let mut matrix = Matrix::new(matrix_config, canvases, boards)?;
    for window in windows {
        matrix.add_window(window);
    }
    Ok(matrix)
}

fn check(config: &Config) -> Result<(), Box<dyn Error>> {
    let matrix = build_matrix(config, None)?;
    let (width, height) = config.matrix.hardware.size();
    println!(
        "config ok: {} boards on a {width}x{height} matrix",
        matrix.boards().len()
    );

    let now = SystemClock.now();
    for window in matrix.windows() {
        match window.schedule.next_after(now) {
            Some(next) => println!("{:<20} {:?} next at {next}", window.schedule, window.action),
            None => println!("{:<20} {:?} never fires", window.schedule, window.action),
        }
    }
    Ok(())
}

async fn serve(matrix: Matrix) -> Result<(), Box<dyn Error>> {
    let shutdown = CancellationToken::new();
    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutting down");
                    shutdown.cancel();
                },
                Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
            }
        })
    };

    let res = matrix.serve(&shutdown).await;
    ctrl_c.abort();
    matrix.close().await;
    res?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = cli().run();
    logging::init(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_create()?,
    };

    match cli.command {
        Command::Check => check(&config),
        Command::Serve { min_dwell } => {
            let _lock = lock::Lock::acquire()?;
            let matrix = build_matrix(&config, min_dwell)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(matrix))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_invariants() {
        cli().check_invariants(false);
    }

    #[test]
    fn generate_docs() {
        let app = env!("CARGO_PKG_NAME");
        let options = cli();

        let roff = options.render_manpage(app, bpaf::doc::Section::General, None, None, None);
        assert!(roff.contains("serve"));

        let md = options.header("").render_markdown(app);
        assert!(md.contains("serve"));
        assert!(md.contains("check"));
    }

    #[test]
    fn serve_is_the_default_command() {
        let parsed = cli().run_inner(&["--debug"]).unwrap();
        assert!(parsed.debug);
        assert_eq!(parsed.command, Command::Serve { min_dwell: None });

        let parsed = cli()
            .run_inner(&["serve", "--min-dwell", "2s 500ms"])
            .unwrap();
        assert_eq!(
            parsed.command,
            Command::Serve {
                min_dwell: Some(Duration::from_millis(2500))
            }
        );

        let parsed = cli().run_inner(&["-c", "/tmp/m.toml", "check"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/m.toml")));
        assert_eq!(parsed.command, Command::Check);
    }

    #[test]
    fn builds_matrix_with_board_windows() {
        let mut config = Config::default();
        config.matrix.serve_web_ui = false;
        config.boards[0].board.on_times = vec!["0 8 * * *".into()];
        config.boards[0].board.off_times = vec!["0 22 * * *".into()];

        let matrix = build_matrix(&config, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(matrix.boards().len(), 1);
        // on, off and the daily cache clear
        assert_eq!(matrix.windows().len(), 3);
    }

    #[test]
    fn build_rejects_bad_board_schedule() {
        let mut config = Config::default();
        config.boards[0].board.off_times = vec!["bogus".into()];
        assert!(build_matrix(&config, None).is_err());
    }
}
