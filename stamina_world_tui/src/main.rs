use anyhow::{Context, Result};
use clap::Parser;
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use stamina_world_core::{
    Action, Position,
    agent::QAgent,
    brain,
    config::SimConfig,
    stats::{CsvStatsLog, EpisodeRecord},
    storage::{
        JsonMapCatalog, JsonSpawnPreferences, MapCatalogStore, SavedMap, SpawnPreference,
        SpawnPreferenceSync, now_unix_seconds,
    },
    terrain::{Effect, TerrainKind},
    training::{Trainer, TrainingError},
    world::{Phase, World},
};
use std::{
    collections::VecDeque,
    io::{self, Stdout},
    path::PathBuf,
    time::{Duration, Instant},
};

/// Episodes kept for the stamina chart.
const RECENT_EPISODES: usize = 60;
/// Goal-history entries shown in the side panel.
const HISTORY_SHOWN: usize = 8;
const MIN_TICK_MS: u64 = 1;
const MAX_TICK_MS: u64 = 1000;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON config file; defaults apply to anything it leaves out
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,
    /// Value table, loaded at start and saved on exit
    #[arg(long, default_value = "q_brain.csv")]
    brain: PathBuf,
    /// Per-episode training log
    #[arg(long, default_value = "training_log.csv")]
    stats: PathBuf,
    /// Saved-map catalog
    #[arg(long, default_value = "saved_maps.json")]
    maps: PathBuf,
    /// Spawn preference file
    #[arg(long, default_value = "spawn_settings.json")]
    spawn: PathBuf,
    /// Seed for both map generation and the agent
    #[arg(long)]
    seed: Option<u64>,
    /// Train without a terminal UI
    #[arg(long)]
    headless: bool,
    /// Episodes to run in headless mode
    #[arg(short, long, default_value_t = 1000)]
    episodes: u64,
    /// Delay between training steps in the UI
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Play,
    Train,
}

struct App {
    /// The world and the learning agent.
    trainer: Trainer<CsvStatsLog>,
    catalog: JsonMapCatalog,
    saved_maps: Vec<SavedMap>,
    /// Index into `saved_maps` of the layout `reset(true)` replays.
    selected: Option<usize>,
    spawn_sync: SpawnPreferenceSync<JsonSpawnPreferences>,
    brain_path: PathBuf,
    mode: Mode,
    tick_rate: Duration,
    recent: VecDeque<EpisodeRecord>,
    status: String,
    /// Flag to control the main loop.
    should_quit: bool,
}

impl App {
    fn new(args: &Args, config: SimConfig) -> Result<Self> {
        let spawn_sync = SpawnPreferenceSync::new(JsonSpawnPreferences::new(&args.spawn));
        let trainer = build_trainer(args, config, spawn_sync.saved())?;
        let catalog = JsonMapCatalog::new(&args.maps);
        let saved_maps = catalog.load();
        Ok(App {
            trainer,
            catalog,
            saved_maps,
            selected: None,
            spawn_sync,
            brain_path: args.brain.clone(),
            mode: Mode::Play,
            tick_rate: Duration::from_millis(args.tick_ms.clamp(MIN_TICK_MS, MAX_TICK_MS)),
            recent: VecDeque::with_capacity(RECENT_EPISODES),
            status: "Arrows move, t trains".to_string(),
            should_quit: false,
        })
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) -> Result<()> {
        if self.mode != Mode::Train {
            return Ok(());
        }
        let report = match self.trainer.tick() {
            Ok(report) => report,
            // The episode was logged and the world reset; only the file is stale.
            Err(TrainingError::Checkpoint(e)) => {
                self.status = format!("Checkpoint failed: {e}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(record) = report.finished {
            self.status = format!(
                "Episode {} ended: {} after {} steps",
                record.trial, record.outcome, record.steps
            );
            if self.recent.len() == RECENT_EPISODES {
                self.recent.pop_front();
            }
            self.recent.push_back(record);
        }
        Ok(())
    }

    /// Moves the agent by hand. Nothing is learned from manual play.
    fn play(&mut self, action: Action) -> Result<()> {
        if self.mode != Mode::Play {
            return Ok(());
        }
        let outcome = self.trainer.world_mut().step(action);
        let world = self.trainer.world();
        if outcome.reached_goal {
            self.status = format!("Goal reached with {} stamina", world.stamina());
            self.trainer.restart(true)?;
        } else if world.is_exhausted() {
            self.status = "Out of stamina, retrying".to_string();
            self.trainer.retry()?;
        }
        Ok(())
    }

    fn new_map(&mut self) -> Result<()> {
        self.selected = None;
        self.trainer.world_mut().select_layout(None);
        self.trainer.restart(false)?;
        self.status = "New map".to_string();
        Ok(())
    }

    fn retry(&mut self) -> Result<()> {
        self.trainer.retry()?;
        self.status = "Retrying map".to_string();
        Ok(())
    }

    fn save_map(&mut self) {
        let id = SavedMap::unique_id(&self.saved_maps, now_unix_seconds());
        let map = SavedMap::from_template(id.clone(), self.trainer.world().template());
        self.status = match self.catalog.push(&mut self.saved_maps, map) {
            Ok(()) => format!("Saved {id}"),
            Err(e) => format!("Saving map failed: {e}"),
        };
    }

    /// Steps through the catalog, then back to generated maps.
    fn cycle_saved_map(&mut self) -> Result<()> {
        if self.saved_maps.is_empty() {
            self.status = "No saved maps".to_string();
            return Ok(());
        }
        let next = match self.selected {
            None => Some(0),
            Some(i) if i + 1 < self.saved_maps.len() => Some(i + 1),
            Some(_) => None,
        };
        let Some(index) = next else {
            return self.new_map();
        };
        let map = &self.saved_maps[index];
        let template = match map.to_template() {
            Ok(template) => template,
            Err(e) => {
                self.status = format!("{} is unreadable: {e}", map.id);
                return Ok(());
            }
        };
        let id = map.id.clone();
        let previous = self.trainer.world().selected_layout().cloned();
        self.trainer.world_mut().select_layout(Some(template));
        match self.trainer.restart(true) {
            Ok(()) => {
                self.selected = Some(index);
                self.status = format!("Playing {id}");
            }
            Err(e) => {
                self.trainer.world_mut().select_layout(previous);
                self.status = format!("{id} does not fit this world: {e}");
            }
        }
        Ok(())
    }

    fn toggle_keep_spawn(&mut self) {
        let keep = !self.trainer.world().spawn_preference().keep_spawn;
        let preference = self.trainer.world_mut().set_keep_spawn(keep);
        self.status = match self.spawn_sync.sync(preference) {
            Ok(_) if keep => "Keeping spawn".to_string(),
            Ok(_) => "Spawn released".to_string(),
            Err(e) => format!("Saving spawn preference failed: {e}"),
        };
    }

    /// Persists the remembered spawn once a new map has moved it.
    fn sync_spawn(&mut self) {
        let current = self.trainer.world().spawn_preference();
        if let Err(e) = self.spawn_sync.sync(current) {
            self.status = format!("Saving spawn preference failed: {e}");
        }
    }

    fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            Mode::Play => Mode::Train,
            Mode::Train => Mode::Play,
        };
    }

    fn save_brain(&mut self) {
        self.status = match self.trainer.save_brain(&self.brain_path) {
            Ok(()) => format!("Brain saved to {}", self.brain_path.display()),
            Err(e) => format!("Saving brain failed: {e}"),
        };
    }

    fn faster(&mut self) {
        let ms = (self.tick_rate.as_millis() as u64 / 2).max(MIN_TICK_MS);
        self.tick_rate = Duration::from_millis(ms);
    }

    fn slower(&mut self) {
        let ms = (self.tick_rate.as_millis() as u64 * 2).min(MAX_TICK_MS);
        self.tick_rate = Duration::from_millis(ms);
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }
}

fn build_trainer(
    args: &Args,
    config: SimConfig,
    spawn_preference: SpawnPreference,
) -> Result<Trainer<CsvStatsLog>> {
    let world = World::new(config.world, config.terrain, spawn_preference)
        .context("Failed to build the world")?;
    let (table, epsilon) = brain::load(&args.brain);
    let agent = QAgent::with_table(config.learning, table, epsilon);
    Ok(Trainer::new(
        world,
        agent,
        config.rewards,
        config.training,
        CsvStatsLog::new(&args.stats),
    )
    .with_checkpoint(&args.brain))
}

fn load_config(args: &Args) -> Result<SimConfig> {
    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SimConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.world.seed = Some(seed);
        config.learning.seed = Some(seed);
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = load_config(&args)?;

    if args.headless {
        return run_headless(&args, config);
    }

    let mut app = App::new(&args, config)?;

    // Set up the terminal
    let mut terminal = setup_terminal()?;

    // Run the main application loop, restoring the terminal even on error
    let result = run_app(&mut terminal, &mut app);
    restore_terminal(&mut terminal)?;
    result?;

    if let Err(e) = app.trainer.save_brain(&app.brain_path) {
        eprintln!("Failed to save brain: {e}");
    }
    Ok(())
}

fn run_headless(args: &Args, config: SimConfig) -> Result<()> {
    let mut spawn_sync = SpawnPreferenceSync::new(JsonSpawnPreferences::new(&args.spawn));
    let mut trainer = build_trainer(args, config, spawn_sync.saved())?;
    let summary = trainer.run(args.episodes)?;
    spawn_sync
        .sync(trainer.world().spawn_preference())
        .with_context(|| format!("Failed to save spawn preference to {}", args.spawn.display()))?;
    trainer
        .save_brain(&args.brain)
        .with_context(|| format!("Failed to save brain to {}", args.brain.display()))?;

    println!("Episodes:     {}", summary.episodes);
    println!(
        "Goals:        {} ({:.1}%)",
        summary.goals,
        summary.success_rate() * 100.0
    );
    println!("Deaths:       {}", summary.deaths);
    println!("Timeouts:     {}", summary.timeouts);
    println!("Mean steps:   {:.1}", summary.mean_steps());
    println!("Epsilon:      {:.4}", trainer.agent().epsilon());
    println!("Known states: {}", trainer.agent().table().len());
    Ok(())
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = app
            .tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(app, key.code)?;
                    app.sync_spawn();
                }
            }
        }

        if last_tick.elapsed() >= app.tick_rate {
            app.tick()?;
            app.sync_spawn();
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn handle_key(app: &mut App, code: KeyCode) -> Result<()> {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => app.quit(),
        KeyCode::Up => app.play(Action::Up)?,
        KeyCode::Down => app.play(Action::Down)?,
        KeyCode::Left => app.play(Action::Left)?,
        KeyCode::Right => app.play(Action::Right)?,
        KeyCode::Char('n') => app.new_map()?,
        KeyCode::Char('r') => app.retry()?,
        KeyCode::Char('m') => app.save_map(),
        KeyCode::Char('l') => app.cycle_saved_map()?,
        KeyCode::Char('k') => app.toggle_keep_spawn(),
        KeyCode::Char('t') => app.toggle_mode(),
        KeyCode::Char('s') => app.save_brain(),
        KeyCode::Char('+') | KeyCode::Char('=') => app.faster(),
        KeyCode::Char('-') => app.slower(),
        _ => {}
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(7),
            Constraint::Length(3),
        ])
        .split(frame.area());
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_layout[0]);

    render_map(frame, top[0], app.trainer.world());
    render_status(frame, top[1], app);
    render_chart(frame, main_layout[1], &app.recent);

    let help_text = Paragraph::new(
        "arrows move | n new | r retry | m save map | l saved maps | k keep spawn | t train | s save brain | +/- speed | q quit",
    )
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

fn terrain_style(kind: TerrainKind) -> Style {
    match kind {
        TerrainKind::Grass => Style::default().fg(Color::Green),
        TerrainKind::Heavy => Style::default().fg(Color::Yellow),
        TerrainKind::River => Style::default().fg(Color::Blue),
        TerrainKind::Bridge => Style::default().fg(Color::Magenta),
        TerrainKind::Reward => Style::default().fg(Color::Cyan).bold(),
        TerrainKind::Trap => Style::default().fg(Color::Red).bold(),
        TerrainKind::Obstacle => Style::default().fg(Color::DarkGray),
        TerrainKind::Goal => Style::default().fg(Color::LightGreen).bold(),
    }
}

/// Renders the grid with each cell's stamina effect.
fn render_map(frame: &mut Frame, area: Rect, world: &World) {
    let terrain = world.terrain();
    let effects = world.effects();
    let agent = world.agent();

    let mut lines: Vec<Line> = Vec::with_capacity(terrain.height());
    for y in 0..terrain.height() {
        let mut spans: Vec<Span> = Vec::with_capacity(terrain.width());
        for x in 0..terrain.width() {
            let position = Position::new(x, y);
            let kind = terrain[position];
            let span = if position == agent {
                Span::styled("  @ ", Style::default().fg(Color::White).bold())
            } else if kind == TerrainKind::Goal {
                Span::styled("  G ", terrain_style(kind))
            } else {
                match effects[position] {
                    Effect::Impassable => Span::styled(" ## ", terrain_style(kind)),
                    Effect::Passable(delta) => {
                        Span::styled(format!("{delta:>3} "), terrain_style(kind))
                    }
                }
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Stamina World").borders(Borders::ALL))
        .alignment(Alignment::Center);
    frame.render_widget(map_paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, app: &App) {
    let world = app.trainer.world();
    let agent = app.trainer.agent();
    let history: Vec<String> = world
        .goal_history()
        .iter()
        .rev()
        .take(HISTORY_SHOWN)
        .map(i32::to_string)
        .collect();
    let mode = match app.mode {
        Mode::Play => "play",
        Mode::Train => "train",
    };
    let map_name = app
        .selected
        .and_then(|i| app.saved_maps.get(i))
        .map_or("generated", |m| m.id.as_str());
    let phase = match world.phase() {
        Phase::Active => "active",
        Phase::TerminalPending => "goal reached",
    };

    let stamina_style = if world.stamina() > 20 {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::Red).bold()
    };
    let lines = vec![
        Line::from(vec![
            Span::raw("Stamina: "),
            Span::styled(world.stamina().to_string(), stamina_style),
        ]),
        Line::from(format!("Phase: {phase}")),
        Line::from(format!("Mode: {mode} ({} ms)", app.tick_rate.as_millis())),
        Line::from(format!("Map: {map_name}")),
        Line::from(format!("Saved maps: {}", app.saved_maps.len())),
        Line::from(format!(
            "Keep spawn: {}",
            if world.spawn_preference().keep_spawn { "on" } else { "off" }
        )),
        Line::from(format!("Trial: {}", app.trainer.trial())),
        Line::from(format!("Steps: {}", app.trainer.steps())),
        Line::from(format!("Epsilon: {:.4}", agent.epsilon())),
        Line::from(format!("Known states: {}", agent.table().len())),
        Line::from(format!("Goals (latest first): {}", history.join(" "))),
        Line::from(""),
        Line::from(Span::styled(
            app.status.as_str(),
            Style::default().fg(Color::Yellow),
        )),
    ];

    let status = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().title("Status").borders(Borders::ALL));
    frame.render_widget(status, area);
}

/// Stamina left at the end of recent training episodes.
fn render_chart(frame: &mut Frame, area: Rect, recent: &VecDeque<EpisodeRecord>) {
    let data: Vec<u64> = recent
        .iter()
        .map(|r| u64::try_from(r.stamina_left).unwrap_or(0))
        .collect();
    let sparkline = Sparkline::default()
        .block(
            Block::default()
                .title("Stamina left per episode")
                .borders(Borders::ALL),
        )
        .data(&data)
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(sparkline, area);
}
