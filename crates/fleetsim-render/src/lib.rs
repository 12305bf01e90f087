//! Terminal rendering layer for FleetSim.
//!
//! Consumes only the core's read-only queries: truck positions plus the
//! reached/unreached waypoint partition. Interactive sessions drive the
//! simulation loop at a fixed cadence; the env-gated headless mode renders
//! against a test backend and emits a machine-readable report instead.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use fleetsim_core::{DispatchStatus, FleetWorld, Position};
use ratatui::{
    Frame, Terminal,
    backend::Backend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Sparkline},
};
use serde::Serialize;
use tracing::info;

/// World handle shared between the driver and renderer layers.
pub type SharedWorld = Arc<Mutex<FleetWorld>>;

/// Shared context passed to renderer implementations.
pub struct RendererContext {
    pub world: SharedWorld,
}

pub trait Renderer {
    /// Stable identifier describing the renderer implementation.
    fn name(&self) -> &'static str;

    /// Launch the renderer; blocks until the rendering session completes.
    fn run(&self, ctx: RendererContext) -> Result<()>;
}

const TARGET_SIM_HZ: f32 = 10.0;
const UI_TICK_MILLIS: u64 = 50;
const DEFAULT_HEADLESS_FRAMES: usize = 600;
const MAX_HEADLESS_FRAMES: usize = 5_000;

/// Marker colors cycle in fleet order, matching the well-known truck names.
const TRUCK_COLORS: [Color; 6] = [
    Color::Red,
    Color::Green,
    Color::Blue,
    Color::Yellow,
    Color::Cyan,
    Color::Magenta,
];

const UNREACHED_STYLE_COLOR: Color = Color::Blue;
const REACHED_STYLE_COLOR: Color = Color::LightMagenta;

fn truck_color(index: usize) -> Color {
    TRUCK_COLORS[index % TRUCK_COLORS.len()]
}

/// Ratatui renderer driving the dispatch loop in a terminal session.
pub struct TerminalRenderer {
    tick_interval: Duration,
    draw_interval: Duration,
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs_f32(1.0 / TARGET_SIM_HZ),
            draw_interval: Duration::from_millis(UI_TICK_MILLIS),
        }
    }
}

impl Renderer for TerminalRenderer {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn run(&self, ctx: RendererContext) -> Result<()> {
        if std::env::var_os("FLEETSIM_HEADLESS").is_some() {
            let report = self.run_headless(ctx)?;
            info!(
                frames = report.frames,
                ticks_simulated = report.ticks_simulated,
                final_tick = report.final_tick,
                final_status = %report.final_status,
                reached = report.reached_total,
                remaining = report.remaining_final,
                "Headless dispatch session finished",
            );
            return Ok(());
        }
        self.run_interactive(ctx)
    }
}

impl TerminalRenderer {
    fn run_interactive(&self, ctx: RendererContext) -> Result<()> {
        enable_raw_mode().context("failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
        let backend = ratatui::backend::CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to build terminal")?;

        let result = self.event_loop(&mut terminal, ctx);

        disable_raw_mode().context("failed to disable raw mode")?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)
            .context("failed to leave alternate screen")?;
        terminal.show_cursor().context("failed to restore cursor")?;
        result
    }

    fn event_loop<B: Backend>(
        &self,
        terminal: &mut Terminal<B>,
        ctx: RendererContext,
    ) -> Result<()> {
        let mut app = TerminalApp::new(ctx.world);
        let mut last_tick = Instant::now();
        let mut last_draw = Instant::now();

        loop {
            if !app.paused && last_tick.elapsed() >= self.tick_interval {
                app.step_once();
                last_tick = Instant::now();
            }
            if last_draw.elapsed() >= self.draw_interval {
                app.refresh_snapshot();
                terminal.draw(|frame| app.draw(frame))?;
                last_draw = Instant::now();
            }

            if event::poll(Duration::from_millis(10)).context("event poll failed")? {
                if let Event::Key(key) = event::read().context("event read failed")? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char(' ') => app.paused = !app.paused,
                        KeyCode::Char('s') => {
                            app.step_once();
                            app.paused = true;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn run_headless(&self, ctx: RendererContext) -> Result<HeadlessReport> {
        let backend = ratatui::backend::TestBackend::new(80, 30);
        let mut terminal = Terminal::new(backend).context("failed to build test backend")?;
        let mut app = TerminalApp::new(ctx.world);
        app.refresh_snapshot();
        let mut report = HeadlessReport::new(&app.snapshot);

        for _ in 0..headless_frame_budget() {
            app.step_once();
            app.refresh_snapshot();
            report.record(&app.snapshot);
            terminal.draw(|frame| app.draw(frame))?;
            if app.snapshot.status.is_terminal() {
                break;
            }
        }
        report.finalize(&app.snapshot);

        if let Some(path) = report_path_from_env() {
            report.write_json(&path).with_context(|| {
                format!("failed to write headless report to {}", path.display())
            })?;
        }
        Ok(report)
    }
}

fn headless_frame_budget() -> usize {
    std::env::var("FLEETSIM_HEADLESS_FRAMES")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .map(|value| value.min(MAX_HEADLESS_FRAMES))
        .unwrap_or(DEFAULT_HEADLESS_FRAMES)
}

fn report_path_from_env() -> Option<PathBuf> {
    std::env::var_os("FLEETSIM_HEADLESS_REPORT").map(PathBuf::from)
}

/// Cloned view of the world, refreshed once per draw.
#[derive(Debug, Clone)]
struct Snapshot {
    tick: u64,
    status: DispatchStatus,
    region: u32,
    trucks: Vec<TruckView>,
    unreached: Vec<Position>,
    reached: Vec<Position>,
    remaining_series: Vec<u64>,
}

#[derive(Debug, Clone)]
struct TruckView {
    name: String,
    position: Position,
    destination: Option<Position>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            tick: 0,
            status: DispatchStatus::Running,
            region: 0,
            trucks: Vec::new(),
            unreached: Vec::new(),
            reached: Vec::new(),
            remaining_series: Vec::new(),
        }
    }

    fn from_world(world: &FleetWorld) -> Self {
        let trucks = world
            .truck_snapshots()
            .into_iter()
            .map(|snapshot| TruckView {
                destination: snapshot
                    .assignment
                    .map(|waypoint| world.waypoints()[waypoint].position),
                name: snapshot.name,
                position: snapshot.position,
            })
            .collect();
        Self {
            tick: world.tick().0,
            status: world.status(),
            region: world.config().region_size,
            trucks,
            unreached: world.unreached_positions(),
            reached: world.reached_positions(),
            remaining_series: world
                .history()
                .map(|summary| summary.remaining as u64)
                .collect(),
        }
    }

    fn total_waypoints(&self) -> usize {
        self.unreached.len() + self.reached.len()
    }
}

struct TerminalApp {
    world: SharedWorld,
    paused: bool,
    snapshot: Snapshot,
}

impl TerminalApp {
    fn new(world: SharedWorld) -> Self {
        Self {
            world,
            paused: false,
            snapshot: Snapshot::empty(),
        }
    }

    /// Advance the simulation one tick, logging terminal transitions.
    fn step_once(&mut self) {
        let Ok(mut world) = self.world.lock() else {
            return;
        };
        if world.status().is_terminal() {
            return;
        }
        let events = world.step();
        if events.status.is_terminal() {
            info!(
                tick = events.tick.0,
                status = %events.status,
                remaining = world.remaining(),
                "Dispatch run ended",
            );
        }
    }

    fn refresh_snapshot(&mut self) {
        if let Ok(world) = self.world.lock() {
            self.snapshot = Snapshot::from_world(&world);
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let snapshot = self.snapshot.clone();

        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(frame.area());

        self.draw_header(frame, outer[0], &snapshot);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
            .split(outer[1]);

        self.draw_map(frame, body[0], &snapshot);

        let sidebar = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(7),
                Constraint::Length(5),
                Constraint::Min(4),
            ])
            .split(body[1]);

        self.draw_stats(frame, sidebar[0], &snapshot);
        self.draw_trend(frame, sidebar[1], &snapshot);
        self.draw_fleet(frame, sidebar[2], &snapshot);
    }

    fn draw_header(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let status_style = match snapshot.status {
            DispatchStatus::Running => Style::default().fg(Color::Yellow),
            DispatchStatus::Complete => Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
            DispatchStatus::Stalled => Style::default()
                .fg(Color::Red)
                .add_modifier(Modifier::BOLD),
        };
        let line = Line::from(vec![
            Span::styled("FleetSim", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(format!("  tick {}  ", snapshot.tick)),
            Span::styled(snapshot.status.to_string(), status_style),
            Span::raw(format!(
                "  {} / {} waypoints reached",
                snapshot.reached.len(),
                snapshot.total_waypoints(),
            )),
            Span::raw(if self.paused { "  [paused]" } else { "" }),
        ]);
        let paragraph = Paragraph::new(line).block(
            Block::default()
                .borders(Borders::ALL)
                .title("dispatch status"),
        );
        frame.render_widget(paragraph, area);
    }

    fn draw_map(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let title = format!("Region {}×{}", snapshot.region, snapshot.region);
        let block = Block::default().title(title).borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if inner.width < 2 || inner.height < 2 || snapshot.region == 0 {
            return;
        }

        let width = inner.width as usize;
        let height = inner.height as usize;
        let mut grid = vec![(' ', Style::default()); width * height];
        let span = snapshot.region as f32;

        for position in &snapshot.reached {
            let idx = project(*position, span, width, height);
            grid[idx] = ('o', Style::default().fg(REACHED_STYLE_COLOR));
        }
        for position in &snapshot.unreached {
            let idx = project(*position, span, width, height);
            grid[idx] = ('o', Style::default().fg(UNREACHED_STYLE_COLOR));
        }
        // Trucks paint last so they stay visible on contested cells.
        for (index, truck) in snapshot.trucks.iter().enumerate() {
            let idx = project(truck.position, span, width, height);
            grid[idx] = (
                '^',
                Style::default()
                    .fg(truck_color(index))
                    .add_modifier(Modifier::BOLD),
            );
        }

        let mut lines = Vec::with_capacity(height);
        for y in 0..height {
            let mut spans = Vec::with_capacity(width);
            for x in 0..width {
                let (glyph, style) = grid[y * width + x];
                spans.push(Span::styled(glyph.to_string(), style));
            }
            lines.push(Line::from(spans));
        }
        frame.render_widget(Paragraph::new(Text::from(lines)), inner);
    }

    fn draw_stats(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let lines = vec![
            Line::from(format!("status     {}", snapshot.status)),
            Line::from(format!("tick       {}", snapshot.tick)),
            Line::from(format!("trucks     {}", snapshot.trucks.len())),
            Line::from(format!("reached    {}", snapshot.reached.len())),
            Line::from(format!("remaining  {}", snapshot.unreached.len())),
        ];
        let paragraph = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::ALL).title("stats"));
        frame.render_widget(paragraph, area);
    }

    fn draw_trend(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let spark = Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title("remaining"))
            .data(&snapshot.remaining_series)
            .style(Style::default().fg(Color::Cyan));
        frame.render_widget(spark, area);
    }

    fn draw_fleet(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let items: Vec<ListItem> = snapshot
            .trucks
            .iter()
            .enumerate()
            .map(|(index, truck)| {
                let destination = match truck.destination {
                    Some(target) => format!("→ {target}"),
                    None => "idle".to_string(),
                };
                let line = Line::from(vec![
                    Span::styled(
                        format!("{:<9}", truck.name),
                        Style::default().fg(truck_color(index)),
                    ),
                    Span::raw(format!("{}  {destination}", truck.position)),
                ]);
                ListItem::new(line)
            })
            .collect();
        let block = Block::default().borders(Borders::ALL).title("fleet");
        frame.render_widget(List::new(items).block(block), area);
    }
}

/// Map a world position onto a flat glyph-grid index.
fn project(position: Position, span: f32, width: usize, height: usize) -> usize {
    let x = (position.x / span * width as f32)
        .floor()
        .clamp(0.0, (width - 1) as f32) as usize;
    let y = (position.y / span * height as f32)
        .floor()
        .clamp(0.0, (height - 1) as f32) as usize;
    y * width + x
}

/// Machine-readable summary of a headless session.
#[derive(Debug, Clone, Serialize)]
pub struct HeadlessReport {
    pub initial_remaining: usize,
    pub frames: usize,
    pub ticks_simulated: u64,
    pub final_tick: u64,
    pub final_status: String,
    pub reached_total: usize,
    pub remaining_final: usize,
}

impl HeadlessReport {
    fn new(snapshot: &Snapshot) -> Self {
        Self {
            initial_remaining: snapshot.unreached.len(),
            frames: 0,
            ticks_simulated: 0,
            final_tick: snapshot.tick,
            final_status: snapshot.status.to_string(),
            reached_total: snapshot.reached.len(),
            remaining_final: snapshot.unreached.len(),
        }
    }

    fn record(&mut self, snapshot: &Snapshot) {
        self.frames += 1;
        self.ticks_simulated = snapshot.tick;
    }

    fn finalize(&mut self, snapshot: &Snapshot) {
        self.final_tick = snapshot.tick;
        self.final_status = snapshot.status.to_string();
        self.reached_total = snapshot.reached.len();
        self.remaining_final = snapshot.unreached.len();
    }

    fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).context("failed to serialize headless report")?;
        Ok(())
    }
}
