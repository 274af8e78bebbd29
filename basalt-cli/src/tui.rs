//! Interactive stepper: register grid with change highlighting, CSR panel,
//! console surface, and a toggleable disassembly view.

use std::io::{stdout, Stdout};
use std::time::Duration;

use basalt_core::asm::Program;
use basalt_core::registers::Specifier;
use basalt_core::system_bus::SystemBus;
use basalt_core::{Interpreter, StateDump, StepResult};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::{Frame, Terminal};

/// Sets up the terminal on creation, and resets it back when dropped.
struct TermSetupDropGuard {}

impl TermSetupDropGuard {
    fn new() -> std::io::Result<Self> {
        stdout().execute(EnterAlternateScreen)?;
        enable_raw_mode()?;
        Ok(Self {})
    }
}

impl Drop for TermSetupDropGuard {
    fn drop(&mut self) {
        // Ignore all errors on drop, resetting the terminal is on a best
        // effort basis.
        let _ = stdout().execute(LeaveAlternateScreen);
        let _ = stdout().execute(crossterm::cursor::Show);
        let _ = disable_raw_mode();
    }
}

struct Theme {
    accent: Color,
    changed: Color,
    dim: Color,
}

impl Theme {
    const DARK: Self = Self {
        accent: Color::Cyan,
        changed: Color::Yellow,
        dim: Color::DarkGray,
    };
    const LIGHT: Self = Self {
        accent: Color::Blue,
        changed: Color::Red,
        dim: Color::Gray,
    };
}

struct App {
    interp: Interpreter<SystemBus>,
    program: Program,
    /// Dump from before the most recent step(s), for change highlighting.
    previous: StateDump,
    current: StateDump,
    console: String,
    status: String,
    halted: bool,
    show_listing: bool,
    dark: bool,
}

impl App {
    fn new(program: Program, interp: Interpreter<SystemBus>) -> Self {
        let dump = interp.dump_state();
        Self {
            interp,
            program,
            previous: dump.clone(),
            current: dump,
            console: String::new(),
            status: String::from("ready"),
            halted: false,
            show_listing: false,
            dark: true,
        }
    }

    fn theme(&self) -> &'static Theme {
        match self.dark {
            true => &Theme::DARK,
            false => &Theme::LIGHT,
        }
    }

    /// Runs up to `count` steps, stopping early on halt. The pre-batch dump
    /// becomes the diff base for highlighting.
    fn step(&mut self, count: u32) {
        if self.halted {
            self.status = String::from("halted (q to quit)");
            return;
        }
        self.previous = self.current.clone();
        for _ in 0..count {
            let result = self.interp.step();
            let output = self.interp.bus_mut().console_mut().take_output();
            self.console.push_str(&String::from_utf8_lossy(&output));
            match result {
                StepResult::Retired => {
                    self.status = format!("retired, pc {:#010x}", self.interp.registers().pc());
                }
                StepResult::Trap { cause, epc } => {
                    self.status = format!("trap {cause:?} at {epc:#010x}");
                }
                StepResult::Halted => {
                    self.halted = true;
                    self.status = String::from("ebreak: halted");
                    break;
                }
            }
        }
        self.current = self.interp.dump_state();
    }
}

/// Runs the interactive stepper until the user quits.
pub fn run(program: Program, interp: Interpreter<SystemBus>) -> std::io::Result<()> {
    let guard = TermSetupDropGuard::new()?;
    let mut terminal: Terminal<CrosstermBackend<Stdout>> =
        Terminal::new(CrosstermBackend::new(stdout()))?;
    let mut app = App::new(program, interp);

    loop {
        terminal.draw(|frame| draw(frame, &app))?;
        if !event::poll(Duration::from_millis(250))? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('s') | KeyCode::Char(' ') => app.step(1),
                KeyCode::Char('r') => app.step(100),
                KeyCode::Char('d') => app.show_listing = !app.show_listing,
                KeyCode::Char('t') => app.dark = !app.dark,
                _ => {}
            }
        }
    }

    drop(guard);
    Ok(())
}

fn draw(frame: &mut Frame, app: &App) {
    let [main_area, help_area] =
        Layout::vertical([Constraint::Fill(1), Constraint::Length(1)]).areas(frame.size());

    if app.show_listing {
        draw_listing(frame, app, main_area);
    } else {
        let [registers_area, right_area] =
            Layout::horizontal([Constraint::Length(44), Constraint::Fill(1)]).areas(main_area);
        draw_registers(frame, app, registers_area);
        let [csr_area, console_area] =
            Layout::vertical([Constraint::Length(9), Constraint::Fill(1)]).areas(right_area);
        draw_csrs(frame, app, csr_area);
        draw_console(frame, app, console_area);
    }

    let help = Line::from(vec![
        Span::styled(" s", Style::default().fg(app.theme().accent)),
        Span::raw(" step  "),
        Span::styled("r", Style::default().fg(app.theme().accent)),
        Span::raw(" run 100  "),
        Span::styled("d", Style::default().fg(app.theme().accent)),
        Span::raw(" listing  "),
        Span::styled("t", Style::default().fg(app.theme().accent)),
        Span::raw(" theme  "),
        Span::styled("q", Style::default().fg(app.theme().accent)),
        Span::raw(" quit    "),
        Span::styled(&app.status, Style::default().fg(app.theme().dim)),
    ]);
    frame.render_widget(Paragraph::new(help), help_area);
}

fn draw_registers(frame: &mut Frame, app: &App, area: Rect) {
    let theme = app.theme();
    let mut lines = Vec::with_capacity(17);
    lines.push(Line::from(vec![
        Span::styled("pc   ", Style::default().fg(theme.dim)),
        value_span(app.current.pc, app.current.pc != app.previous.pc, theme),
    ]));
    for row in 0..16 {
        let mut spans = Vec::new();
        for column in 0..2 {
            let index = (column * 16 + row) as usize;
            let specifier = Specifier::new(index as u8).unwrap();
            spans.push(Span::styled(
                format!("{:<4} ", specifier.abi_name()),
                Style::default().fg(theme.dim),
            ));
            spans.push(value_span(
                app.current.regs[index],
                app.current.regs[index] != app.previous.regs[index],
                theme,
            ));
            if column == 0 {
                spans.push(Span::raw("    "));
            }
        }
        lines.push(Line::from(spans));
    }
    let block = Block::bordered().title("registers");
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_csrs(frame: &mut Frame, app: &App, area: Rect) {
    let theme = app.theme();
    let current = &app.current;
    let previous = &app.previous;
    let rows: [(&str, String, bool); 7] = [
        (
            "priv",
            format!("{} (mpp {})", current.privilege, current.mpp),
            current.privilege != previous.privilege || current.mpp != previous.mpp,
        ),
        (
            "mscratch",
            format!("{:08x}", current.mscratch),
            current.mscratch != previous.mscratch,
        ),
        (
            "mtvec",
            format!("{:08x}", current.mtvec),
            current.mtvec != previous.mtvec,
        ),
        (
            "mepc",
            format!("{:08x}", current.mepc),
            current.mepc != previous.mepc,
        ),
        (
            "mcause",
            format!("{:08x}", current.mcause),
            current.mcause != previous.mcause,
        ),
        (
            "mtval",
            format!("{:08x}", current.mtval),
            current.mtval != previous.mtval,
        ),
        (
            "counters",
            format!("cycle {}  instret {}", current.cycle, current.instret),
            false,
        ),
    ];
    let lines: Vec<Line> = rows
        .into_iter()
        .map(|(name, value, changed)| {
            Line::from(vec![
                Span::styled(format!("{name:<9} "), Style::default().fg(theme.dim)),
                match changed {
                    true => Span::styled(
                        value,
                        Style::default()
                            .fg(theme.changed)
                            .add_modifier(Modifier::BOLD),
                    ),
                    false => Span::raw(value),
                },
            ])
        })
        .collect();
    let block = Block::bordered().title("csrs");
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_console(frame: &mut Frame, app: &App, area: Rect) {
    // Show the tail that fits the pane.
    let visible = (area.height as usize).saturating_sub(2);
    let text: Vec<Line> = app
        .console
        .lines()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .take(visible.max(1))
        .rev()
        .map(Line::raw)
        .collect();
    let block = Block::bordered().title("console");
    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn draw_listing(frame: &mut Frame, app: &App, area: Rect) {
    let theme = app.theme();
    let pc = app.current.pc;
    let lines: Vec<Line> = app
        .program
        .dump
        .lines()
        .map(|line| {
            // Highlight the line the pc points at.
            let is_current = u32::from_str_radix(&line[..8], 16) == Ok(pc);
            match is_current {
                true => Line::styled(
                    line.to_string(),
                    Style::default()
                        .fg(theme.accent)
                        .add_modifier(Modifier::BOLD),
                ),
                false => Line::raw(line.to_string()),
            }
        })
        .collect();
    let block = Block::bordered()
        .borders(Borders::ALL)
        .title("assembler dump");
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn value_span(value: u32, changed: bool, theme: &Theme) -> Span<'static> {
    match changed {
        true => Span::styled(
            format!("{value:08x}"),
            Style::default()
                .fg(theme.changed)
                .add_modifier(Modifier::BOLD),
        ),
        false => Span::raw(format!("{value:08x}")),
    }
}
