//! Interactive terminal viewer over a finished [`Analysis`].

use std::error::Error;
use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event as CEvent, KeyCode},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Span, Spans},
    widgets::{
        Axis, BarChart, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table,
        Tabs, Wrap,
    },
    Frame, Terminal,
};

use crate::analysis::Analysis;
use crate::report;

enum Event<I> {
    Input(I),
    Tick,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum MenuItem {
    Report,
    Boxplots,
    Confusion,
    Residuals,
}

impl From<MenuItem> for usize {
    fn from(input: MenuItem) -> usize {
        match input {
            MenuItem::Report => 0,
            MenuItem::Boxplots => 1,
            MenuItem::Confusion => 2,
            MenuItem::Residuals => 3,
        }
    }
}

const MENU_TITLES: [&str; 5] = ["Report", "Boxplots", "Confusion", "Residuals", "Quit"];

struct ViewState {
    active: MenuItem,
    scroll: u16,
    factor: usize,
    level: usize,
    /// Residuals tab shows every row instead of the bin means.
    raw_residuals: bool,
}

impl ViewState {
    fn next_factor(&mut self, analysis: &Analysis) {
        if !analysis.boxplots.is_empty() {
            self.factor = (self.factor + 1) % analysis.boxplots.len();
        }
    }

    fn next_level(&mut self, analysis: &Analysis) {
        if !analysis.binned_residuals.is_empty() {
            self.level = (self.level + 1) % analysis.binned_residuals.len();
        }
    }
}

/// Leaves raw mode when dropped, whichever way [`run`] returns.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            tracing::warn!("failed to leave raw mode: {err}");
        }
    }
}

pub fn run(analysis: &Analysis) -> Result<(), Box<dyn Error>> {
    let report_text = report::render_text(analysis);

    let _raw_mode = RawModeGuard::enable()?;

    let (tx, rx) = mpsc::channel();
    let tick_rate = Duration::from_millis(200);
    thread::spawn(move || {
        let mut last_tick = Instant::now();
        loop {
            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            match event::poll(timeout) {
                Ok(true) => {
                    if let Ok(CEvent::Key(key)) = event::read() {
                        if tx.send(Event::Input(key)).is_err() {
                            break;
                        }
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!("terminal event polling failed: {err}");
                    break;
                }
            }

            if last_tick.elapsed() >= tick_rate {
                if tx.send(Event::Tick).is_err() {
                    break;
                }
                last_tick = Instant::now();
            }
        }
    });

    let stdout = io::stdout();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut state = ViewState {
        active: MenuItem::Report,
        scroll: 0,
        factor: 0,
        level: 0,
        raw_residuals: false,
    };

    loop {
        terminal.draw(|rect| {
            let size = rect.size();
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints([Constraint::Length(3), Constraint::Min(10)].as_ref())
                .split(size);

            let header_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)].as_ref())
                .split(chunks[0]);

            rect.render_widget(menu(state.active), header_chunks[0]);
            rect.render_widget(fit_summary(analysis), header_chunks[1]);

            match state.active {
                MenuItem::Report => {
                    let paragraph = Paragraph::new(report_text.as_str())
                        .block(Block::default().title("Report (j/k to scroll)").borders(Borders::ALL))
                        .scroll((state.scroll, 0));
                    rect.render_widget(paragraph, chunks[1]);
                }
                MenuItem::Boxplots => render_boxplots(rect, chunks[1], analysis, state.factor),
                MenuItem::Confusion => render_confusion(rect, chunks[1], analysis),
                MenuItem::Residuals if state.raw_residuals => {
                    render_raw_residuals(rect, chunks[1], analysis, state.level)
                }
                MenuItem::Residuals => render_residuals(rect, chunks[1], analysis, state.level),
            }
        })?;

        match rx.recv()? {
            Event::Input(event) => match event.code {
                KeyCode::Char('q') => {
                    terminal.clear()?;
                    terminal.show_cursor()?;
                    break;
                }
                KeyCode::Char('h') => state.active = MenuItem::Report,
                KeyCode::Char('b') => state.active = MenuItem::Boxplots,
                KeyCode::Char('c') => state.active = MenuItem::Confusion,
                KeyCode::Char('r') => state.active = MenuItem::Residuals,
                KeyCode::Char('n') => match state.active {
                    MenuItem::Boxplots => state.next_factor(analysis),
                    MenuItem::Residuals => state.next_level(analysis),
                    _ => {}
                },
                KeyCode::Char('v') => state.raw_residuals = !state.raw_residuals,
                KeyCode::Char('j') | KeyCode::Down => state.scroll = state.scroll.saturating_add(1),
                KeyCode::Char('k') | KeyCode::Up => state.scroll = state.scroll.saturating_sub(1),
                _ => {}
            },
            Event::Tick => {}
        }
    }

    Ok(())
}

fn menu(active: MenuItem) -> Tabs<'static> {
    let titles = MENU_TITLES
        .iter()
        .map(|t| {
            let (first, rest) = t.split_at(1);
            Spans::from(vec![
                Span::styled(
                    first,
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::UNDERLINED),
                ),
                Span::styled(rest, Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();

    Tabs::new(titles)
        .select(active.into())
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::Cyan))
        .highlight_style(Style::default().fg(Color::Yellow))
        .divider(Span::raw("|"))
}

fn fit_summary(analysis: &Analysis) -> Paragraph<'static> {
    let lines = vec![
        Spans::from(Span::styled(
            format!(
                "Reduced acc {:.3}  AIC {:.1}",
                analysis.reduced_evaluation.accuracy,
                analysis.reduced.aic()
            ),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Spans::from(Span::styled(
            format!(
                "Full acc {:.3}  AIC {:.1}",
                analysis.full_evaluation.accuracy,
                analysis.full.aic()
            ),
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ];
    Paragraph::new(lines)
        .block(Block::default().title("Fit").borders(Borders::ALL))
        .style(Style::default().fg(Color::Green))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
}

fn render_boxplots<B: Backend>(f: &mut Frame<B>, area: Rect, analysis: &Analysis, factor: usize) {
    let Some(plot) = analysis.boxplots.get(factor) else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(area);

    let medians = plot
        .groups
        .iter()
        .map(|g| (g.level.as_str(), g.median.round().max(0.0) as u64))
        .collect::<Vec<_>>();
    let chart = BarChart::default()
        .block(
            Block::default()
                .title(format!("Median age by {} (n for next factor)", plot.factor))
                .borders(Borders::ALL),
        )
        .data(&medians)
        .bar_width(12)
        .bar_style(Style::default().fg(Color::Yellow))
        .value_style(Style::default().fg(Color::Black).bg(Color::Yellow));
    f.render_widget(chart, chunks[0]);

    let rows = plot.groups.iter().map(|g| {
        Row::new(vec![
            Cell::from(g.level.clone()),
            Cell::from(g.count.to_string()),
            Cell::from(format!("{:.1}", g.min)),
            Cell::from(format!("{:.1}", g.q1)),
            Cell::from(format!("{:.1}", g.median)),
            Cell::from(format!("{:.1}", g.q3)),
            Cell::from(format!("{:.1}", g.max)),
            Cell::from(g.outliers.len().to_string()),
        ])
    });
    let widths = [
        Constraint::Percentage(24),
        Constraint::Percentage(10),
        Constraint::Percentage(11),
        Constraint::Percentage(11),
        Constraint::Percentage(11),
        Constraint::Percentage(11),
        Constraint::Percentage(11),
        Constraint::Percentage(11),
    ];
    let table = Table::new(rows)
        .header(
            Row::new(vec!["level", "n", "min", "q1", "median", "q3", "max", "outliers"])
                .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .block(Block::default().title("Age five-number summary").borders(Borders::ALL))
        .widths(&widths);
    f.render_widget(table, chunks[1]);
}

fn render_confusion<B: Backend>(f: &mut Frame<B>, area: Rect, analysis: &Analysis) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(area);
    let models = [
        ("Reduced model", &analysis.reduced_evaluation),
        ("Full model", &analysis.full_evaluation),
    ];
    for ((title, evaluation), chunk) in models.iter().zip(chunks.iter()) {
        let cm = &evaluation.confusion;
        let levels = cm.levels();
        let mut header = vec!["true \\ pred".to_string()];
        header.extend(levels.iter().cloned());
        let rows = levels.iter().enumerate().map(|(t, level)| {
            let mut cells = vec![Cell::from(level.clone())];
            cells.extend((0..levels.len()).map(|p| {
                let style = if p == t {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default()
                };
                Cell::from(cm.count(t, p).to_string()).style(style)
            }));
            Row::new(cells)
        });
        let widths = vec![Constraint::Percentage((100 / (levels.len() + 1)) as u16); levels.len() + 1];
        let table = Table::new(rows)
            .header(Row::new(header).style(Style::default().add_modifier(Modifier::BOLD)))
            .block(
                Block::default()
                    .title(format!("{title}: accuracy {:.4}", evaluation.accuracy))
                    .borders(Borders::ALL),
            )
            .widths(&widths);
        f.render_widget(table, *chunk);
    }
}

fn render_residuals<B: Backend>(f: &mut Frame<B>, area: Rect, analysis: &Analysis, level: usize) {
    let Some(binned) = analysis.binned_residuals.get(level) else {
        return;
    };
    let points = binned
        .bins
        .iter()
        .map(|b| (b.mean_fitted, b.mean_residual))
        .collect::<Vec<_>>();
    let upper = binned
        .bins
        .iter()
        .map(|b| (b.mean_fitted, b.bound))
        .collect::<Vec<_>>();
    let lower = binned
        .bins
        .iter()
        .map(|b| (b.mean_fitted, -b.bound))
        .collect::<Vec<_>>();

    let x_max = points.iter().map(|p| p.0).fold(0.0_f64, f64::max).max(0.01);
    let y_max = points
        .iter()
        .map(|p| p.1.abs())
        .chain(upper.iter().map(|p| p.1))
        .fold(0.0_f64, f64::max)
        .max(0.01);

    let datasets = vec![
        Dataset::default()
            .name("mean residual")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Yellow))
            .data(&points),
        Dataset::default()
            .name("+2 SE")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::DarkGray))
            .data(&upper),
        Dataset::default()
            .name("-2 SE")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::DarkGray))
            .data(&lower),
    ];
    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .title(format!(
                    "Binned residuals, {} vs {} (n next level, v raw)",
                    binned.level,
                    analysis.full.reference_label()
                ))
                .borders(Borders::ALL),
        )
        .x_axis(
            Axis::default()
                .title("fitted probability")
                .bounds([0.0, x_max])
                .labels(vec![Span::raw("0"), Span::raw(format!("{x_max:.2}"))]),
        )
        .y_axis(
            Axis::default()
                .title("residual")
                .bounds([-y_max, y_max])
                .labels(vec![
                    Span::raw(format!("{:.3}", -y_max)),
                    Span::raw("0"),
                    Span::raw(format!("{y_max:.3}")),
                ]),
        );
    f.render_widget(chart, area);
}

/// Residual bound for the raw scatter: at least the largest `|y - p|`, never
/// below a small floor so an all-zero series still draws.
fn residual_extent(points: &[(f64, f64)]) -> f64 {
    points.iter().map(|p| p.1.abs()).fold(0.0_f64, f64::max).max(0.01)
}

fn render_raw_residuals<B: Backend>(f: &mut Frame<B>, area: Rect, analysis: &Analysis, level: usize) {
    let Some(series) = analysis.residuals.get(level) else {
        return;
    };
    let y_max = residual_extent(&series.points);
    let datasets = vec![Dataset::default()
        .name("y - p")
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Scatter)
        .style(Style::default().fg(Color::Cyan))
        .data(&series.points)];
    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .title(format!(
                    "Residuals, {} vs {}, {} rows (n next level, v binned)",
                    series.level,
                    analysis.full.reference_label(),
                    series.points.len()
                ))
                .borders(Borders::ALL),
        )
        .x_axis(
            Axis::default()
                .title("fitted probability")
                .bounds([0.0, 1.0])
                .labels(vec![Span::raw("0"), Span::raw("0.5"), Span::raw("1")]),
        )
        .y_axis(
            Axis::default()
                .title("residual")
                .bounds([-y_max, y_max])
                .labels(vec![
                    Span::raw(format!("{:.2}", -y_max)),
                    Span::raw("0"),
                    Span::raw(format!("{y_max:.2}")),
                ]),
        );
    f.render_widget(chart, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tui::backend::TestBackend;

    use crate::analysis::run_on;
    use crate::config::AnalysisConfig;
    use crate::dataset::Dataset as CensusData;
    use crate::simulate;

    fn analysis() -> Analysis {
        let ds = CensusData::from_records(&simulate::generate(800, 21)).unwrap();
        run_on(ds, &AnalysisConfig::default()).unwrap()
    }

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol.as_str())
            .collect()
    }

    #[test]
    fn raw_residual_chart_draws_every_level() {
        let analysis = analysis();
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        for level in 0..analysis.residuals.len() {
            terminal
                .draw(|f| {
                    let area = f.size();
                    render_raw_residuals(f, area, &analysis, level)
                })
                .unwrap();
            let text = buffer_text(&terminal);
            assert!(text.contains(&analysis.residuals[level].level));
            assert!(text.contains("800 rows"));
        }
    }

    #[test]
    fn residual_extent_covers_points() {
        assert_eq!(residual_extent(&[]), 0.01);
        assert_eq!(residual_extent(&[(0.2, -0.8), (0.9, 0.1)]), 0.8);
    }

    #[test]
    fn next_level_wraps() {
        let analysis = analysis();
        let mut state = ViewState {
            active: MenuItem::Residuals,
            scroll: 0,
            factor: 0,
            level: 0,
            raw_residuals: true,
        };
        for _ in 0..analysis.binned_residuals.len() {
            state.next_level(&analysis);
        }
        assert_eq!(state.level, 0);
    }

    #[test]
    fn dropping_guard_outside_raw_mode_is_harmless() {
        drop(RawModeGuard);
    }
}
