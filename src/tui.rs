use crate::{AcquisitionError, CancelToken, Counter, Progress, RunReport};
use anyhow::{anyhow, Result};
use crossbeam_channel::{tick, Receiver};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Stylize,
    symbols::border,
    text::{Line, Text},
    widgets::{Block, Paragraph, Widget},
    DefaultTerminal, Frame,
};
use std::{
    path::PathBuf,
    thread::JoinHandle,
    time::{Duration, Instant},
};

pub type RunOutcome = Result<RunReport, AcquisitionError>;

#[derive(Debug)]
pub struct Status {
    pub counter: Counter,
    pub t_begin: Instant,
    pub buffers_completed: usize,
    pub buffers_per_acquisition: usize,
    pub last_slot: usize,
    pub last_wait: Duration,
    pub run_file: Option<PathBuf>,
    pub exit: Option<StatusExit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusExit {
    Quit,
    Finished,
}

impl Status {
    pub fn new(buffers_per_acquisition: usize, run_file: Option<PathBuf>) -> Self {
        Self {
            counter: Counter::new(),
            t_begin: Instant::now(),
            buffers_completed: 0,
            buffers_per_acquisition,
            last_slot: 0,
            last_wait: Duration::ZERO,
            run_file,
            exit: None,
        }
    }

    /// Redraw until the acquisition thread finishes or the user quits, then
    /// return the thread's result. Quitting cancels the run and still waits
    /// for the engine to release the board.
    pub fn run(
        &mut self,
        terminal: &mut DefaultTerminal,
        rx_progress: Receiver<Progress>,
        cancel: CancelToken,
        handle: JoinHandle<RunOutcome>,
    ) -> Result<RunOutcome> {
        let ticker = tick(Duration::from_millis(250));

        while self.exit.is_none() {
            let _ = ticker.recv();

            while let Ok(progress) = rx_progress.try_recv() {
                self.update(&progress);
            }

            self.handle_events()?;

            if handle.is_finished() {
                self.exit = Some(StatusExit::Finished);
            }

            terminal.draw(|f| self.draw(f))?;
        }

        if let Some(StatusExit::Quit) = self.exit {
            cancel.cancel();
        }

        handle
            .join()
            .map_err(|_| anyhow!("acquisition thread panicked"))
    }

    pub fn update(&mut self, progress: &Progress) {
        let new_bytes = progress
            .bytes_transferred
            .saturating_sub(self.counter.total_bytes);
        self.counter.increment(new_bytes);
        self.buffers_completed = progress.buffers_completed;
        self.buffers_per_acquisition = progress.buffers_per_acquisition;
        self.last_slot = progress.slot;
        self.last_wait = progress.wait;
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> Result<()> {
        if event::poll(Duration::ZERO)? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind == KeyEventKind::Press {
                    self.handle_key_event(key_event);
                }
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        if let KeyCode::Char('q') | KeyCode::Esc = key_event.code {
            self.exit = Some(StatusExit::Quit);
        }
    }
}

impl Widget for &Status {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let name = self
            .run_file
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "no file".to_string());
        let title = Line::from(format!(" Acquisition {} ", name).bold());
        let instructions = Line::from(vec![" Stop ".into(), "<Q> ".blue().bold()]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);

        let status_text = Text::from(vec![
            Line::from(vec![
                "Elapsed time: ".into(),
                self.t_begin.elapsed().as_secs().to_string().yellow(),
                " s".into(),
                " Buffers: ".into(),
                format!("{}/{}", self.buffers_completed, self.buffers_per_acquisition).yellow(),
            ]),
            Line::from(vec![
                "Data rate: ".into(),
                format!("{:.2}", self.counter.rate()).yellow(),
                " MB/s".into(),
                " Average: ".into(),
                format!("{:.2}", self.counter.average_rate()).yellow(),
                " MB/s".into(),
            ]),
            Line::from(vec![
                "Last slot: ".into(),
                self.last_slot.to_string().yellow(),
                " Last wait: ".into(),
                format!("{:.1}", self.last_wait.as_secs_f64() * 1e3).yellow(),
                " ms".into(),
            ]),
        ]);

        Paragraph::new(status_text)
            .centered()
            .block(block)
            .render(area, buf);
    }
}
