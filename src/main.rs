use anyhow::{anyhow, Result};
use ats_daq::*;
use clap::Parser;
use crossbeam_channel::{tick, unbounded, Receiver};
use log::{info, warn};
use simplelog::{
    ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
    time::Duration,
};
use time::OffsetDateTime;

type Board = Box<dyn BoardSession + Send>;

/// Stream records from an ATS9462 digitizer to disk.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a configuration template with every default and exit.
    #[arg(long)]
    print_config: bool,

    /// Buffers to capture.
    #[arg(short, long)]
    buffers: Option<u32>,

    /// DMA buffers in the pool.
    #[arg(short, long)]
    pool: Option<u32>,

    /// Records per DMA buffer.
    #[arg(long)]
    records: Option<u32>,

    /// Channels to capture: A, B or AB.
    #[arg(long)]
    channels: Option<String>,

    /// Directory the run file is written to.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Capture without writing a data file.
    #[arg(long)]
    no_save: bool,

    /// Log to the terminal and stop on Enter instead of showing the status screen.
    #[arg(long)]
    headless: bool,

    /// Use the simulated board.
    #[arg(long)]
    simulate: bool,

    /// Time the simulated board takes to fill one buffer.
    #[arg(long, default_value_t = 10)]
    fill_time_ms: u64,
}

impl Cli {
    fn override_settings(&self, conf: &mut Conf) {
        let run = &mut conf.run_settings;
        if let Some(n) = self.buffers {
            run.buffers_per_acquisition = n;
        }
        if let Some(n) = self.pool {
            run.buffer_count = n;
        }
        if let Some(n) = self.records {
            run.records_per_buffer = n;
        }
        if let Some(channels) = &self.channels {
            run.channels = channels.clone();
        }
        if let Some(dir) = &self.output {
            run.output_dir = dir.to_string_lossy().into_owned();
        }
        if self.no_save {
            run.save_data = false;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.print_config {
        println!("{}", Conf::template());
        return Ok(());
    }

    let mut conf = Conf::load(cli.config.as_deref())?;
    cli.override_settings(&mut conf);
    init_logging(&conf, cli.headless)?;

    let config = CaptureConfig::from_params(&conf.capture_params())?;
    let mut request = conf.run_request()?;
    if request.save_data && request.filename.is_none() {
        request.filename = Some(next_run_file(&conf.run_settings.output_dir)?);
    }
    log_all(&config, &request);

    let board = open_board(&conf, &cli)?;
    let (tx_progress, rx_progress) = unbounded();
    let digitizer = Digitizer::new(board, config).with_progress(tx_progress);
    let cancel = CancelToken::new();

    let buffers = request.buffers_per_acquisition as usize;
    let run_file = request.filename.clone().filter(|_| request.save_data);
    let handle = {
        let cancel = cancel.clone();
        thread::spawn(move || digitizer.run(&request, &cancel))
    };

    let outcome = if cli.headless {
        wait_headless(rx_progress, cancel, handle)?
    } else {
        let mut terminal = ratatui::init();
        let result = Status::new(buffers, run_file).run(&mut terminal, rx_progress, cancel, handle);
        ratatui::restore();
        result?
    };

    match outcome {
        Ok(report) => {
            println!("{}", report.stats);
            if let Some(path) = report.file {
                println!("Data written to {}", path.display());
            }
            for w in &report.stats.sink_warnings {
                eprintln!("warning: {}", w.message);
            }
            Ok(())
        }
        Err(e) => {
            if let Some(stats) = e.partial_stats() {
                eprintln!("{}", stats);
            }
            Err(e.into())
        }
    }
}

fn init_logging(conf: &Conf, headless: bool) -> Result<()> {
    let level = conf.log_level();
    let log_dir = Path::new(&conf.log_settings.log_dir);
    fs::create_dir_all(log_dir)?;

    let now = OffsetDateTime::now_utc();
    let log_file = log_dir.join(format!(
        "ats_daq_{}{:02}{:02}_{:02}{:02}{:02}.log",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    ));

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![WriteLogger::new(
        level,
        simplelog::Config::default(),
        File::create(&log_file)?,
    )];
    if headless {
        loggers.push(TermLogger::new(
            level,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }
    CombinedLogger::init(loggers)?;
    info!("Logging to {}", log_file.display());
    Ok(())
}

fn open_board(conf: &Conf, cli: &Cli) -> Result<Board> {
    if !cli.simulate && cfg!(feature = "atsapi") {
        return hardware_board(conf);
    }
    if !cli.simulate {
        warn!("Built without the atsapi feature, using the simulated board");
    }
    info!("Simulated board, {} ms per buffer", cli.fill_time_ms);
    Ok(Box::new(
        SimBoard::new()
            .with_pattern(SimPattern::Noise)
            .with_fill_time(Duration::from_millis(cli.fill_time_ms)),
    ))
}

#[cfg(feature = "atsapi")]
fn hardware_board(conf: &Conf) -> Result<Board> {
    let settings = &conf.board_settings;
    let board = AtsBoard::open(settings.system_id, settings.board_id)?;
    info!(
        "Opened ATS9462 system {} board {}",
        settings.system_id, settings.board_id
    );
    Ok(Box::new(board))
}

#[cfg(not(feature = "atsapi"))]
fn hardware_board(_conf: &Conf) -> Result<Board> {
    Err(anyhow!("built without the atsapi feature"))
}

/// Log progress once a second until the run ends. A line on stdin stops it.
fn wait_headless(
    rx_progress: Receiver<Progress>,
    cancel: CancelToken,
    handle: JoinHandle<RunOutcome>,
) -> Result<RunOutcome> {
    let stop = cancel.clone();
    thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = io::stdin().read_line(&mut line) {
            if n > 0 {
                stop.cancel();
            }
        }
    });
    println!("Press Enter to stop");

    let ticker = tick(Duration::from_secs(1));
    let mut counter = Counter::new();
    while !handle.is_finished() {
        let _ = ticker.recv();
        let mut last = None;
        while let Ok(progress) = rx_progress.try_recv() {
            counter.increment(progress.bytes_transferred.saturating_sub(counter.total_bytes));
            last = Some(progress);
        }
        if let Some(p) = last {
            info!(
                "Buffers: {}/{}\tData rate: {:.2} MB/s\tLast wait: {:?}",
                p.buffers_completed,
                p.buffers_per_acquisition,
                counter.rate(),
                p.wait
            );
        }
    }
    if cancel.is_cancelled() {
        info!("Stopped by user");
    }

    handle
        .join()
        .map_err(|_| anyhow!("acquisition thread panicked"))
}
