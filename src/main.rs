use std::{
    path::{Path, PathBuf},
    process::exit,
    thread::scope,
    time::Duration as StdDuration,
};

use clap::{AppSettings, Parser};
use crossbeam_channel::bounded;
use crossbeam_utils::atomic::AtomicCell;
use hifitime::Duration;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};

use xst_realtime::{
    calibration::CalTable,
    cancel::cancellation,
    constants::{DEFAULT_INTEGRATION_SECONDS, DEFAULT_NPIX, DEFAULT_STATION},
    freq::{BandPlan, Continuation, FrequencySelector},
    imaging::Imager,
    pipeline::run_pipeline,
    present::{run_presenter, spawn_stdin_reader, PresentOptions},
    read::{FileSequence, FollowReader, ReaderParams, RecordSource, XstReader},
    recording::{obstime, resolve_inputs, MetaSource, RecordingMeta},
    session::Session,
    station::{full_station_name, RcuMode, StationLayout, StationType},
    write::FrameWriter,
    XstError,
};

#[derive(Parser)]
#[clap(author, version, about)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// A .dat file of XST records, or a directory of them.
    data: PathBuf,

    /// Follow the .dat file (the newest one, if given a directory) as the
    /// station writes it. Only stops when asked to.
    #[clap(short, long)]
    realtime: bool,

    /// The frequency to image [MHz]. If this isn't given, a pinned recording
    /// is imaged at its subband, and otherwise the frequency is asked for.
    #[clap(short, long)]
    freq: Option<f64>,

    /// What to do after imaging --freq once: 'fixed' (wait to be told),
    /// 'same' (image every record at this frequency) or 'increasing' (step
    /// the subband up for each record).
    #[clap(short = 'c', long = "continue", default_value = "fixed")]
    continuation: Continuation,

    /// How many subbands to step by in 'increasing' mode. Stepping past the
    /// top of the recorded band starts again at the bottom.
    #[clap(long, default_value = "1")]
    step: u32,

    /// Where to write frames. Defaults to
    /// <data dir>/<date>_realtime_observation.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// The station name, e.g. LV614 or CS002. This determines the number of
    /// RCUs in each record.
    #[clap(long)]
    station: Option<String>,

    /// The RCU mode (1-7, 'inner' or 'outer'). Overrides the recording
    /// script.
    #[clap(long)]
    rcu_mode: Option<RcuMode>,

    /// The recorded subband range, e.g. 51:461. Overrides the recording
    /// script.
    #[clap(long, conflicts_with = "subband")]
    subbands: Option<String>,

    /// The single recorded subband. Overrides the recording script.
    #[clap(long)]
    subband: Option<u32>,

    /// The shell script that drove the recording. Defaults to the first .sh
    /// file beside the data.
    #[clap(long)]
    script: Option<PathBuf>,

    /// A TOML file of antenna positions. Without one, a made-up layout is
    /// used and images won't show the real sky.
    #[clap(long)]
    layout: Option<PathBuf>,

    /// A directory of station calibration tables.
    #[clap(long)]
    caltable_dir: Option<PathBuf>,

    /// The number of pixels along each side of a sky image.
    #[clap(long, default_value_t = DEFAULT_NPIX)]
    npix: usize,

    /// PNG pixels per sky image pixel.
    #[clap(long, default_value = "4")]
    scale: u32,

    /// The lower limit of the colour scale. Each frame is scaled to its own
    /// range if this isn't given.
    #[clap(long, requires = "vmax")]
    vmin: Option<f64>,

    /// The upper limit of the colour scale.
    #[clap(long, requires = "vmin")]
    vmax: Option<f64>,

    /// The time between records [seconds].
    #[clap(long, default_value_t = DEFAULT_INTEGRATION_SECONDS)]
    integration: f64,

    /// How often to look for new data in real-time mode [milliseconds].
    #[clap(long, default_value = "500")]
    poll_interval_ms: u64,

    /// Report a stall after this long without new data in real-time mode
    /// [seconds].
    #[clap(long, default_value = "10")]
    stall_timeout: f64,

    /// Stop after writing this many frames.
    #[clap(long)]
    max_frames: Option<usize>,

    /// Don't read commands from stdin. Whenever a decision is needed, the
    /// session stops instead.
    #[clap(long)]
    no_interactive: bool,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,

    /// Disable progress bars.
    #[clap(long)]
    no_progress_bars: bool,
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbosity);
    if let Err(e) = try_main(args) {
        eprintln!("Error: {e}");
        exit(1);
    }
}

fn try_main(args: Args) -> Result<(), XstError> {
    let poll_interval = StdDuration::from_millis(args.poll_interval_ms.max(1));
    let stall_timeout = match StdDuration::try_from_secs_f64(args.stall_timeout) {
        Ok(t) if t >= poll_interval => t,
        _ => {
            return Err(XstError::BadStallTimeout {
                secs: args.stall_timeout,
                poll_interval_ms: poll_interval.as_millis(),
            })
        }
    };

    let files = resolve_inputs(&args.data, args.realtime)?;
    let first = &files[0];
    info!("Input: {}", first.display());
    if files.len() > 1 {
        info!("  (and {} more file(s))", files.len() - 1);
    }

    let layout = args
        .layout
        .as_deref()
        .map(StationLayout::from_toml_file)
        .transpose()?;

    let cli_band = match (&args.subbands, args.subband) {
        (Some(s), _) => Some(parse_subbands(s)?),
        (None, Some(sb)) => Some(BandPlan::Pinned(sb)),
        (None, None) => None,
    };
    let mut meta = RecordingMeta::resolve(first, args.script.as_deref(), cli_band, args.rcu_mode)?;
    if meta.rcu_mode_source == MetaSource::Default {
        if let Some((mode, file)) = layout.as_ref().and_then(|l| l.rcu_mode.zip(l.source.clone())) {
            meta.rcu_mode = mode;
            meta.rcu_mode_source = MetaSource::Layout(file);
        }
    }
    info!("Band:     {} (from {:?})", meta.band, meta.band_source);
    info!("RCU mode: {} (from {:?})", meta.rcu_mode, meta.rcu_mode_source);

    let station = args
        .station
        .clone()
        .or_else(|| layout.as_ref().map(|l| l.name.clone()))
        .unwrap_or_else(|| DEFAULT_STATION.to_string());
    let num_rcus = StationType::from_name(&station).num_rcus();
    let full_name = full_station_name(&station, meta.rcu_mode)?;
    info!("Station:  {full_name} ({num_rcus} RCUs)");

    let layout = match layout {
        Some(l) => {
            if l.num_rcus() != num_rcus {
                return Err(XstError::LayoutMismatch {
                    station,
                    layout: l.num_rcus(),
                    expected: num_rcus,
                });
            }
            l
        }
        None => {
            warn!("No station layout given; using a synthetic {} antenna layout", num_rcus / 2);
            StationLayout::synthetic(&station, num_rcus / 2)
        }
    };

    let calibration = match args.caltable_dir.as_deref() {
        Some(dir) => CalTable::for_station(dir, &station, meta.rcu_mode, num_rcus)?,
        None => {
            debug!("No caltable directory given; images will be uncalibrated");
            None
        }
    };
    let imager = Imager::new(layout, meta.rcu_mode, args.npix, calibration)?;

    let integration = Duration::from_seconds(args.integration);
    let mut inputs = Vec::with_capacity(files.len());
    for file in &files {
        let params = ReaderParams {
            num_rcus,
            start: obstime(file)?,
            integration,
            band: meta.band,
        };
        inputs.push((file.clone(), params));
    }
    let start = inputs[0].1.start;

    let mut source: Box<dyn RecordSource> = if args.realtime {
        let (file, params) = inputs.swap_remove(0);
        let reader = XstReader::open(file, params)?;
        Box::new(FollowReader::new(
            reader,
            poll_interval,
            stall_timeout,
        ))
    } else {
        Box::new(FileSequence::new(inputs)?)
    };

    let selector = FrequencySelector::new(meta.rcu_mode, meta.band, args.step)?;
    let mut session = Session::new(selector, args.realtime);
    match args.freq {
        Some(freq) => {
            if let Err(e) = session.submit_with(freq, args.continuation) {
                warn!("Ignoring --freq: {e}");
            }
        }
        None => {
            session.select_pinned();
        }
    }

    let output = match args.output {
        Some(o) => o,
        None => default_output_dir(&args.data, start),
    };
    info!("Writing frames to {}", output.display());
    let mut writer = FrameWriter::new(&output, &station, args.scale)
        .with_limits(args.vmin.zip(args.vmax));

    let input = if args.no_interactive {
        None
    } else {
        Some(spawn_stdin_reader())
    };

    let multi_progress = MultiProgress::with_draw_target(if args.no_progress_bars {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stdout()
    });
    let progress = match source.bytes_expected() {
        Some(total) => multi_progress.add(
            ProgressBar::new(total)
                .with_style(
                    ProgressStyle::default_bar()
                        .template("{msg:17}: [{wide_bar:.blue}] {bytes}/{total_bytes} ({elapsed_precise}<{eta_precise})").unwrap()
                        .progress_chars("=> "),
                )
                .with_position(0)
                .with_message("Reading"),
        ),
        None => multi_progress.add(
            ProgressBar::new_spinner()
                .with_style(
                    ProgressStyle::default_spinner()
                        .template("{msg:17}: {spinner} {pos} records ({elapsed_precise})").unwrap(),
                )
                .with_message("Following"),
        ),
    };
    progress.tick();

    let (command_tx, command_rx) = bounded(5);
    let (event_tx, event_rx) = bounded(5);
    let (canceller, token) = cancellation();
    let error = AtomicCell::new(false);

    let (pipeline_result, present_result) = scope(|s| {
        let pipeline = s.spawn(|| {
            run_pipeline(
                session,
                source.as_mut(),
                &imager,
                command_rx,
                event_tx,
                &token,
                &error,
                Some(progress),
            )
        });
        let presenter = s.spawn(|| {
            run_presenter(
                event_rx,
                command_tx,
                input,
                &mut writer,
                canceller,
                PresentOptions {
                    max_frames: args.max_frames,
                },
                &error,
            )
        });
        (pipeline.join(), presenter.join())
    });

    // A panic in either thread is a bug; pass it on.
    let pipeline_summary = pipeline_result.unwrap_or_else(|e| std::panic::resume_unwind(e));
    let present_summary = present_result.unwrap_or_else(|e| std::panic::resume_unwind(e));
    // Report the first real error rather than a knock-on one.
    let (pipeline_summary, present_summary) = match (pipeline_summary, present_summary) {
        (Ok(p), Ok(q)) => (p, q),
        (Err(XstError::OtherThread), Err(e)) | (Err(e), _) | (_, Err(e)) => return Err(e),
    };

    info!(
        "Made {} image(s), wrote {} frame(s) to {}",
        pipeline_summary.images,
        present_summary.frames,
        writer.out_dir().display()
    );
    if pipeline_summary.skipped > 0 {
        warn!("Skipped {} record(s)", pipeline_summary.skipped);
    }
    Ok(())
}

fn parse_subbands(s: &str) -> Result<BandPlan, XstError> {
    let bad = || XstError::BadSubbandRange(s.to_string());
    let (first, last) = s.split_once(':').ok_or_else(bad)?;
    let first = first.trim().parse().map_err(|_| bad())?;
    let last = last.trim().parse().map_err(|_| bad())?;
    Ok(BandPlan::new(first, last)?)
}

/// `<data dir>/<YYYY-MM-DD>_realtime_observation`, dated by the observation.
fn default_output_dir(data: &Path, start: hifitime::Epoch) -> PathBuf {
    let dir = if data.is_dir() {
        data
    } else {
        data.parent().unwrap_or_else(|| Path::new("."))
    };
    let (y, m, d, _, _, _, _) = start.to_gregorian_utc();
    dir.join(format!("{y:04}-{m:02}-{d:02}_realtime_observation"))
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.init();
}
