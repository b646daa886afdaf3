//! Write made-up XST records of point sources, either all at once or slowly
//! enough to rehearse a real-time run.

use std::{fs, path::PathBuf, process::exit, thread::sleep, time::Duration};

use clap::{AppSettings, Parser};
use log::{debug, info};

use xst_realtime::{
    freq::freq_from_sb,
    station::{RcuMode, StationLayout, StationType},
    synth::{append_record, point_source_matrix, PointSource},
    XstError,
};

#[derive(Parser)]
#[clap(author, version, about)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// The .dat file to append records to. Name it like
    /// 20170720_095816_xst.dat to give it a start time.
    output: PathBuf,

    /// The station name. This determines the number of RCUs in each record.
    #[clap(long, default_value = "LV614")]
    station: String,

    /// A TOML file of antenna positions. A synthetic layout is used
    /// otherwise; image with the same layout.
    #[clap(long)]
    layout: Option<PathBuf>,

    #[clap(long, default_value = "3")]
    rcu_mode: RcuMode,

    /// The subband to simulate.
    #[clap(long, default_value = "167")]
    subband: u32,

    /// A point source as "l,m" or "l,m,flux". Can be given multiple times.
    /// Defaults to a single source at zenith.
    #[clap(long = "source", multiple_occurrences(true))]
    sources: Vec<PointSource>,

    /// Move every source this far in l after each record.
    #[clap(long, default_value = "0")]
    drift: f64,

    /// The number of records to write.
    #[clap(short = 'n', long, default_value = "10")]
    records: usize,

    /// Seconds to wait between records.
    #[clap(long, default_value = "0")]
    interval: f64,

    /// Also write a .h header pinning the subband, as the station does for
    /// single-subband recordings.
    #[clap(long)]
    header: bool,

    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,
}

fn main() {
    let args = Args::parse();
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .target(env_logger::Target::Stdout)
        .format_target(false)
        .filter_level(match args.verbosity {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .init();

    if let Err(e) = try_main(args) {
        eprintln!("Error: {e}");
        exit(1);
    }
}

fn try_main(args: Args) -> Result<(), XstError> {
    let num_rcus = StationType::from_name(&args.station).num_rcus();
    let layout = match args.layout.as_deref() {
        Some(f) => {
            let layout = StationLayout::from_toml_file(f)?;
            if layout.num_rcus() != num_rcus {
                return Err(XstError::LayoutMismatch {
                    station: args.station,
                    layout: layout.num_rcus(),
                    expected: num_rcus,
                });
            }
            layout
        }
        None => StationLayout::synthetic(&args.station, num_rcus / 2),
    };

    let mut sources = if args.sources.is_empty() {
        vec![PointSource {
            l: 0.0,
            m: 0.0,
            flux: 1.0,
        }]
    } else {
        args.sources
    };
    let freq_hz = freq_from_sb(args.subband, args.rcu_mode);
    info!(
        "Writing {} record(s) of {} source(s) at {:.3} MHz (SB{}) to {}",
        args.records,
        sources.len(),
        freq_hz / 1e6,
        args.subband,
        args.output.display()
    );

    if args.header {
        let header = args.output.with_extension("h");
        fs::write(
            &header,
            format!(
                "rspctl --rcumode={} --xcsubband={}\n",
                args.rcu_mode, args.subband
            ),
        )?;
        debug!("Wrote {}", header.display());
    }

    for i in 0..args.records {
        if i > 0 && args.interval > 0.0 {
            sleep(Duration::from_secs_f64(args.interval));
        }
        // Sources that drift over the horizon are dropped.
        sources.retain(|s| s.l * s.l + s.m * s.m <= 1.0);
        let data = point_source_matrix(&layout, freq_hz, &sources);
        append_record(&args.output, &data)?;
        debug!("Record {i}: {} source(s)", sources.len());
        for s in sources.iter_mut() {
            s.l += args.drift;
        }
    }
    Ok(())
}
