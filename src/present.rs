//! The user's side of the pipeline: reporting, saving frames and turning
//! typed input into [`Command`]s.

use std::io::BufRead;

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use log::{info, warn};

use crate::{
    cancel::Canceller,
    freq::{freq_from_sb, Continuation},
    imaging::{pixel_l, pixel_m},
    pipeline::{Command, PipelineEvent},
    write::FrameWriter,
    XstError,
};

const HELP: &str = "Enter a frequency in MHz (optionally followed by 'same' or 'increasing'), \
's' to continue at the same frequency, 'i' to continue with increasing frequency, or 'q' to quit";

/// Parse a line typed by the user. Blank lines give `None`.
pub fn parse_input(line: &str) -> Option<Result<Command, String>> {
    let mut words = line.split_whitespace();
    let first = words.next()?;
    let second = words.next();
    if words.next().is_some() {
        return Some(Err(format!("Too many words in '{}'", line.trim())));
    }

    let command = match (first.to_lowercase().as_str(), second) {
        ("q" | "quit" | "stop" | "exit", None) => Ok(Command::Stop),
        ("s" | "same", None) => Ok(Command::ContinueSame),
        ("i" | "incr" | "increasing", None) => Ok(Command::ContinueIncreasing),
        (freq, continuation) => match (freq.parse::<f64>(), continuation) {
            (Ok(f), None) => Ok(Command::Submit(f)),
            (Ok(f), Some(c)) => c
                .parse::<Continuation>()
                .map(|c| Command::SubmitWith(f, c))
                .map_err(|e| e.to_string()),
            (Err(_), _) => Err(format!("Didn't understand '{}'", line.trim())),
        },
    };
    Some(command)
}

/// Read lines from stdin on a detached thread. The thread can't be joined
/// because reading stdin blocks; it ends when stdin closes or nobody is
/// listening any more.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = bounded(5);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentSummary {
    pub frames: usize,
    pub skipped: usize,
    pub stalls: usize,
}

/// Options for [`run_presenter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PresentOptions {
    /// Stop after this many frames.
    pub max_frames: Option<usize>,
}

/// Save and report everything the pipeline produces, and feed user input
/// back to it. Without `input` (or once it closes) any request for a
/// decision stops the session.
pub fn run_presenter(
    events: Receiver<PipelineEvent>,
    commands: Sender<Command>,
    input: Option<Receiver<String>>,
    writer: &mut FrameWriter,
    canceller: Canceller,
    options: PresentOptions,
    error: &AtomicCell<bool>,
) -> Result<PresentSummary, XstError> {
    let result = present_loop(events, &commands, input, writer, options, error);
    if result.is_err() {
        error.store(true);
    }
    // Wake the pipeline if it's waiting on anything.
    canceller.cancel();
    result
}

fn present_loop(
    events: Receiver<PipelineEvent>,
    commands: &Sender<Command>,
    mut input: Option<Receiver<String>>,
    writer: &mut FrameWriter,
    options: PresentOptions,
    error: &AtomicCell<bool>,
) -> Result<PresentSummary, XstError> {
    let mut summary = PresentSummary::default();
    // Is the pipeline waiting for the user?
    let mut waiting = false;

    loop {
        if error.load() {
            return Err(XstError::OtherThread);
        }
        let lines = input.clone().unwrap_or_else(never);

        select! {
            recv(events) -> event => {
                let event = match event {
                    Ok(e) => e,
                    Err(_) => break,
                };
                match event {
                    PipelineEvent::AwaitingSelection { band, mode } => {
                        let r = band.range();
                        info!(
                            "Recorded {band} ({:.3} to {:.3} MHz, RCU mode {mode})",
                            freq_from_sb(r.first(), mode) / 1e6,
                            freq_from_sb(r.last(), mode) / 1e6
                        );
                        waiting = true;
                        if input.is_some() {
                            println!("{HELP}");
                        } else {
                            warn!("No frequency was given and there's no input to ask for one; stopping");
                            let _ = commands.send(Command::Stop);
                        }
                    }

                    PipelineEvent::Image(image) => {
                        let path = writer.write(&image)?;
                        summary.frames += 1;
                        match image.peak() {
                            Some((m_ix, l_ix, v)) => info!(
                                "{:.3} MHz (SB{}) record {}: peak {v:.3e} at l={:.3}, m={:.3}; wrote {}",
                                image.freq_mhz(),
                                image.subband,
                                image.record_index,
                                pixel_l(l_ix, image.npix()),
                                pixel_m(m_ix, image.npix()),
                                path.display()
                            ),
                            None => info!("Wrote {}", path.display()),
                        }
                        if options.max_frames.map(|m| summary.frames >= m).unwrap_or(false) {
                            info!("Wrote {} frames; stopping", summary.frames);
                            let _ = commands.send(Command::Stop);
                            break;
                        }
                    }

                    PipelineEvent::Paused { selection } => {
                        waiting = true;
                        if input.is_some() {
                            println!(
                                "Imaged {:.3} MHz (subband {}). {HELP}",
                                selection.freq_mhz, selection.subband
                            );
                        } else {
                            let _ = commands.send(Command::Stop);
                        }
                    }

                    PipelineEvent::Rejected { reason } => {
                        if input.is_some() {
                            println!("{reason}");
                        }
                    }

                    PipelineEvent::Skipped { .. } => summary.skipped += 1,

                    PipelineEvent::Stalled { waited } => {
                        summary.stalls += 1;
                        if input.is_some() {
                            println!(
                                "Waiting for data ({:.0}s so far); 'q' to quit",
                                waited.as_secs_f64()
                            );
                        }
                    }

                    PipelineEvent::Finished { reason, images } => {
                        info!("Session finished ({reason:?}) after {images} image(s)");
                        break;
                    }
                }
            }

            recv(lines) -> line => match line {
                Ok(line) => match parse_input(&line) {
                    Some(Ok(command)) => {
                        let stop = command == Command::Stop;
                        waiting = false;
                        if commands.send(command).is_err() || stop {
                            break;
                        }
                    }
                    Some(Err(e)) => println!("{e}\n{HELP}"),
                    None => (),
                },
                Err(_) => {
                    // Input has closed; nobody can answer any more questions.
                    input = None;
                    if waiting {
                        let _ = commands.send(Command::Stop);
                    }
                }
            },
        }
    }

    Ok(summary)
}
