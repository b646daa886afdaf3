//! The reading and imaging side of a session.
//!
//! [`run_pipeline`] owns the [`Session`]. It takes user [`Command`]s from one
//! channel and sends [`PipelineEvent`]s (most importantly images) down
//! another. Commands are applied before each record is taken from the
//! source, so the selection used for a record is always the latest one the
//! user made before that record was read.

use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use indicatif::ProgressBar;
use log::{debug, info, trace, warn};

use crate::{
    cancel::CancelToken,
    freq::{BandPlan, Continuation, FrequencySelection},
    imaging::{Imager, ImagerError, SkyImage},
    read::{Fetch, RecordSource},
    session::{FinishReason, Session, SessionState},
    station::RcuMode,
    XstError,
};

/// What the user can ask of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Image this frequency \[MHz\] once, then pause.
    Submit(f64),

    /// Image this frequency \[MHz\] with the given continuation.
    SubmitWith(f64, Continuation),

    ContinueSame,
    ContinueIncreasing,
    Stop,
}

#[derive(Debug)]
pub enum PipelineEvent {
    /// Nothing will be imaged until a frequency is submitted.
    AwaitingSelection { band: BandPlan, mode: RcuMode },

    Image(SkyImage),

    /// An image was made; waiting to be told how to continue.
    Paused { selection: FrequencySelection },

    /// A command couldn't be applied.
    Rejected { reason: String },

    /// A record couldn't be imaged.
    Skipped { record_index: usize, reason: String },

    /// No new data has arrived for a while.
    Stalled { waited: Duration },

    Finished { reason: FinishReason, images: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub images: usize,
    pub skipped: usize,
    pub finish_reason: FinishReason,
}

/// Read and image records until the session finishes.
///
/// # Arguments
///
/// * `session` - the session to drive. It may already have a selection.
/// * `source` - where the records come from.
/// * `imager` - makes the images.
/// * `commands` - user commands. If this disconnects, the session stops.
/// * `events` - where images and state changes go. If the receiver hangs up,
///   the session stops.
/// * `cancel` - interrupts any wait for data.
/// * `error` - set by whichever thread hits an error first; seeing it set
///   means we should stop.
/// * `progress_bar` - an optional progress bar, measured in bytes for
///   finished recordings and in records for real-time ones.
#[allow(clippy::too_many_arguments)]
pub fn run_pipeline(
    mut session: Session,
    source: &mut dyn RecordSource,
    imager: &Imager,
    commands: Receiver<Command>,
    events: Sender<PipelineEvent>,
    cancel: &CancelToken,
    error: &AtomicCell<bool>,
    progress_bar: Option<ProgressBar>,
) -> Result<PipelineSummary, XstError> {
    let result = pipeline_loop(
        &mut session,
        source,
        imager,
        &commands,
        &events,
        cancel,
        error,
        progress_bar.as_ref(),
    );
    if result.is_err() {
        error.store(true);
    }
    if let Some(pb) = progress_bar.as_ref() {
        pb.abandon_with_message("Finished imaging");
    }
    // The session is always finished by now, unless something went wrong.
    let finish_reason = session.finish_reason().unwrap_or(FinishReason::Stopped);
    let (images, skipped) = result?;
    let _ = events.send(PipelineEvent::Finished {
        reason: finish_reason,
        images,
    });
    Ok(PipelineSummary {
        images,
        skipped,
        finish_reason,
    })
}

#[allow(clippy::too_many_arguments)]
fn pipeline_loop(
    session: &mut Session,
    source: &mut dyn RecordSource,
    imager: &Imager,
    commands: &Receiver<Command>,
    events: &Sender<PipelineEvent>,
    cancel: &CancelToken,
    error: &AtomicCell<bool>,
    progress_bar: Option<&ProgressBar>,
) -> Result<(usize, usize), XstError> {
    let mut images = 0;
    let mut skipped = 0;
    // Has the user been told about the current waiting state?
    let mut announced = false;

    loop {
        // Should we continue?
        if error.load() {
            return Err(XstError::OtherThread);
        }
        for command in commands.try_iter() {
            apply(session, command, events);
            announced = false;
        }

        match session.state() {
            SessionState::Finished => break,

            SessionState::Processing => (),

            state @ (SessionState::AwaitingSelection | SessionState::Paused) => {
                // A used-up recording can't be continued.
                if state == SessionState::Paused
                    && !source.is_realtime()
                    && !source.has_records()?
                {
                    session.stream_exhausted();
                    continue;
                }
                if !announced {
                    let event = match (state, session.selection()) {
                        (SessionState::Paused, Some(selection)) => {
                            PipelineEvent::Paused { selection }
                        }
                        _ => PipelineEvent::AwaitingSelection {
                            band: session.selector().band(),
                            mode: session.selector().mode(),
                        },
                    };
                    if events.send(event).is_err() {
                        session.stop();
                        continue;
                    }
                    announced = true;
                }
                select! {
                    recv(commands) -> command => match command {
                        Ok(command) => {
                            apply(session, command, events);
                            announced = false;
                        }
                        Err(_) => {
                            debug!("Command channel closed");
                            session.stop();
                        }
                    },
                    recv(cancel.receiver()) -> _ => session.stop(),
                }
                continue;
            }
        }

        match source.fetch(cancel)? {
            Fetch::Record(record) => {
                // Anything submitted while we were waiting for this record
                // applies to it.
                for command in commands.try_iter() {
                    apply(session, command, events);
                    announced = false;
                }
                let selection = match session.selection_for_record() {
                    Some(s) => s,
                    None => {
                        trace!("Dropping record {}; nothing selected", record.index);
                        continue;
                    }
                };

                match imager.image(&record, selection.subband) {
                    Ok(image) => {
                        images += 1;
                        session.record_processed();
                        announced = false;
                        if events.send(PipelineEvent::Image(image)).is_err() {
                            session.stop();
                        }
                    }
                    Err(e @ ImagerError::RcuMismatch { .. }) => return Err(e.into()),
                    Err(e) => {
                        warn!("Skipping record {}: {e}", record.index);
                        skipped += 1;
                        let _ = events.send(PipelineEvent::Skipped {
                            record_index: record.index,
                            reason: e.to_string(),
                        });
                    }
                }

                if let Some(pb) = progress_bar {
                    if source.is_realtime() {
                        pb.inc(1);
                    } else {
                        pb.set_position(source.bytes_read());
                    }
                }
            }

            Fetch::Stalled { waited } => {
                info!(
                    "No new data for {:.1}s; still waiting",
                    waited.as_secs_f64()
                );
                let _ = events.send(PipelineEvent::Stalled { waited });
            }

            Fetch::EndOfStream => {
                if !session.stream_exhausted() {
                    // Only finished recordings run out.
                    warn!("A real-time source reported the end of its data");
                }
            }

            Fetch::Cancelled => session.stop(),
        }
    }

    Ok((images, skipped))
}

fn apply(session: &mut Session, command: Command, events: &Sender<PipelineEvent>) {
    debug!("Got command {command:?}");
    let result = match command {
        Command::Submit(freq_mhz) => session.submit_frequency(freq_mhz).map(|_| ()),
        Command::SubmitWith(freq_mhz, continuation) => {
            session.submit_with(freq_mhz, continuation).map(|_| ())
        }
        Command::ContinueSame => session.continue_same().map(|_| ()),
        Command::ContinueIncreasing => session.continue_increasing().map(|_| ()),
        Command::Stop => {
            session.stop();
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!("{e}");
        let _ = events.send(PipelineEvent::Rejected {
            reason: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, thread};

    use crossbeam_channel::{bounded, unbounded};
    use hifitime::{Duration as HifiDuration, Epoch};
    use tempfile::NamedTempFile;

    use super::*;
    use crate::{
        cancel::cancellation,
        freq::{freq_from_sb, FrequencySelector},
        read::{FileSequence, FollowReader, ReaderParams, XstReader},
        station::StationLayout,
        synth::{point_source_matrix, PointSource},
    };

    const NPIX: usize = 15;

    fn mode3() -> RcuMode {
        RcuMode::new(3).unwrap()
    }

    fn layout() -> StationLayout {
        StationLayout::synthetic("LV614", 8)
    }

    fn params(band: BandPlan) -> ReaderParams {
        ReaderParams {
            num_rcus: 16,
            start: Epoch::from_gregorian_utc_hms(2024, 1, 1, 12, 0, 0),
            integration: HifiDuration::from_seconds(1.0),
            band,
        }
    }

    fn recording(num_records: usize) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        let source = PointSource {
            l: 0.2,
            m: 0.3,
            flux: 1.0,
        };
        for i in 0..num_records {
            let data = point_source_matrix(&layout(), 40e6 + i as f64 * 1e6, &[source]);
            f.write_all(&crate::read::encode_correlations(&data)).unwrap();
        }
        f.flush().unwrap();
        f
    }

    fn session(band: BandPlan, realtime: bool) -> Session {
        Session::new(FrequencySelector::new(mode3(), band, 1).unwrap(), realtime)
    }

    fn mhz(subband: u32) -> f64 {
        freq_from_sb(subband, mode3()) / 1e6
    }

    #[test]
    fn test_same_images_every_record() {
        let band = BandPlan::new(51, 461).unwrap();
        let tmp = recording(5);
        let mut source = FileSequence::new(vec![(tmp.path().to_path_buf(), params(band))]).unwrap();
        let imager = Imager::new(layout(), mode3(), NPIX, None).unwrap();
        let mut session = session(band, false);
        session.submit_with(mhz(167), Continuation::Same).unwrap();

        let (_tx, commands) = unbounded();
        let (events, rx) = unbounded();
        let (_canceller, token) = cancellation();
        let error = AtomicCell::new(false);
        let summary = run_pipeline(
            session,
            &mut source,
            &imager,
            commands,
            events,
            &token,
            &error,
            None,
        )
        .unwrap();
        assert_eq!(summary.images, 5);
        assert_eq!(summary.finish_reason, FinishReason::Exhausted);

        let subbands = rx
            .try_iter()
            .filter_map(|e| match e {
                PipelineEvent::Image(im) => Some(im.subband),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(subbands, [167; 5]);
    }

    #[test]
    fn test_fixed_pauses_and_commands_resume() {
        let band = BandPlan::new(51, 461).unwrap();
        let tmp = recording(4);
        let mut source = FileSequence::new(vec![(tmp.path().to_path_buf(), params(band))]).unwrap();
        let imager = Imager::new(layout(), mode3(), NPIX, None).unwrap();

        let (tx, commands) = unbounded();
        let (events, rx) = bounded(5);
        let (_canceller, token) = cancellation();
        let error = AtomicCell::new(false);

        let mut seen = vec![];
        let mut prompted = false;
        thread::scope(|s| {
            let handle = s.spawn(|| {
                run_pipeline(
                    session(band, false),
                    &mut source,
                    &imager,
                    commands,
                    events,
                    &token,
                    &error,
                    None,
                )
            });

            for event in rx.iter() {
                match event {
                    // The rejection re-prompts; only answer the first time.
                    PipelineEvent::AwaitingSelection { .. } if !prompted => {
                        prompted = true;
                        // Out of band first; should be rejected.
                        tx.send(Command::Submit(200.0)).unwrap();
                        tx.send(Command::Submit(mhz(100))).unwrap();
                    }
                    PipelineEvent::Image(im) => seen.push(im.subband),
                    PipelineEvent::Paused { selection } => {
                        assert_eq!(selection.subband, 100);
                        tx.send(Command::ContinueIncreasing).unwrap();
                    }
                    PipelineEvent::Finished { images, .. } => assert_eq!(images, 4),
                    _ => (),
                }
            }
            let summary = handle.join().unwrap().unwrap();
            assert_eq!(summary.finish_reason, FinishReason::Exhausted);
        });
        assert_eq!(seen, [100, 101, 102, 103]);
    }

    #[test]
    fn test_fixed_on_the_last_record_finishes() {
        let band = BandPlan::new(51, 461).unwrap();
        let tmp = recording(1);
        let mut source = FileSequence::new(vec![(tmp.path().to_path_buf(), params(band))]).unwrap();
        let imager = Imager::new(layout(), mode3(), NPIX, None).unwrap();
        let mut session = session(band, false);
        session.submit_with(mhz(167), Continuation::Fixed).unwrap();

        // Nobody will answer, but the command channel stays open.
        let (_tx, commands) = unbounded();
        let (events, rx) = unbounded();
        let (_canceller, token) = cancellation();
        let error = AtomicCell::new(false);
        let summary = run_pipeline(
            session,
            &mut source,
            &imager,
            commands,
            events,
            &token,
            &error,
            None,
        )
        .unwrap();
        assert_eq!(summary.images, 1);
        assert_eq!(summary.finish_reason, FinishReason::Exhausted);

        let events = rx.try_iter().collect::<Vec<_>>();
        assert!(matches!(events[0], PipelineEvent::Image(_)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, PipelineEvent::Paused { .. })));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::Finished {
                reason: FinishReason::Exhausted,
                images: 1
            })
        ));
    }

    #[test]
    fn test_out_of_range_records_are_skipped() {
        let tmp = recording(3);
        // The data says it's pinned to 300, but we look at 167.
        let mut source = FileSequence::new(vec![(
            tmp.path().to_path_buf(),
            params(BandPlan::Pinned(300)),
        )])
        .unwrap();
        let imager = Imager::new(layout(), mode3(), NPIX, None).unwrap();
        let mut session = session(BandPlan::new(51, 461).unwrap(), false);
        session.submit_with(mhz(167), Continuation::Same).unwrap();

        let (_tx, commands) = unbounded();
        let (events, rx) = unbounded();
        let (_canceller, token) = cancellation();
        let error = AtomicCell::new(false);
        let summary = run_pipeline(
            session,
            &mut source,
            &imager,
            commands,
            events,
            &token,
            &error,
            None,
        )
        .unwrap();
        assert_eq!(summary.images, 0);
        assert_eq!(summary.skipped, 3);
        assert_eq!(
            rx.try_iter()
                .filter(|e| matches!(e, PipelineEvent::Skipped { .. }))
                .count(),
            3
        );
    }

    #[test]
    fn test_realtime_stops_only_on_cancellation() {
        let band = BandPlan::Pinned(167);
        let tmp = recording(2);
        let reader = XstReader::open(tmp.path(), params(band)).unwrap();
        let mut source = FollowReader::new(
            reader,
            Duration::from_millis(5),
            Duration::from_millis(40),
        );
        let imager = Imager::new(layout(), mode3(), NPIX, None).unwrap();
        let mut session = session(band, true);
        session.select_pinned().unwrap();

        let (_tx, commands) = unbounded();
        let (events, rx) = unbounded();
        let (canceller, token) = cancellation();
        let error = AtomicCell::new(false);

        thread::scope(|s| {
            let handle = s.spawn(|| {
                run_pipeline(
                    session,
                    &mut source,
                    &imager,
                    commands,
                    events,
                    &token,
                    &error,
                    None,
                )
            });
            // Both records, then at least a couple of stalls.
            let mut images = 0;
            let mut stalls = 0;
            for event in rx.iter() {
                match event {
                    PipelineEvent::Image(_) => images += 1,
                    PipelineEvent::Stalled { .. } => {
                        stalls += 1;
                        if stalls == 3 {
                            break;
                        }
                    }
                    PipelineEvent::Finished { .. } => panic!("finished without cancellation"),
                    _ => (),
                }
            }
            assert_eq!(images, 2);
            canceller.cancel();
            let summary = handle.join().unwrap().unwrap();
            assert_eq!(summary.finish_reason, FinishReason::Stopped);
        });
    }
}
