//! Decode pump: the feed/drain loop running on its own thread.
//!
//! Each iteration feeds one sample into the decoder, drains at most one
//! decoded frame into the pool, then wakes the consumer. Both sides use the
//! same bounded wait, so the loop observes a shutdown request within roughly
//! two waits. At end of stream the decoder is flushed and the demuxer rewinds
//! to the first sync sample, making playback loop forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use crate::core::time;
use crate::decode::codec::{OutputEvent, VideoDecoder};
use crate::decode::demuxer::{Demuxer, SampleRead};
use crate::playback::state::RunStateCell;
use crate::playback::sync::FrameSignal;

/// Counters updated by the pump, readable from any thread
#[derive(Debug, Default)]
pub struct PumpCounters {
    samples_submitted: AtomicU64,
    frames_rendered: AtomicU64,
    loops: AtomicU64,
    format_changes: AtomicU64,
}

impl PumpCounters {
    pub fn snapshot(&self) -> PumpStats {
        PumpStats {
            samples_submitted: self.samples_submitted.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            loops: self.loops.load(Ordering::Relaxed),
            format_changes: self.format_changes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pump activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Samples handed to the decoder
    pub samples_submitted: u64,
    /// Decoded frames published to the pool
    pub frames_rendered: u64,
    /// Completed passes through the stream
    pub loops: u64,
    pub format_changes: u64,
}

/// Outcome of one feed step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Submitted,
    /// No input slot within the wait
    Idle,
    /// End of stream reached; rewound to the start
    Looped,
    /// A collaborator failed; the slot was returned
    Skipped,
}

/// Collaborators handed back when the pump exits
pub struct PumpParts {
    pub decoder: Box<dyn VideoDecoder>,
    pub demuxer: Box<dyn Demuxer>,
}

/// Owns the decoder and demuxer for the lifetime of the pump thread
pub struct DecodePump {
    decoder: Box<dyn VideoDecoder>,
    demuxer: Box<dyn Demuxer>,
    run_state: Arc<RunStateCell>,
    signal: Arc<FrameSignal>,
    counters: Arc<PumpCounters>,
    timeout: Duration,
}

impl DecodePump {
    pub fn new(
        decoder: Box<dyn VideoDecoder>,
        demuxer: Box<dyn Demuxer>,
        run_state: Arc<RunStateCell>,
        signal: Arc<FrameSignal>,
        counters: Arc<PumpCounters>,
        timeout: Duration,
    ) -> Self {
        Self {
            decoder,
            demuxer,
            run_state,
            signal,
            counters,
            timeout,
        }
    }

    /// Loop until the run state leaves `Running`
    pub fn run(mut self) -> PumpParts {
        info!("Decode pump started");
        while self.run_state.is_running() {
            self.step();
        }
        let stats = self.counters.snapshot();
        info!(
            "Decode pump finished: {} samples, {} frames, {} loops",
            stats.samples_submitted, stats.frames_rendered, stats.loops
        );
        PumpParts {
            decoder: self.decoder,
            demuxer: self.demuxer,
        }
    }

    /// One feed/drain/notify iteration
    pub fn step(&mut self) {
        if self.feed() == Feed::Looped {
            return;
        }
        self.drain();
        self.signal.notify();
    }

    fn feed(&mut self) -> Feed {
        let Some(slot) = self.decoder.dequeue_input(self.timeout) else {
            return Feed::Idle;
        };

        let read = match self.decoder.input_buffer(slot) {
            Ok(buffer) => self.demuxer.read_sample(buffer),
            Err(err) => {
                warn!("Input slot {} unusable: {}", slot.0, err);
                self.decoder.cancel_input(slot);
                return Feed::Skipped;
            }
        };

        match read {
            Ok(SampleRead::Data(size)) => {
                match self.decoder.queue_input(slot, size, time::ZERO) {
                    Ok(()) => {
                        self.counters.samples_submitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        warn!("Failed to submit {} byte sample: {}", size, err);
                        self.decoder.cancel_input(slot);
                    }
                }
                self.demuxer.advance();
                Feed::Submitted
            }
            Ok(SampleRead::EndOfStream) => {
                self.decoder.cancel_input(slot);
                if let Err(err) = self.decoder.flush() {
                    warn!("Decoder flush failed: {}", err);
                }
                if let Err(err) = self.demuxer.seek_to_sync(time::ZERO) {
                    warn!("Rewind failed: {}", err);
                }
                let loops = self.counters.loops.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("End of stream, looping (pass {})", loops);
                Feed::Looped
            }
            Err(err) => {
                warn!("Skipping unreadable sample: {}", err);
                self.decoder.cancel_input(slot);
                self.demuxer.advance();
                Feed::Skipped
            }
        }
    }

    fn drain(&mut self) {
        match self.decoder.dequeue_output(self.timeout) {
            OutputEvent::Frame(slot) => {
                let decoder = &mut self.decoder;
                match self.signal.publish(|| decoder.release_output(slot, true)) {
                    Ok(()) => {
                        self.counters.frames_rendered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => warn!("Failed to render output {}: {}", slot.0, err),
                }
            }
            OutputEvent::FormatChanged(format) => {
                self.counters.format_changes.fetch_add(1, Ordering::Relaxed);
                debug!("Decoder output format changed: {}", format);
            }
            OutputEvent::TryAgain => trace!("No decoder output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use crate::decode::mock::{samples, video_track, DecoderScript, MockLog, ScriptedDecoder, ScriptedDemuxer, SharedLog};
    use crate::decode::track::PixelFormat;
    use crate::playback::state::RunState;
    use crate::playback::sync::Wait;
    use crate::pool::{Frame, FramePool};

    struct Rig {
        pump: DecodePump,
        pool: FramePool,
        signal: Arc<FrameSignal>,
        counters: Arc<PumpCounters>,
        run_state: Arc<RunStateCell>,
        log: SharedLog,
    }

    impl Rig {
        fn acquire(&self) -> Option<Frame> {
            self.signal.take_latest(&self.pool, Wait::Never)
        }
    }

    fn rig_with(samples: Vec<Vec<u8>>, capacity: usize, script: DecoderScript) -> Rig {
        let log = MockLog::shared();
        let track = video_track(0, 4, 4);
        let mut demuxer = ScriptedDemuxer::new(vec![track.clone()], samples, log.clone());
        demuxer.select_track(0).unwrap();

        let pool = FramePool::new(4, 4, PixelFormat::Rgba8, capacity).unwrap();
        let mut decoder = ScriptedDecoder::new(script, log.clone());
        decoder.configure(&track, pool.surface()).unwrap();
        decoder.start().unwrap();

        let run_state = Arc::new(RunStateCell::new());
        run_state.transition(RunState::Stopped, RunState::Running).unwrap();
        let signal = Arc::new(FrameSignal::new());
        let counters = Arc::new(PumpCounters::default());
        let pump = DecodePump::new(
            Box::new(decoder),
            Box::new(demuxer),
            Arc::clone(&run_state),
            Arc::clone(&signal),
            Arc::clone(&counters),
            Duration::ZERO,
        );
        Rig { pump, pool, signal, counters, run_state, log }
    }

    fn rig(names: &[&str], capacity: usize) -> Rig {
        rig_with(samples(names), capacity, DecoderScript::default())
    }

    fn payload(frame: &Frame) -> u8 {
        frame.pixels()[0]
    }

    #[test]
    fn test_latest_drained_frame_wins() {
        let mut rig = rig(&["A", "B", "C"], 3);
        rig.pump.step();
        rig.pump.step();
        // C is submitted but never drained
        assert_eq!(rig.pump.feed(), Feed::Submitted);

        let frame = rig.acquire().unwrap();
        assert_eq!(payload(&frame), b'B');
        assert_eq!(rig.pool.stats().dropped, 1);
        assert_eq!(rig.log.lock().submitted, samples(&["A", "B", "C"]));
    }

    #[test]
    fn test_stalls_at_capacity() {
        let names = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];
        let mut rig = rig(&names, 3);
        let footprint = rig.pool.capacity() * rig.pool.frame_size();

        for _ in 0..10 {
            rig.pump.step();
            assert!(rig.pool.outstanding() <= 3);
        }

        assert_eq!(rig.pool.outstanding(), 3);
        assert_eq!(rig.pool.stats().produced, 3);
        assert_eq!(rig.counters.snapshot().frames_rendered, 3);
        assert_eq!(rig.log.lock().stalls, 7);
        assert_eq!(rig.pool.capacity() * rig.pool.frame_size(), footprint);

        // Acquiring frees the superseded slots and the decoder resumes
        let frame = rig.acquire().unwrap();
        assert_eq!(payload(&frame), b'C');
        assert_eq!(rig.pool.outstanding(), 1);
        rig.pump.drain();
        assert_eq!(rig.pool.stats().produced, 4);
    }

    #[test]
    fn test_loops_after_end_of_stream() {
        let mut rig = rig(&["A", "B"], 3);
        rig.pump.step();
        rig.pump.step();
        assert_eq!(rig.pump.feed(), Feed::Looped);
        rig.pump.step();

        let log = rig.log.lock();
        assert_eq!(log.submitted, samples(&["A", "B", "A"]));
        assert_eq!(log.flushes, 1);
        assert_eq!(log.seeks, 1);
        drop(log);
        assert_eq!(rig.counters.snapshot().loops, 1);
    }

    #[test]
    fn test_end_of_stream_skips_drain_and_notify() {
        let mut rig = rig(&["A"], 3);
        rig.pump.step();
        let _ = rig.acquire().unwrap();

        rig.pump.step();
        assert!(!rig.signal.is_available());
        assert_eq!(rig.counters.snapshot().frames_rendered, 1);
    }

    #[test]
    fn test_no_frame_delivered_twice() {
        let mut rig = rig(&["A", "B"], 3);
        rig.pump.step();
        let first = rig.acquire().unwrap();
        let first_seq = first.seq();
        first.release();
        assert!(rig.acquire().is_none());

        // Feeding alone produces nothing new
        rig.pump.feed();
        assert!(rig.acquire().is_none());

        rig.pump.drain();
        let second = rig.acquire().unwrap();
        assert!(second.seq() > first_seq);
        assert_eq!(payload(&second), b'B');
    }

    #[test]
    fn test_format_change_is_discarded() {
        let script = DecoderScript {
            announce_format: true,
            ..DecoderScript::default()
        };
        let mut rig = rig_with(samples(&["A", "B"]), 3, script);
        rig.pump.step();
        assert!(rig.acquire().is_none());

        rig.pump.step();
        let frame = rig.acquire().unwrap();
        assert_eq!(payload(&frame), b'A');
        assert_eq!(rig.counters.snapshot().format_changes, 1);
    }

    #[test]
    fn test_unreadable_sample_is_skipped() {
        let mut rig = rig_with(vec![vec![0u8; 65], b"B".to_vec()], 3, DecoderScript::default());
        rig.pump.step();
        assert!(rig.acquire().is_none());

        rig.pump.step();
        assert_eq!(payload(&rig.acquire().unwrap()), b'B');
        assert_eq!(rig.log.lock().submitted, samples(&["B"]));
    }

    #[test]
    fn test_run_exits_on_terminate() {
        let rig = rig(&["A", "B", "C"], 3);
        let run_state = Arc::clone(&rig.run_state);
        let pump = rig.pump;

        let handle = thread::spawn(move || pump.run());
        thread::sleep(Duration::from_millis(20));
        run_state.transition(RunState::Running, RunState::Terminating).unwrap();

        let parts = handle.join().unwrap();
        assert_eq!(parts.demuxer.track_count(), 1);
        assert!(rig.counters.snapshot().loops > 0);
    }
}
