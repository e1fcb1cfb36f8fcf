//! Gapless playback scheduling for inbound audio.
//!
//! Buffers arrive in order but at irregular wall-clock intervals. Each one is
//! started at `max(next_start_time, now)` and the accumulator advances by the
//! buffer's duration, so consecutive buffers chain without gaps when they
//! arrive ahead of real time and never overlap when they arrive late.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::audio::{AudioOutput, VoiceId};
use crate::codec::PcmBuffer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub voice: VoiceId,
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    next_start_time: f64,
    // Voice ids grow monotonically, so key order is scheduling order.
    pending: BTreeMap<VoiceId, ScheduledBuffer>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let next_start_time = output.now();
        Self {
            output,
            next_start_time,
            pending: BTreeMap::new(),
        }
    }

    pub fn enqueue(&mut self, buffer: PcmBuffer) -> ScheduledBuffer {
        let start = self.next_start_time.max(self.output.now());
        let end = start + buffer.duration();
        let voice = self.output.start(buffer, start);
        self.next_start_time = end;

        let scheduled = ScheduledBuffer { voice, start, end };
        self.pending.insert(voice, scheduled);
        scheduled
    }

    /// Natural completion of a voice. Unknown ids (already flushed, or not
    /// ours) are ignored.
    pub fn retire(&mut self, voice: VoiceId) -> bool {
        self.pending.remove(&voice).is_some()
    }

    /// Cancels every pending voice and resets the timeline so the next buffer
    /// starts at the output's current time. Returns how many were cancelled.
    pub fn flush(&mut self) -> usize {
        let cancelled = self.pending.len();
        for voice in self.pending.keys() {
            self.output.stop(*voice);
        }
        self.pending.clear();
        self.next_start_time = 0.0;
        cancelled
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &ScheduledBuffer> {
        self.pending.values()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ManualOutput {
        inner: Mutex<ManualState>,
    }

    #[derive(Default)]
    struct ManualState {
        now: f64,
        next_id: VoiceId,
        stopped: Vec<VoiceId>,
    }

    impl ManualOutput {
        fn advance_to(&self, t: f64) {
            self.inner.lock().unwrap().now = t;
        }
    }

    impl AudioOutput for ManualOutput {
        fn sample_rate(&self) -> u32 {
            24_000
        }
        fn now(&self) -> f64 {
            self.inner.lock().unwrap().now
        }
        fn start(&self, _buffer: PcmBuffer, _at: f64) -> VoiceId {
            let mut s = self.inner.lock().unwrap();
            s.next_id += 1;
            s.next_id
        }
        fn stop(&self, voice: VoiceId) {
            self.inner.lock().unwrap().stopped.push(voice);
        }
    }

    fn buffer(secs: f64) -> PcmBuffer {
        PcmBuffer::new(vec![0.0; (secs * 24_000.0).round() as usize], 24_000)
    }

    #[test]
    fn early_buffers_chain_without_gaps() {
        let out = Arc::new(ManualOutput::default());
        out.advance_to(10.0);
        let mut sched = PlaybackScheduler::new(out.clone());

        let a = sched.enqueue(buffer(0.5));
        out.advance_to(10.1);
        let b = sched.enqueue(buffer(0.25));

        assert_eq!(a.start, 10.0);
        assert_eq!(b.start, a.end);
        assert_eq!(sched.pending_len(), 2);
    }

    #[test]
    fn late_buffer_starts_at_clock_not_in_the_past() {
        let out = Arc::new(ManualOutput::default());
        let mut sched = PlaybackScheduler::new(out.clone());
        let a = sched.enqueue(buffer(0.5));
        out.advance_to(2.0);
        let b = sched.enqueue(buffer(0.5));
        assert_eq!(a.end, 0.5);
        assert_eq!(b.start, 2.0);
    }

    #[test]
    fn flush_cancels_everything_and_resets_timeline() {
        let out = Arc::new(ManualOutput::default());
        out.advance_to(5.0);
        let mut sched = PlaybackScheduler::new(out.clone());
        for _ in 0..3 {
            sched.enqueue(buffer(1.0));
        }
        out.advance_to(5.5);

        assert_eq!(sched.flush(), 3);
        assert_eq!(sched.pending_len(), 0);
        assert_eq!(sched.next_start_time(), 0.0);
        assert_eq!(out.inner.lock().unwrap().stopped, vec![1, 2, 3]);

        let next = sched.enqueue(buffer(0.1));
        assert_eq!(next.start, 5.5);
    }

    #[test]
    fn retire_drops_only_known_voices() {
        let out = Arc::new(ManualOutput::default());
        let mut sched = PlaybackScheduler::new(out);
        let a = sched.enqueue(buffer(0.1));
        assert!(sched.retire(a.voice));
        assert!(!sched.retire(a.voice));
        assert!(!sched.retire(999));
    }

    proptest! {
        #[test]
        fn never_overlaps_and_never_adds_gaps(
            arrivals in prop::collection::vec((0.0f64..0.5, 0.01f64..0.4), 1..40)
        ) {
            let out = Arc::new(ManualOutput::default());
            let mut sched = PlaybackScheduler::new(out.clone());
            let mut clock = 0.0;
            let mut prev: Option<ScheduledBuffer> = None;

            for (delay, len) in arrivals {
                clock += delay;
                out.advance_to(clock);
                let s = sched.enqueue(PcmBuffer::new(vec![0.0; (len * 24_000.0) as usize], 24_000));
                prop_assert!(s.start >= clock);
                if let Some(p) = prev {
                    prop_assert!(s.start >= p.end);
                    // Any gap comes only from the clock having moved past the previous end.
                    if p.end >= clock {
                        prop_assert_eq!(s.start, p.end);
                    } else {
                        prop_assert_eq!(s.start, clock);
                    }
                }
                prev = Some(s);
            }
        }
    }
}
