//! Streaming statistics counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Assumed capture format for the audio-seconds estimate: 16 kHz mono,
/// 16-bit samples. An approximation, not a wire contract; payloads in a
/// different format will skew the estimate.
const AUDIO_BYTES_PER_SECOND: u64 = 16_000 * 2;

/// Cumulative counters for one session. Shared across tasks, so every
/// field is an atomic; a consistent point-in-time view comes from
/// `snapshot`.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub text_deltas: AtomicU64,
    pub audio_bytes_in: AtomicU64,
    pub audio_bytes_out: AtomicU64,
    pub audio_flushes: AtomicU64,
    pub image_flushes: AtomicU64,
    pub chunks_evicted: AtomicU64,
    pub frames_superseded: AtomicU64,
    pub payloads_dropped: AtomicU64,
    pub tool_calls: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Plain-value copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub text_deltas: u64,
    pub audio_bytes_in: u64,
    pub audio_bytes_out: u64,
    pub audio_flushes: u64,
    pub image_flushes: u64,
    pub chunks_evicted: u64,
    pub frames_superseded: u64,
    pub payloads_dropped: u64,
    pub tool_calls: u64,
    pub reconnects: u64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            text_deltas: self.text_deltas.load(Ordering::Relaxed),
            audio_bytes_in: self.audio_bytes_in.load(Ordering::Relaxed),
            audio_bytes_out: self.audio_bytes_out.load(Ordering::Relaxed),
            audio_flushes: self.audio_flushes.load(Ordering::Relaxed),
            image_flushes: self.image_flushes.load(Ordering::Relaxed),
            chunks_evicted: self.chunks_evicted.load(Ordering::Relaxed),
            frames_superseded: self.frames_superseded.load(Ordering::Relaxed),
            payloads_dropped: self.payloads_dropped.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Approximate seconds of audio received, from the fixed-format
    /// byte divisor above.
    pub fn audio_seconds_in(&self) -> f64 {
        self.audio_bytes_in.load(Ordering::Relaxed) as f64 / AUDIO_BYTES_PER_SECOND as f64
    }

    /// Approximate seconds of audio sent.
    pub fn audio_seconds_out(&self) -> f64 {
        self.audio_bytes_out.load(Ordering::Relaxed) as f64 / AUDIO_BYTES_PER_SECOND as f64
    }

    pub fn reset(&self) {
        self.text_deltas.store(0, Ordering::Relaxed);
        self.audio_bytes_in.store(0, Ordering::Relaxed);
        self.audio_bytes_out.store(0, Ordering::Relaxed);
        self.audio_flushes.store(0, Ordering::Relaxed);
        self.image_flushes.store(0, Ordering::Relaxed);
        self.chunks_evicted.store(0, Ordering::Relaxed);
        self.frames_superseded.store(0, Ordering::Relaxed);
        self.payloads_dropped.store(0, Ordering::Relaxed);
        self.tool_calls.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StreamStats::new();
        stats.add(&stats.audio_bytes_in, 100);
        stats.add(&stats.audio_bytes_in, 50);
        stats.incr(&stats.text_deltas);

        let snap = stats.snapshot();
        assert_eq!(snap.audio_bytes_in, 150);
        assert_eq!(snap.text_deltas, 1);
        assert_eq!(snap.reconnects, 0);
    }

    #[test]
    fn audio_seconds_uses_fixed_divisor() {
        let stats = StreamStats::new();
        stats.add(&stats.audio_bytes_in, 32_000);
        assert!((stats.audio_seconds_in() - 1.0).abs() < f64::EPSILON);

        stats.add(&stats.audio_bytes_out, 16_000);
        assert!((stats.audio_seconds_out() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_clears_everything() {
        let stats = StreamStats::new();
        stats.add(&stats.audio_bytes_out, 7);
        stats.incr(&stats.reconnects);
        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.audio_bytes_out, 0);
        assert_eq!(snap.reconnects, 0);
    }
}
