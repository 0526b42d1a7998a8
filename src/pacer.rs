//! Pacing of provider-pushed audio into the host output
//!
//! The provider pushes decoded frames whenever it likes. The pacer stamps
//! them against a playback clock and forwards them to the host's
//! elementary stream, but refuses any delivery that would put the output
//! more than [`MAX_LOOKAHEAD`] ahead of the wall clock. A refused delivery
//! is simply offered again later by the provider; there is no queue here.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::host::{AudioBlock, EsId, EsOut, StreamFormat};
use crate::provider::Provider;

/// How far ahead of the wall clock audio may be committed
pub const MAX_LOOKAHEAD: Duration = Duration::from_millis(250);

/// Presentation clock driven by the number of delivered samples
#[derive(Clone, Debug)]
pub struct PlaybackClock {
    rate: u32,
    /// Presentation time the sample counter is relative to
    base: Duration,
    samples: u64,
    /// Wall-clock instant at which `origin_pts` should be playing
    origin: Instant,
    origin_pts: Duration,
}

impl PlaybackClock {
    pub fn new(rate: u32, pts: Duration, now: Instant) -> Self {
        Self {
            rate: rate.max(1),
            base: pts,
            samples: 0,
            origin: now,
            origin_pts: pts,
        }
    }

    pub fn pts(&self) -> Duration {
        let micros = self.samples.saturating_mul(1_000_000) / u64::from(self.rate);
        self.base.saturating_add(Duration::from_micros(micros))
    }

    /// Advance by `frames` and return the new pts
    pub fn advance(&mut self, frames: u64) -> Duration {
        self.samples += frames;
        self.pts()
    }

    /// Continue from `pts` as if it started playing at `now`
    pub fn restart_at(&mut self, pts: Duration, now: Instant) {
        self.base = pts;
        self.samples = 0;
        self.origin = now;
        self.origin_pts = pts;
    }

    /// Committed audio beyond what the wall clock has played
    pub fn lookahead(&self, now: Instant) -> Duration {
        let played = self
            .origin_pts
            .saturating_add(now.saturating_duration_since(self.origin));
        self.pts().saturating_sub(played)
    }
}

#[derive(Default)]
struct PacerState {
    format: Option<StreamFormat>,
    es: Option<EsId>,
    clock: Option<PlaybackClock>,
    /// Resume/seek position
    offset: Duration,
    duration: Option<Duration>,
}

impl PacerState {
    fn pts(&self) -> Duration {
        self.clock.as_ref().map(PlaybackClock::pts).unwrap_or(self.offset)
    }

    fn restart_clock(&mut self, pts: Duration) {
        if let Some(clock) = self.clock.as_mut() {
            clock.restart_at(pts, Instant::now());
        }
    }
}

/// Guarded by the audio lock; shared by the provider's delivery thread,
/// the session thread (end of track) and the control thread (seek/pause).
pub struct AudioPacer {
    state: Mutex<PacerState>,
    out: Arc<dyn EsOut>,
}

impl AudioPacer {
    pub fn new(out: Arc<dyn EsOut>) -> Self {
        Self {
            state: Mutex::new(PacerState::default()),
            out,
        }
    }

    /// Offer `num_frames` interleaved frames; returns the number accepted.
    pub fn deliver(&self, format: StreamFormat, frames: &[i16], num_frames: usize) -> usize {
        if num_frames == 0 || format.channels == 0 {
            return 0;
        }

        let mut state = self.state.lock();

        if state.format.is_none() {
            state.es = self.out.add(&format);
            state.clock = Some(PlaybackClock::new(format.sample_rate, state.offset, Instant::now()));
            state.format = Some(format);
            tracing::info!(
                channels = format.channels,
                sample_rate = format.sample_rate,
                bitrate = format.bitrate(),
                "Audio format established"
            );
        }

        let Some(clock) = state.clock.as_ref() else {
            return 0;
        };
        let pts = clock.pts();
        let lookahead = clock.lookahead(Instant::now());
        if lookahead > MAX_LOOKAHEAD {
            tracing::trace!(lookahead_ms = lookahead.as_millis() as u64, "Delivery refused");
            return 0;
        }

        let Some(es) = state.es else {
            return 0;
        };

        let channels = usize::from(format.channels);
        let num_frames = num_frames.min(frames.len() / channels);
        if num_frames == 0 {
            return 0;
        }
        let len = num_frames * channels;

        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            tracing::warn!(samples = len, "Could not allocate audio block");
            return 0;
        }
        data.extend_from_slice(&frames[..len]);

        let Some(clock) = state.clock.as_mut() else {
            return 0;
        };
        let end = clock.advance(num_frames as u64);

        self.out.set_pcr(pts);
        self.out.send(
            es,
            AudioBlock {
                pts,
                dts: pts,
                length: end - pts,
                samples: len,
                data,
            },
        );

        num_frames
    }

    /// Pause or resume delivery
    pub fn set_paused(&self, provider: &dyn Provider, paused: bool) {
        let mut state = self.state.lock();
        if paused {
            state.offset = state.pts();
            crate::provider_call!("player_play", play = false);
            provider.player_play(false);
        } else {
            let offset = state.offset;
            state.restart_clock(offset);
            crate::provider_call!("player_play", play = true);
            provider.player_play(true);
        }
    }

    /// Seek to `position`, clamped to the track length when it is known
    pub fn seek(&self, provider: &dyn Provider, position: Duration) {
        let mut state = self.state.lock();
        let position = state.duration.map_or(position, |duration| position.min(duration));
        state.offset = position;
        crate::provider_call!("player_seek", position_ms = position.as_millis() as u64);
        provider.player_seek(position);
        state.restart_clock(position);
    }

    /// Seek to a fraction of the track length. Returns false when the
    /// length is not known yet or the fraction is not a finite number.
    pub fn seek_fraction(&self, provider: &dyn Provider, fraction: f64) -> bool {
        if !fraction.is_finite() {
            return false;
        }
        let Some(duration) = self.duration() else {
            return false;
        };
        let position = duration.mul_f64(fraction.clamp(0.0, 1.0));
        self.seek(provider, position);
        true
    }

    pub fn time(&self) -> Duration {
        self.state.lock().pts()
    }

    /// Current position as a fraction of the length
    pub fn position(&self) -> f64 {
        let state = self.state.lock();
        match state.duration {
            Some(duration) if !duration.is_zero() => state.pts().as_secs_f64() / duration.as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.state.lock().duration
    }

    pub fn set_duration(&self, duration: Option<Duration>) {
        self.state.lock().duration = duration;
    }

    /// Provider reported the end of the track: drop the output stream
    pub fn end_of_track(&self) {
        let mut state = self.state.lock();
        if let Some(es) = state.es.take() {
            tracing::debug!(?es, "Removing audio stream at end of track");
            self.out.del(es);
        }
    }

    /// Output stream gone after audio had started
    pub fn is_eof(&self) -> bool {
        let state = self.state.lock();
        state.es.is_none() && state.format.is_some()
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.state.lock().format
    }

    /// Drop the output stream if still present (close path)
    pub fn teardown(&self) {
        self.end_of_track();
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::test_utils::RecordingEsOut;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Accepted blocks are contiguous and never more than the
        /// look-ahead ahead of the elapsed wall clock.
        #[test]
        fn accepted_blocks_respect_lookahead(
            sizes in prop::collection::vec(1usize..8000, 1..40),
            rate in prop::sample::select(vec![22_050u32, 44_100, 48_000]),
        ) {
            let out = Arc::new(RecordingEsOut::default());
            let pacer = AudioPacer::new(out.clone());
            let format = StreamFormat { channels: 2, sample_rate: rate };
            let started = Instant::now();

            let mut accepted_total = 0u64;
            for size in sizes {
                let frames = vec![0i16; size * 2];
                let accepted = pacer.deliver(format, &frames, size);
                let elapsed = started.elapsed();
                prop_assert!(accepted == 0 || accepted == size);
                if accepted > 0 {
                    let block = out.blocks().pop().unwrap();
                    prop_assert!(block.pts <= MAX_LOOKAHEAD + elapsed);
                    accepted_total += accepted as u64;
                }
            }

            let blocks = out.blocks();
            for pair in blocks.windows(2) {
                prop_assert_eq!(pair[0].pts + pair[0].length, pair[1].pts);
            }
            let expected = Duration::from_micros(accepted_total * 1_000_000 / u64::from(rate));
            prop_assert_eq!(pacer.time(), expected);
        }
    }
}
