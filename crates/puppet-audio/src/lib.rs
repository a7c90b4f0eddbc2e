//! Audio pipeline: pulls synthesized mono PCM from the native engine at a
//! fixed cadence, resamples to the target rate as interleaved stereo, and
//! writes whole blocks into a bounded outbound ring.
//!
//! The pump cadence is independent of the simulation tick. The accumulator
//! is clamped so a long stall never causes unbounded catch-up, and a ring
//! write either fits entirely or is skipped entirely — audio glitches under
//! backpressure instead of corrupting buffer state.
#![forbid(unsafe_code)]

use log::debug;
use puppet_native::{CharEngine, NATIVE_SAMPLE_RATE};

/// Pump cadence in steps per second.
pub const PUMP_HZ: f64 = 30.0;
/// Wall-clock period of one pump step.
pub const STEP_MS: f64 = 1000.0 / PUMP_HZ;
/// Mono frames pulled from the engine per step (two engine audio frames).
pub const BLOCK_FRAMES: usize = 1088;
/// Most steps a stalled pump is allowed to run back-to-back.
pub const MAX_BACKLOG_STEPS: u32 = 4;

/// Linear-interpolation resampler, mono in, interleaved stereo out.
/// Fractional phase carries across blocks so consecutive blocks splice
/// without dropping or duplicating samples.
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    phase: f64,
}

impl LinearResampler {
    pub fn new(src_rate: u32, dst_rate: u32) -> Self {
        Self {
            src_rate,
            dst_rate,
            phase: 0.0,
        }
    }

    /// Append resampled stereo frames to `out`. Returns the number of frames
    /// appended: `ceil((len - phase) * dst / src)`.
    pub fn process(&mut self, input: &[i16], out: &mut Vec<f32>) -> usize {
        if input.is_empty() {
            return 0;
        }
        let step = self.src_rate as f64 / self.dst_rate as f64;
        let len = input.len();
        let mut pos = self.phase;
        let mut frames = 0usize;
        while pos < len as f64 {
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let s0 = input[idx] as f32 / 32768.0;
            let s1 = if idx + 1 < len {
                input[idx + 1] as f32 / 32768.0
            } else {
                s0
            };
            let v = s0 + (s1 - s0) * frac;
            out.push(v);
            out.push(v);
            frames += 1;
            pos += step;
        }
        self.phase = pos - len as f64;
        frames
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Bounded ring of interleaved stereo `f32` samples. Writes are
/// all-or-nothing; partial writes never happen.
pub struct AudioRing {
    buf: Vec<f32>,
    head: usize,
    len: usize,
}

impl AudioRing {
    pub fn new(capacity_samples: usize) -> Self {
        Self {
            buf: vec![0.0; capacity_samples],
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn occupied(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Write the whole slice or nothing. Returns whether it was written.
    pub fn write_all(&mut self, samples: &[f32]) -> bool {
        if samples.len() > self.available() {
            return false;
        }
        let cap = self.buf.len();
        let mut tail = (self.head + self.len) % cap;
        for &s in samples {
            self.buf[tail] = s;
            tail = (tail + 1) % cap;
        }
        self.len += samples.len();
        true
    }

    /// Pop up to `out.len()` samples into `out`; returns how many were popped.
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.len);
        let cap = self.buf.len();
        for slot in out.iter_mut().take(n) {
            *slot = self.buf[self.head];
            self.head = (self.head + 1) % cap;
        }
        self.len -= n;
        n
    }
}

/// Fixed-cadence pump driving engine pull → resample → ring write.
pub struct AudioPump {
    acc_ms: f64,
    last_ms: Option<f64>,
    mono: Vec<i16>,
    stereo: Vec<f32>,
    resampler: LinearResampler,
    volume: f32,
    enabled: bool,
    skipped_blocks: u64,
}

impl AudioPump {
    pub fn new(target_rate: u32, volume: f32, enabled: bool) -> Self {
        Self {
            acc_ms: 0.0,
            last_ms: None,
            mono: vec![0; BLOCK_FRAMES],
            stereo: Vec::with_capacity(BLOCK_FRAMES * 4),
            resampler: LinearResampler::new(NATIVE_SAMPLE_RATE, target_rate),
            volume,
            enabled,
            skipped_blocks: 0,
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    /// Blocks dropped so far because the ring had no room.
    pub fn skipped_blocks(&self) -> u64 {
        self.skipped_blocks
    }

    /// Advance the pump to `now_ms`, running zero or more cadence steps.
    pub fn step(&mut self, now_ms: f64, engine: &mut dyn CharEngine, ring: &mut AudioRing) {
        let last = self.last_ms.replace(now_ms);
        if !self.enabled {
            return;
        }
        if let Some(last) = last {
            self.acc_ms += (now_ms - last).max(0.0);
        }
        // Clamp backlog after a stall; we drop time, not buffer state.
        let max_acc = STEP_MS * MAX_BACKLOG_STEPS as f64;
        if self.acc_ms > max_acc {
            self.acc_ms = max_acc;
        }
        while self.acc_ms >= STEP_MS {
            self.acc_ms -= STEP_MS;
            self.pump_once(engine, ring);
        }
    }

    fn pump_once(&mut self, engine: &mut dyn CharEngine, ring: &mut AudioRing) {
        let n = engine.audio_tick(BLOCK_FRAMES, &mut self.mono);
        if n == 0 {
            return;
        }
        self.stereo.clear();
        self.resampler.process(&self.mono[..n], &mut self.stereo);
        if self.volume != 1.0 {
            for s in &mut self.stereo {
                *s *= self.volume;
            }
        }
        if !ring.write_all(&self.stereo) {
            self.skipped_blocks += 1;
            debug!(
                "audio block skipped: {} samples > {} available",
                self.stereo.len(),
                ring.available()
            );
        }
    }
}
