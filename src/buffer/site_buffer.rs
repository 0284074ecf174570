//! Sliding-window displacement cache
//!
//! Each channel is a fixed-length ring of `maxpts = round(bufflen/dt) + 1`
//! samples anchored to an absolute epoch (the time of logical slot 0).
//! Samples are placed by absolute time, `index = round((t - epoch)/dt)`,
//! so re-delivered or out-of-order runs land in the same slot. Slots that
//! were never written read back as NaN.

use crate::acquisition::DecodedRun;
use crate::types::Component;

/// Relative tolerance for matching a run's sampling period to the buffer
const DT_TOLERANCE: f64 = 1.0e-6;

/// One channel's time-indexed ring buffer.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    dt: f64,
    maxpts: usize,
    /// Absolute time of logical slot 0
    epoch: f64,
    /// Physical position of logical slot 0
    head: usize,
    data: Vec<f64>,
}

impl ChannelBuffer {
    /// Window covering `[epoch, epoch + bufflen]`.
    pub fn new(bufflen: f64, dt: f64, epoch: f64) -> Self {
        let maxpts = (bufflen / dt).round() as usize + 1;
        Self { dt, maxpts, epoch, head: 0, data: vec![f64::NAN; maxpts] }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn maxpts(&self) -> usize {
        self.maxpts
    }

    pub fn epoch(&self) -> f64 {
        self.epoch
    }

    /// Time of the last slot in the window
    pub fn end_time(&self) -> f64 {
        self.time_at(self.maxpts - 1)
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.epoch + index as f64 * self.dt
    }

    /// Logical slot for an absolute time, if inside the window.
    pub fn index_of(&self, t: f64) -> Option<usize> {
        let index = ((t - self.epoch) / self.dt).round();
        if index >= 0.0 && index < self.maxpts as f64 {
            Some(index as usize)
        } else {
            None
        }
    }

    fn physical(&self, index: usize) -> usize {
        (self.head + index) % self.maxpts
    }

    pub fn get(&self, index: usize) -> f64 {
        if index < self.maxpts {
            self.data[self.physical(index)]
        } else {
            f64::NAN
        }
    }

    /// Store a value at an absolute time. Returns false when out of window.
    pub fn insert(&mut self, t: f64, value: f64) -> bool {
        match self.index_of(t) {
            Some(index) => {
                let slot = self.physical(index);
                self.data[slot] = value;
                true
            }
            None => false,
        }
    }

    /// Slide the window so its newest slot is at or just past `now`.
    ///
    /// The epoch moves by whole samples and the vacated slots are cleared.
    /// A clock that moves backwards leaves the window unchanged.
    pub fn advance_to(&mut self, now: f64) {
        let target_epoch = now - (self.maxpts - 1) as f64 * self.dt;
        let shift = ((target_epoch - self.epoch) / self.dt).ceil();
        if shift.is_nan() || shift <= 0.0 {
            return;
        }
        if shift >= self.maxpts as f64 {
            self.data.fill(f64::NAN);
            self.head = 0;
        } else {
            let shift = shift as usize;
            for index in 0..shift {
                let slot = self.physical(index);
                self.data[slot] = f64::NAN;
            }
            self.head = (self.head + shift) % self.maxpts;
        }
        self.epoch += shift * self.dt;
    }

    /// Newest slot holding a finite value
    pub fn newest_index(&self) -> Option<usize> {
        (0..self.maxpts).rev().find(|&i| self.get(i).is_finite())
    }

    /// Logical index range covering `[t0, t1]`, clipped to the window.
    pub fn index_range(&self, t0: f64, t1: f64) -> std::ops::Range<usize> {
        let start = ((t0 - self.epoch) / self.dt).ceil().max(0.0);
        let end = ((t1 - self.epoch) / self.dt).floor() + 1.0;
        let end = end.min(self.maxpts as f64);
        if end <= start {
            return 0..0;
        }
        start as usize..end as usize
    }

    /// `(time, value)` pairs in logical order, including NaN gaps
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        (0..self.maxpts).map(move |i| (self.time_at(i), self.get(i)))
    }

    pub fn finite_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }
}

/// Three-component buffer for one site.
///
/// All channels share `dt` and epoch, so a logical index addresses the same
/// instant on every component.
#[derive(Debug, Clone)]
pub struct SiteBuffer {
    up: ChannelBuffer,
    north: ChannelBuffer,
    east: ChannelBuffer,
}

impl SiteBuffer {
    pub fn new(bufflen: f64, dt: f64, epoch: f64) -> Self {
        let channel = ChannelBuffer::new(bufflen, dt, epoch);
        Self { up: channel.clone(), north: channel.clone(), east: channel }
    }

    pub fn channel(&self, component: Component) -> &ChannelBuffer {
        match component {
            Component::Up => &self.up,
            Component::North => &self.north,
            Component::East => &self.east,
        }
    }

    fn channel_mut(&mut self, component: Component) -> &mut ChannelBuffer {
        match component {
            Component::Up => &mut self.up,
            Component::North => &mut self.north,
            Component::East => &mut self.east,
        }
    }

    pub fn dt(&self) -> f64 {
        self.up.dt()
    }

    /// Merge a run into one component, converting counts to metres.
    ///
    /// Returns the number of samples placed inside the window.
    pub fn merge(&mut self, component: Component, run: &DecodedRun, gain: f64) -> usize {
        let dt = self.dt();
        if (run.dt - dt).abs() > DT_TOLERANCE * dt {
            tracing::warn!(
                site = %run.key,
                component = %component,
                buffer_dt = dt,
                run_dt = run.dt,
                "Sampling period mismatch; run not merged"
            );
            return 0;
        }

        let channel = self.channel_mut(component);
        run.timed_samples()
            .filter(|&(t, count)| channel.insert(t, count as f64 / gain))
            .count()
    }

    pub fn advance_to(&mut self, now: f64) {
        self.up.advance_to(now);
        self.north.advance_to(now);
        self.east.advance_to(now);
    }

    /// Newest index where all three components are finite
    pub fn newest_common_index(&self) -> Option<usize> {
        (0..self.up.maxpts()).rev().find(|&i| {
            self.up.get(i).is_finite() && self.north.get(i).is_finite() && self.east.get(i).is_finite()
        })
    }
}
