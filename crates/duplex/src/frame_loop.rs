//! # DUPLEX Frame Loop
//!
//! ```text
//! Frame N:
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. UPDATE (sim thread)                                              │
//! │    └─ Mutate resources, each mutation marks its object dirty        │
//! │                                                                     │
//! │ 2. SYNC DOWNLOAD (sim thread)                                       │
//! │    ├─ Pull dependants of dirty objects into the dirty set           │
//! │    ├─ Serialize deltas, dependencies first                          │
//! │    └─ Push the batch, queue its upload on the core thread           │
//! │                                                                     │
//! │ 3. END FRAME                                                        │
//! │    └─ Swap frame allocators                                         │
//! │                                                                     │
//! │ Meanwhile (core thread): apply batch N-1, N-2 ... in order          │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use duplex_core::{CoreObjectManager, CoreThread, SyncConfig, SyncResult, SyncStats};

use crate::resources::ResourceContext;

/// Target frame time for 60 FPS.
pub const TARGET_FRAME_TIME: Duration = Duration::from_micros(16_666);

/// Configuration for the frame loop.
#[derive(Clone, Debug)]
pub struct FrameLoopConfig {
    /// Manager and core thread settings.
    pub sync: SyncConfig,
    /// Log frames that exceed [`TARGET_FRAME_TIME`].
    pub enable_timing_logs: bool,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            enable_timing_logs: true,
        }
    }
}

/// Timing and sync statistics of one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    /// Frame number.
    pub frame: u64,
    /// Total frame time in microseconds.
    pub total_us: u64,
    /// Update closure time in microseconds.
    pub update_us: u64,
    /// Download + queueing time in microseconds.
    pub sync_us: u64,
    /// What the download pass captured.
    pub sync: SyncStats,
}

/// What the update closure gets to see.
pub struct FrameContext<'a> {
    /// The manager resources register with.
    pub manager: &'a Arc<CoreObjectManager>,
    /// Current frame number.
    pub frame: u64,
    /// Delta time since last frame, clamped to 100ms.
    pub delta_time: f32,
}

/// Drives one sim/core frame at a time.
///
/// Resources created through [`resources`](Self::resources) must be
/// dropped before the loop itself.
pub struct FrameLoop {
    /// Declared first so it drains before the manager goes away.
    core_thread: CoreThread,
    manager: Arc<CoreObjectManager>,
    resources: ResourceContext,
    config: FrameLoopConfig,
    frame_count: u64,
    last_frame_time: Instant,
    stats_accumulator: FrameStatsAccumulator,
}

impl FrameLoop {
    /// Creates the manager and spawns the core thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the core thread
    /// cannot be spawned.
    pub fn new(config: FrameLoopConfig) -> SyncResult<Self> {
        config.sync.validate()?;
        let core_thread = CoreThread::spawn(&config.sync)?;
        let manager = CoreObjectManager::new(config.sync.clone());
        let resources = ResourceContext::new(&manager);

        Ok(Self {
            core_thread,
            manager,
            resources,
            config,
            frame_count: 0,
            last_frame_time: Instant::now(),
            stats_accumulator: FrameStatsAccumulator::new(),
        })
    }

    /// Returns the manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<CoreObjectManager> {
        &self.manager
    }

    /// Returns the context resources are created with.
    #[must_use]
    pub fn resources(&self) -> &ResourceContext {
        &self.resources
    }

    /// Returns the core thread.
    #[must_use]
    pub fn core_thread(&self) -> &CoreThread {
        &self.core_thread
    }

    /// Returns the number of frames run.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Returns the accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> &FrameStatsAccumulator {
        &self.stats_accumulator
    }

    /// Runs one frame: `update`, then a sync pass, then the allocator swap.
    ///
    /// Does not wait for the core thread to apply the frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoreThreadStopped`](duplex_core::SyncError::CoreThreadStopped)
    /// if the core thread is gone.
    pub fn run_frame<F>(&mut self, update: F) -> SyncResult<FrameStats>
    where
        F: FnOnce(&FrameContext<'_>),
    {
        let frame_start = Instant::now();
        let delta_time = frame_start
            .duration_since(self.last_frame_time)
            .as_secs_f32()
            .min(0.1);
        self.last_frame_time = frame_start;

        let ctx = FrameContext {
            manager: &self.manager,
            frame: self.frame_count,
            delta_time,
        };
        update(&ctx);
        let update_done = Instant::now();

        let sync = self.manager.sync_to_core(&self.core_thread)?;
        self.manager.end_frame();
        let frame_end = Instant::now();

        let stats = FrameStats {
            frame: self.frame_count,
            total_us: micros(frame_end - frame_start),
            update_us: micros(update_done - frame_start),
            sync_us: micros(frame_end - update_done),
            sync,
        };
        self.end_frame(stats);
        Ok(stats)
    }

    /// Blocks until the core thread has applied every frame run so far.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoreThreadStopped`](duplex_core::SyncError::CoreThreadStopped)
    /// if the core thread is gone.
    pub fn finish(&self) -> SyncResult<()> {
        self.core_thread.flush()
    }

    fn end_frame(&mut self, stats: FrameStats) {
        self.frame_count += 1;
        self.stats_accumulator.record(&stats);

        if self.config.enable_timing_logs && stats.total_us > micros(TARGET_FRAME_TIME) {
            tracing::warn!(
                frame = stats.frame,
                total_us = stats.total_us,
                target_us = micros(TARGET_FRAME_TIME),
                "frame exceeded budget"
            );
        }
        tracing::trace!(
            frame = stats.frame,
            objects = stats.sync.objects_synced,
            bytes = stats.sync.bytes,
            "frame done"
        );
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Accumulator for frame statistics.
#[derive(Clone, Debug)]
pub struct FrameStatsAccumulator {
    /// Total frames recorded.
    pub frames_recorded: u64,
    /// Sum of total frame times.
    pub total_us_sum: u64,
    /// Sum of sync times.
    pub sync_us_sum: u64,
    /// Min frame time.
    pub min_frame_us: u64,
    /// Max frame time.
    pub max_frame_us: u64,
    /// Frames that exceeded budget.
    pub frames_over_budget: u64,
    /// Deltas sent.
    pub objects_synced: u64,
    /// Payload bytes sent.
    pub bytes_synced: u64,
}

impl FrameStatsAccumulator {
    /// Creates a new accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames_recorded: 0,
            total_us_sum: 0,
            sync_us_sum: 0,
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            frames_over_budget: 0,
            objects_synced: 0,
            bytes_synced: 0,
        }
    }

    /// Records a frame's statistics.
    pub fn record(&mut self, stats: &FrameStats) {
        self.frames_recorded += 1;
        self.total_us_sum += stats.total_us;
        self.sync_us_sum += stats.sync_us;
        self.min_frame_us = self.min_frame_us.min(stats.total_us);
        self.max_frame_us = self.max_frame_us.max(stats.total_us);
        self.objects_synced += stats.sync.objects_synced as u64;
        self.bytes_synced += stats.sync.bytes as u64;

        if stats.total_us > micros(TARGET_FRAME_TIME) {
            self.frames_over_budget += 1;
        }
    }

    /// Returns average frame time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_frame_ms(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        (self.total_us_sum as f64 / self.frames_recorded as f64) / 1000.0
    }

    /// Returns average sync time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_sync_ms(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        (self.sync_us_sum as f64 / self.frames_recorded as f64) / 1000.0
    }

    /// Logs a summary at info level.
    pub fn log_summary(&self) {
        tracing::info!(
            frames = self.frames_recorded,
            avg_frame_ms = self.avg_frame_ms(),
            avg_sync_ms = self.avg_sync_ms(),
            max_frame_us = self.max_frame_us,
            over_budget = self.frames_over_budget,
            objects = self.objects_synced,
            bytes = self.bytes_synced,
            "frame statistics"
        );
    }
}

impl Default for FrameStatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
