//! The Monitoring task: samples system health and reports it periodically.

use estop_time::Monotonic;

use crate::board::Board;
use crate::system::System;
use crate::task::TaskId;

const ME: TaskId = TaskId::Monitor;

/// One reporting-period snapshot of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct HealthSample {
    /// Monitor loops since startup.
    pub loop_count: u32,
    /// Free memory at the time of the sample.
    pub free_memory_bytes: u32,
    /// Error counter at the time of the sample.
    pub error_count: u32,
    /// Emergency state at the time of the sample.
    pub emergency_active: bool,
}

/// Flags a possible leak when free memory went down between two consecutive samples.
#[derive(Debug, Default)]
pub struct LeakDetector {
    previous: Option<HealthSample>,
}

impl LeakDetector {
    /// No sample seen yet.
    pub const fn new() -> Self {
        Self { previous: None }
    }

    /// Record `sample`; true iff its free memory is strictly below the previous sample's.
    pub fn observe(&mut self, sample: HealthSample) -> bool {
        let leak = matches!(self.previous, Some(p) if sample.free_memory_bytes < p.free_memory_bytes);
        self.previous = Some(sample);
        leak
    }

    /// The sample kept for the next comparison.
    pub fn previous(&self) -> Option<HealthSample> {
        self.previous
    }
}

/// Counts monitor loops and says when a report is due.
///
/// The loop count wraps at `u32::MAX`; the report cadence runs on its own countdown and is not
/// disturbed by the wrap.
#[derive(Debug)]
pub struct ReportSchedule {
    loop_count: u32,
    until_report: u32,
    every: u32,
}

impl ReportSchedule {
    /// Report every `every` loops (at least every loop).
    pub const fn new(every: u32) -> Self {
        let every = if every == 0 { 1 } else { every };
        Self {
            loop_count: 0,
            until_report: every,
            every,
        }
    }

    /// Count one loop; returns the new loop count and whether this loop reports.
    pub fn next_loop(&mut self) -> (u32, bool) {
        self.loop_count = self.loop_count.wrapping_add(1);
        self.until_report -= 1;

        let report = self.until_report == 0;
        if report {
            self.until_report = self.every;
        }
        (self.loop_count, report)
    }
}

/// Entry point of the health monitor. Never returns.
pub async fn run<M: Monotonic, B: Board>(sys: System<'_, M, B>) {
    let ctx = sys.ctx();
    let timing = *sys.timing();

    sys.output(ME)
        .await
        .line(format_args!("MONITOR: Task started - Monitoring priority"));

    let mut schedule = ReportSchedule::new(timing.report_every);
    let mut leaks = LeakDetector::new();

    loop {
        let (loop_count, report) = schedule.next_loop();

        let free = sys.board().free_memory_bytes();
        ctx.record_free_memory(free);

        if report {
            let sample = HealthSample {
                loop_count,
                free_memory_bytes: free,
                error_count: ctx.error_count(),
                emergency_active: ctx.emergency_active(),
            };
            let leak = leaks.observe(sample);

            let out = sys.output(ME).await;
            out.line(format_args!("MONITOR: === System Status Report ==="));
            out.line(format_args!("MONITOR: Loop count: {}", sample.loop_count));
            out.line(format_args!(
                "MONITOR: Free memory: {} bytes",
                sample.free_memory_bytes
            ));
            out.line(format_args!("MONITOR: System errors: {}", sample.error_count));
            out.line(format_args!("MONITOR: CPU usage: {}%", ctx.cpu_usage_percent()));
            out.line(format_args!(
                "MONITOR: Emergency active: {}",
                if sample.emergency_active { "YES" } else { "NO" }
            ));
            if leak {
                out.line(format_args!("MONITOR: WARNING - Possible memory leak detected!"));
            }
        }

        sys.mono().delay(timing.monitor_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(free: u32) -> HealthSample {
        HealthSample {
            loop_count: 50,
            free_memory_bytes: free,
            error_count: 0,
            emergency_active: false,
        }
    }

    #[test]
    fn reports_every_nth_loop() {
        let mut schedule = ReportSchedule::new(3);
        let reports = [(); 7].map(|()| schedule.next_loop());

        assert_eq!(
            reports,
            [
                (1, false),
                (2, false),
                (3, true),
                (4, false),
                (5, false),
                (6, true),
                (7, false),
            ]
        );
    }

    #[test]
    fn loop_count_wrap_does_not_report_early() {
        let mut schedule = ReportSchedule::new(50);
        for _ in 0..49 {
            schedule.next_loop();
        }
        schedule.loop_count = u32::MAX - 1;

        assert_eq!(schedule.next_loop(), (u32::MAX, true));
        // Wraps to 0 one loop after a report: not a report on its own.
        assert_eq!(schedule.next_loop(), (0, false));
        assert_eq!(schedule.next_loop(), (1, false));
    }

    #[test]
    fn zero_cadence_reports_every_loop() {
        let mut schedule = ReportSchedule::new(0);
        assert_eq!(schedule.next_loop(), (1, true));
        assert_eq!(schedule.next_loop(), (2, true));
    }

    #[test]
    fn first_sample_never_warns() {
        let mut leaks = LeakDetector::new();
        assert!(!leaks.observe(sample(0)));
        assert_eq!(leaks.previous(), Some(sample(0)));
    }

    #[test]
    fn warns_only_on_strict_decrease() {
        let mut leaks = LeakDetector::new();

        leaks.observe(sample(4_096));
        assert!(!leaks.observe(sample(4_096)));
        assert!(!leaks.observe(sample(8_192)));
        assert!(leaks.observe(sample(8_191)));
        // Compared against the latest sample only.
        assert!(!leaks.observe(sample(8_191)));
    }
}
