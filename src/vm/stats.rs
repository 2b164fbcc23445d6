use std::time::Duration;

/// Wall-clock time spent in each phase since the last reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub compile: Duration,
    pub update: Duration,
    pub triggers: Duration,
    pub execution: Duration,
}

impl ExecutionStats {
    pub fn reset(&mut self) {
        *self = ExecutionStats::default();
    }

    pub fn report(&self) -> String {
        format!(
            "Total compile time: {:.3}ms\n\
             Total update time: {:.3}ms\n\
             Total triggers time: {:.3}ms\n\
             Total execution time: {:.3}ms",
            millis(self.compile),
            millis(self.update),
            millis(self.triggers),
            millis(self.execution),
        )
    }

    /// Render the report and zero every counter.
    pub fn take_report(&mut self) -> String {
        let report = self.report();
        self.reset();
        report
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_report_resets_counters() {
        let mut stats = ExecutionStats {
            compile: Duration::from_millis(2),
            execution: Duration::from_micros(1500),
            ..ExecutionStats::default()
        };
        let report = stats.take_report();
        assert!(report.contains("Total compile time: 2.000ms"));
        assert!(report.contains("Total execution time: 1.500ms"));
        assert_eq!(report.lines().count(), 4);
        assert_eq!(stats, ExecutionStats::default());
    }
}
