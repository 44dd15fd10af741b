use crate::telemetry::CycleSnapshot;

/// Best-effort outlet for the telemetry of each cycle. Implementations log
/// their own failures, the control loop never waits on them.
pub trait MetricCollector {
    fn publish(&mut self, snapshot: &CycleSnapshot);
}
