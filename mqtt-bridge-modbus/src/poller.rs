//! Inverter register polling.

use std::time::Duration;

use solarsight_common::{CycleStatus, Reading};
use tracing::{debug, error, info};

use crate::config::{ReadErrorPolicy, SensorDescriptor};
use crate::transport::{RegisterTransport, TransactionError};

/// A sensor whose read failed.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFailure {
    pub sensor: String,
    pub address: u16,
    pub error: TransactionError,
}

/// Outcome of one pass over the sensor table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    /// Successful readings, in table order.
    pub readings: Vec<Reading>,
    /// Failed reads, in table order.
    pub failures: Vec<SensorFailure>,
    /// Sensors not attempted because the cycle was aborted.
    pub skipped: usize,
}

impl PollReport {
    /// `err` if any read failed this cycle, `ok` otherwise.
    pub fn status(&self) -> CycleStatus {
        CycleStatus::from_failed(!self.failures.is_empty())
    }
}

/// Reads every sensor of the table, one register per transaction.
#[derive(Debug, Clone)]
pub struct RegisterPoller {
    sensors: Vec<SensorDescriptor>,
    inter_read_delay: Duration,
    policy: ReadErrorPolicy,
}

impl RegisterPoller {
    pub fn new(
        sensors: Vec<SensorDescriptor>,
        inter_read_delay: Duration,
        policy: ReadErrorPolicy,
    ) -> Self {
        Self {
            sensors,
            inter_read_delay,
            policy,
        }
    }

    pub fn sensors(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    /// Perform a single poll cycle.
    ///
    /// Successive reads are separated by the inter-read delay whatever the
    /// previous outcome. With [`ReadErrorPolicy::Abort`] the first failure
    /// ends the cycle.
    pub async fn poll<T: RegisterTransport>(&self, transport: &mut T) -> PollReport {
        let mut report = PollReport::default();

        for (index, sensor) in self.sensors.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.inter_read_delay).await;
            }

            match transport.read_register(sensor.address, sensor.function).await {
                Ok(raw) => {
                    let reading = Reading::new(
                        &sensor.name,
                        &sensor.topic,
                        raw,
                        sensor.scale,
                        &sensor.unit,
                    );
                    info!("{}", reading);
                    report.readings.push(reading);
                }
                Err(e) => {
                    error!(
                        sensor = %sensor.name,
                        address = sensor.address,
                        function = %sensor.function,
                        error = %e,
                        "Failed to read sensor"
                    );
                    report.failures.push(SensorFailure {
                        sensor: sensor.name.clone(),
                        address: sensor.address,
                        error: e,
                    });

                    if self.policy == ReadErrorPolicy::Abort {
                        report.skipped = self.sensors.len() - index - 1;
                        break;
                    }
                }
            }
        }

        debug!(
            read = report.readings.len(),
            failed = report.failures.len(),
            skipped = report.skipped,
            "Poll cycle finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FunctionCode;
    use std::collections::HashMap;
    use tokio::time::Instant;

    /// Transport answering from a register map; unknown addresses fail.
    struct MapTransport {
        registers: HashMap<u16, u16>,
        reads: Vec<(u16, Instant)>,
    }

    impl MapTransport {
        fn new(registers: &[(u16, u16)]) -> Self {
            Self {
                registers: registers.iter().copied().collect(),
                reads: Vec::new(),
            }
        }
    }

    impl RegisterTransport for MapTransport {
        async fn read_register(
            &mut self,
            address: u16,
            _function: FunctionCode,
        ) -> Result<u16, TransactionError> {
            self.reads.push((address, Instant::now()));
            self.registers
                .get(&address)
                .copied()
                .ok_or(TransactionError::Timeout(1000))
        }
    }

    fn sensor(name: &str, address: u16, scale: f64, unit: &str) -> SensorDescriptor {
        SensorDescriptor {
            name: name.to_string(),
            topic: format!("inverter/{}", name),
            address,
            function: FunctionCode::ReadInput,
            scale,
            unit: unit.to_string(),
        }
    }

    fn table() -> Vec<SensorDescriptor> {
        vec![
            sensor("active_power", 3004, 1.0, "W"),
            sensor("inverter_temp", 3041, 0.1, "°C"),
            sensor("v_ac", 3035, 0.1, "V"),
            sensor("grid_frequency", 3042, 0.01, "Hz"),
        ]
    }

    fn poller(policy: ReadErrorPolicy) -> RegisterPoller {
        RegisterPoller::new(table(), Duration::from_millis(100), policy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_sensors_ok() {
        let mut transport =
            MapTransport::new(&[(3004, 1520), (3041, 2453), (3035, 2301), (3042, 5003)]);

        let report = poller(ReadErrorPolicy::Abort).poll(&mut transport).await;

        assert_eq!(report.status(), CycleStatus::Ok);
        assert_eq!(report.skipped, 0);
        let payloads: Vec<_> = report
            .readings
            .iter()
            .map(|r| (r.topic.as_str(), r.payload()))
            .collect();
        assert_eq!(
            payloads,
            vec![
                ("inverter/active_power", "1520.00".to_string()),
                ("inverter/inverter_temp", "245.30".to_string()),
                ("inverter/v_ac", "230.10".to_string()),
                ("inverter/grid_frequency", "50.03".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_aborts_remaining_sensors() {
        // v_ac (third sensor) is missing
        let mut transport = MapTransport::new(&[(3004, 1520), (3041, 2453), (3042, 5003)]);

        let report = poller(ReadErrorPolicy::Abort).poll(&mut transport).await;

        assert_eq!(report.status(), CycleStatus::Err);
        assert_eq!(report.readings.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].sensor, "v_ac");
        assert_eq!(report.failures[0].address, 3035);
        assert_eq!(report.skipped, 1);

        let addresses: Vec<_> = transport.reads.iter().map(|(a, _)| *a).collect();
        assert_eq!(addresses, vec![3004, 3041, 3035]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sensor_failure_publishes_nothing() {
        let mut transport = MapTransport::new(&[(3041, 2453)]);

        let report = poller(ReadErrorPolicy::Abort).poll(&mut transport).await;

        assert!(report.readings.is_empty());
        assert_eq!(report.skipped, 3);
        assert_eq!(transport.reads.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_policy_reads_everything() {
        let mut transport = MapTransport::new(&[(3004, 1520), (3041, 2453), (3042, 5003)]);

        let report = poller(ReadErrorPolicy::Continue).poll(&mut transport).await;

        assert_eq!(report.status(), CycleStatus::Err);
        assert_eq!(report.readings.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.readings[2].sensor, "grid_frequency");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_are_spaced_by_delay() {
        let mut transport =
            MapTransport::new(&[(3004, 1520), (3041, 2453), (3035, 2301), (3042, 5003)]);
        let start = Instant::now();

        poller(ReadErrorPolicy::Abort).poll(&mut transport).await;

        let offsets: Vec<_> = transport
            .reads
            .iter()
            .map(|(_, at)| *at - start)
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_value_is_unsigned() {
        let mut transport = MapTransport::new(&[(3004, 0xFFFF)]);
        let poller = RegisterPoller::new(
            vec![sensor("active_power", 3004, 1.0, "W")],
            Duration::from_millis(100),
            ReadErrorPolicy::Abort,
        );

        let report = poller.poll(&mut transport).await;
        assert_eq!(report.readings[0].payload(), "65535.00");
    }
}
