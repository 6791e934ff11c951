//! Modbus RTU transport over a half-duplex RS485 line.
//!
//! Every register read runs inside a direction guard: the driver is switched
//! to transmit and allowed to settle, the Modbus transaction runs under a
//! response timeout, the line settles again and the driver is released back
//! to receive. The release also happens when the read future is dropped
//! mid-transaction.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tokio_serial::{SerialPort, SerialStream};
use tracing::{debug, warn};

use crate::config::{ConfigError, DirectionConfig, ModbusConfig};

/// Supported read function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCode {
    /// 0x03
    ReadHolding,
    /// 0x04
    ReadInput,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadHolding => 0x03,
            FunctionCode::ReadInput => 0x04,
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x03 => Ok(FunctionCode::ReadHolding),
            0x04 => Ok(FunctionCode::ReadInput),
            other => Err(other),
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionCode::ReadHolding => write!(f, "0x03 (read holding registers)"),
            FunctionCode::ReadInput => write!(f, "0x04 (read input registers)"),
        }
    }
}

/// A failed register read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Device exception: {0}")]
    Exception(String),

    #[error("No response within {0} ms")]
    Timeout(u64),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Direction control failed: {0}")]
    Direction(String),
}

/// Errors raised while opening the serial line.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open serial port {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("Failed to release RS485 line on {port}: {source}")]
    Release {
        port: String,
        #[source]
        source: TransactionError,
    },
}

/// Driver state of the RS485 transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    Transmit,
    Receive,
}

/// Switches the transceiver between transmit and receive.
pub trait DirectionControl {
    fn set(&mut self, direction: LineDirection) -> Result<(), TransactionError>;
}

/// Direction is switched by the adapter or the kernel's RS485 mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDirection;

impl DirectionControl for AutoDirection {
    fn set(&mut self, _direction: LineDirection) -> Result<(), TransactionError> {
        Ok(())
    }
}

/// Direction is driven through the serial port's RTS line.
///
/// The driver stays enabled for the whole transaction, so this suits
/// transceivers whose receiver is not gated by the same signal.
pub struct RtsDirection {
    port: Box<dyn SerialPort>,
    invert: bool,
}

impl RtsDirection {
    pub fn new(port: Box<dyn SerialPort>, invert: bool) -> Self {
        Self { port, invert }
    }

    fn level(&self, direction: LineDirection) -> bool {
        (direction == LineDirection::Transmit) != self.invert
    }
}

impl fmt::Debug for RtsDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtsDirection")
            .field("port", &self.port.name())
            .field("invert", &self.invert)
            .finish()
    }
}

impl DirectionControl for RtsDirection {
    fn set(&mut self, direction: LineDirection) -> Result<(), TransactionError> {
        let level = self.level(direction);
        self.port
            .write_request_to_send(level)
            .map_err(|e| TransactionError::Direction(e.to_string()))
    }
}

/// Direction backend selected by configuration.
#[derive(Debug)]
pub enum SerialDirection {
    Auto(AutoDirection),
    Rts(RtsDirection),
}

impl DirectionControl for SerialDirection {
    fn set(&mut self, direction: LineDirection) -> Result<(), TransactionError> {
        match self {
            SerialDirection::Auto(d) => d.set(direction),
            SerialDirection::Rts(d) => d.set(direction),
        }
    }
}

/// A Modbus master able to read one 16-bit register.
#[allow(async_fn_in_trait)]
pub trait ModbusBus {
    async fn read(
        &mut self,
        address: u16,
        function: FunctionCode,
    ) -> Result<u16, TransactionError>;
}

impl ModbusBus for Context {
    async fn read(
        &mut self,
        address: u16,
        function: FunctionCode,
    ) -> Result<u16, TransactionError> {
        let response = match function {
            FunctionCode::ReadInput => self.read_input_registers(address, 1).await,
            FunctionCode::ReadHolding => self.read_holding_registers(address, 1).await,
        };

        let words = response
            .map_err(|e| TransactionError::Io(e.to_string()))?
            .map_err(|e| TransactionError::Exception(format!("{:?}", e)))?;

        words.first().copied().ok_or(TransactionError::EmptyResponse)
    }
}

/// Reads single registers from the inverter.
#[allow(async_fn_in_trait)]
pub trait RegisterTransport {
    async fn read_register(
        &mut self,
        address: u16,
        function: FunctionCode,
    ) -> Result<u16, TransactionError>;
}

/// Holds the line in transmit until released or dropped.
struct LineGuard<'a, D: DirectionControl> {
    direction: &'a mut D,
    released: bool,
}

impl<'a, D: DirectionControl> LineGuard<'a, D> {
    fn assert(direction: &'a mut D) -> Result<Self, TransactionError> {
        direction.set(LineDirection::Transmit)?;
        Ok(Self {
            direction,
            released: false,
        })
    }

    fn release(mut self) -> Result<(), TransactionError> {
        self.released = true;
        self.direction.set(LineDirection::Receive)
    }
}

impl<D: DirectionControl> Drop for LineGuard<'_, D> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.direction.set(LineDirection::Receive) {
                warn!(error = %e, "Failed to release RS485 line");
            }
        }
    }
}

/// Modbus transport with RS485 direction handling.
#[derive(Debug)]
pub struct Rs485Transport<B, D> {
    bus: B,
    direction: D,
    settle: Duration,
    timeout: Duration,
}

impl<B: ModbusBus, D: DirectionControl> Rs485Transport<B, D> {
    pub fn new(bus: B, direction: D, settle: Duration, timeout: Duration) -> Self {
        Self {
            bus,
            direction,
            settle,
            timeout,
        }
    }
}

impl<B: ModbusBus, D: DirectionControl> RegisterTransport for Rs485Transport<B, D> {
    async fn read_register(
        &mut self,
        address: u16,
        function: FunctionCode,
    ) -> Result<u16, TransactionError> {
        let Self {
            bus,
            direction,
            settle,
            timeout,
        } = self;

        let line = LineGuard::assert(direction)?;
        tokio::time::sleep(*settle).await;

        let result = match tokio::time::timeout(*timeout, bus.read(address, function)).await {
            Ok(result) => result,
            Err(_) => Err(TransactionError::Timeout(timeout.as_millis() as u64)),
        };

        tokio::time::sleep(*settle).await;
        let released = line.release();

        let value = result?;
        released?;
        debug!(address, function = %function, value, "Register read");
        Ok(value)
    }
}

/// Put the transceiver in receive mode before the first transaction.
fn release_line<D: DirectionControl>(direction: &mut D, port: &str) -> Result<(), OpenError> {
    direction
        .set(LineDirection::Receive)
        .map_err(|source| OpenError::Release {
            port: port.to_string(),
            source,
        })
}

/// Open the serial port and attach a Modbus RTU client to it.
pub fn open_rtu(
    config: &ModbusConfig,
) -> Result<Rs485Transport<Context, SerialDirection>, OpenError> {
    let builder = tokio_serial::new(&config.port, config.baud_rate)
        .parity(config.parity()?)
        .stop_bits(config.stop_bits()?)
        .data_bits(config.data_bits()?);

    let serial = SerialStream::open(&builder).map_err(|source| OpenError::Serial {
        port: config.port.clone(),
        source,
    })?;

    let mut direction = match config.direction {
        DirectionConfig::Auto => SerialDirection::Auto(AutoDirection),
        DirectionConfig::Rts { invert } => {
            let control = serial.try_clone().map_err(|source| OpenError::Serial {
                port: config.port.clone(),
                source,
            })?;
            SerialDirection::Rts(RtsDirection::new(control, invert))
        }
    };

    release_line(&mut direction, &config.port)?;

    let ctx = rtu::attach_slave(serial, Slave(config.unit_id));

    debug!(
        port = %config.port,
        baud_rate = config.baud_rate,
        unit_id = config.unit_id,
        direction = ?config.direction,
        "Opened Modbus RTU line"
    );

    Ok(Rs485Transport::new(
        ctx,
        direction,
        Duration::from_millis(config.settle_ms),
        Duration::from_millis(config.timeout_ms),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Direction(LineDirection, Instant),
        Read(u16, Instant),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct RecordingDirection {
        log: Log,
    }

    impl DirectionControl for RecordingDirection {
        fn set(&mut self, direction: LineDirection) -> Result<(), TransactionError> {
            self.log
                .borrow_mut()
                .push(Event::Direction(direction, Instant::now()));
            Ok(())
        }
    }

    enum Reply {
        Value(u16),
        Fail,
        Hang,
    }

    struct ScriptedBus {
        log: Log,
        reply: Reply,
    }

    impl ModbusBus for ScriptedBus {
        async fn read(
            &mut self,
            address: u16,
            _function: FunctionCode,
        ) -> Result<u16, TransactionError> {
            self.log.borrow_mut().push(Event::Read(address, Instant::now()));
            match self.reply {
                Reply::Value(v) => Ok(v),
                Reply::Fail => Err(TransactionError::Exception("IllegalDataAddress".into())),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    fn transport(reply: Reply) -> (Rs485Transport<ScriptedBus, RecordingDirection>, Log) {
        let log: Log = Rc::default();
        let transport = Rs485Transport::new(
            ScriptedBus {
                log: log.clone(),
                reply,
            },
            RecordingDirection { log: log.clone() },
            Duration::from_millis(15),
            Duration::from_millis(1000),
        );
        (transport, log)
    }

    fn directions(log: &Log) -> Vec<LineDirection> {
        log.borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Direction(d, _) => Some(*d),
                Event::Read(..) => None,
            })
            .collect()
    }

    #[test]
    fn test_function_codes() {
        assert_eq!(FunctionCode::try_from(4), Ok(FunctionCode::ReadInput));
        assert_eq!(FunctionCode::try_from(3), Ok(FunctionCode::ReadHolding));
        assert_eq!(FunctionCode::try_from(6), Err(6));
        assert_eq!(FunctionCode::ReadInput.code(), 0x04);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_wraps_successful_read() {
        let (mut transport, log) = transport(Reply::Value(2453));
        let start = Instant::now();

        let value = transport
            .read_register(3041, FunctionCode::ReadInput)
            .await
            .unwrap();

        assert_eq!(value, 2453);
        let events = log.borrow().clone();
        assert_eq!(events.len(), 3);
        match (&events[0], &events[1], &events[2]) {
            (
                Event::Direction(LineDirection::Transmit, t0),
                Event::Read(3041, t1),
                Event::Direction(LineDirection::Receive, t2),
            ) => {
                assert_eq!(*t0, start);
                assert_eq!(*t1 - *t0, Duration::from_millis(15));
                assert_eq!(*t2 - *t1, Duration::from_millis(15));
            }
            other => panic!("unexpected sequence: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_wraps_failed_read() {
        let (mut transport, log) = transport(Reply::Fail);

        let err = transport
            .read_register(3004, FunctionCode::ReadInput)
            .await
            .unwrap_err();

        assert!(matches!(err, TransactionError::Exception(_)));
        assert_eq!(
            directions(&log),
            vec![LineDirection::Transmit, LineDirection::Receive]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_line() {
        let (mut transport, log) = transport(Reply::Hang);
        let start = Instant::now();

        let err = transport
            .read_register(3004, FunctionCode::ReadInput)
            .await
            .unwrap_err();

        assert_eq!(err, TransactionError::Timeout(1000));
        assert_eq!(start.elapsed(), Duration::from_millis(1030));
        assert_eq!(
            directions(&log),
            vec![LineDirection::Transmit, LineDirection::Receive]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_read_releases_line() {
        let (mut transport, log) = transport(Reply::Hang);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            transport.read_register(3004, FunctionCode::ReadInput),
        )
        .await;

        assert!(cancelled.is_err());
        assert_eq!(
            directions(&log),
            vec![LineDirection::Transmit, LineDirection::Receive]
        );
    }

    #[test]
    fn test_auto_direction_is_noop() {
        let mut direction = SerialDirection::Auto(AutoDirection);
        assert!(direction.set(LineDirection::Transmit).is_ok());
        assert!(direction.set(LineDirection::Receive).is_ok());
    }

    struct StuckDirection;

    impl DirectionControl for StuckDirection {
        fn set(&mut self, _direction: LineDirection) -> Result<(), TransactionError> {
            Err(TransactionError::Direction("RTS ioctl failed".to_string()))
        }
    }

    #[test]
    fn test_release_failure_at_open_is_reported() {
        let err = release_line(&mut StuckDirection, "/dev/ttyUSB0").unwrap_err();
        assert!(matches!(
            err,
            OpenError::Release {
                ref port,
                source: TransactionError::Direction(_),
            } if port == "/dev/ttyUSB0"
        ));
        assert!(err.to_string().contains("/dev/ttyUSB0"));

        let log: Log = Rc::default();
        release_line(&mut RecordingDirection { log: log.clone() }, "/dev/ttyUSB0").unwrap();
        assert_eq!(directions(&log), vec![LineDirection::Receive]);
    }
}
