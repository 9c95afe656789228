//! One request/response pair on the serial line.
//!
//! The engine talks to the bus through [`Transport`], so tests can swap the
//! serial port for a simulated one. [`RtuTransport`] is the real line:
//! tokio-modbus RTU framing over a tokio-serial port, 8N1.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info};

use crate::config::SerialConfig;
use crate::types::{FunctionCode, RegisterKind};

/// Failure of a single transaction.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The device did not answer within the per-call timeout.
    #[error("no response")]
    NoResponse,

    /// The device answered with an exception, a garbled frame or words that
    /// do not decode.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Exclusive access to a Modbus line. Every call is exactly one request and
/// its response.
pub trait Transport: Send {
    /// Read `count` coils or discrete inputs.
    fn read_bits(
        &mut self,
        slave: u8,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> impl Future<Output = TransportResult<Vec<bool>>> + Send;

    /// Read `count` holding or input registers.
    fn read_words(
        &mut self,
        slave: u8,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> impl Future<Output = TransportResult<Vec<u16>>> + Send;

    /// Write Single Coil (0x05).
    fn write_coil(
        &mut self,
        slave: u8,
        address: u16,
        value: bool,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    /// Write Single Register (0x06).
    fn write_register(
        &mut self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    /// Write Multiple Registers (0x10).
    fn write_registers(
        &mut self,
        slave: u8,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = TransportResult<()>> + Send;
}

/// Modbus RTU over a serial port.
pub struct RtuTransport {
    ctx: Context,
    timeout: Duration,
}

impl RtuTransport {
    /// Open the serial port: configured baud rate, 8 data bits, no parity,
    /// one stop bit.
    pub fn open(config: &SerialConfig) -> std::io::Result<Self> {
        let builder = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One);

        let serial = tokio_serial::SerialStream::open(&builder)?;
        info!(
            port = %config.port,
            baud_rate = config.baud_rate,
            "Serial line opened"
        );

        // The slave address is set per transaction.
        let ctx = rtu::attach_slave(serial, Slave::broadcast());
        Ok(Self {
            ctx,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }
}

impl Transport for RtuTransport {
    async fn read_bits(
        &mut self,
        slave: u8,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<bool>> {
        self.ctx.set_slave(Slave(slave));
        let function = kind.read_function();
        let mut bits = match kind {
            RegisterKind::Coil => {
                let op = self.ctx.read_coils(address, count);
                let result = timeout(self.timeout, op).await;
                Self::flatten(function, result)?
            }
            RegisterKind::Discrete => {
                let op = self.ctx.read_discrete_inputs(address, count);
                let result = timeout(self.timeout, op).await;
                Self::flatten(function, result)?
            }
            RegisterKind::Holding | RegisterKind::Input => {
                return Err(TransportError::Protocol(format!(
                    "{kind} registers are not bit-addressed"
                )));
            }
        };
        // Coil responses are padded to whole bytes.
        bits.truncate(usize::from(count));
        Ok(bits)
    }

    async fn read_words(
        &mut self,
        slave: u8,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>> {
        self.ctx.set_slave(Slave(slave));
        let function = kind.read_function();
        match kind {
            RegisterKind::Holding => {
                let op = self.ctx.read_holding_registers(address, count);
                let result = timeout(self.timeout, op).await;
                Self::flatten(function, result)
            }
            RegisterKind::Input => {
                let op = self.ctx.read_input_registers(address, count);
                let result = timeout(self.timeout, op).await;
                Self::flatten(function, result)
            }
            RegisterKind::Coil | RegisterKind::Discrete => Err(TransportError::Protocol(format!(
                "{kind} registers are not word-addressed"
            ))),
        }
    }

    async fn write_coil(&mut self, slave: u8, address: u16, value: bool) -> TransportResult<()> {
        self.ctx.set_slave(Slave(slave));
        let op = self.ctx.write_single_coil(address, value);
        let result = timeout(self.timeout, op).await;
        Self::flatten(FunctionCode::WriteSingleCoil, result)
    }

    async fn write_register(&mut self, slave: u8, address: u16, value: u16) -> TransportResult<()> {
        self.ctx.set_slave(Slave(slave));
        let op = self.ctx.write_single_register(address, value);
        let result = timeout(self.timeout, op).await;
        Self::flatten(FunctionCode::WriteSingleRegister, result)
    }

    async fn write_registers(
        &mut self,
        slave: u8,
        address: u16,
        values: &[u16],
    ) -> TransportResult<()> {
        self.ctx.set_slave(Slave(slave));
        let op = self.ctx.write_multiple_registers(address, values);
        let result = timeout(self.timeout, op).await;
        Self::flatten(FunctionCode::WriteMultipleRegisters, result)
    }
}

impl RtuTransport {
    /// Fold the timeout, transport and exception layers of a call into one
    /// result.
    fn flatten<T>(
        function: FunctionCode,
        result: Result<
            Result<Result<T, ExceptionCode>, tokio_modbus::Error>,
            tokio::time::error::Elapsed,
        >,
    ) -> TransportResult<T> {
        match result {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(code))) => Err(TransportError::Protocol(format!(
                "exception {:?} on function 0x{:02x}",
                code,
                function.code()
            ))),
            Ok(Err(e)) => {
                debug!(function = function.code(), error = %e, "Transport error");
                Err(TransportError::Protocol(e.to_string()))
            }
            Err(_elapsed) => Err(TransportError::NoResponse),
        }
    }
}
