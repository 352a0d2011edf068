//! Query orchestration
//!
//! [`UfsQuery`] runs one request through build, submit and parse. Each call
//! is a single attempt: the first failure ends the call and is returned
//! unchanged. Retry policy belongs to the caller.

use crate::config::QueryConfig;
use crate::desc::{self, decode_string_descriptor, DescriptorBuffer, DescriptorKind};
use crate::error::{UfsError, UfsResult};
use crate::idn::{AttributeIdn, FlagIdn};
use crate::transport::UfsTransport;
use crate::upiu::{QueryRequest, QueryResponse, QueryValue, UpiuCodec};
use log::{Level, Log, Metadata, Record};
use std::fmt;
use std::sync::Arc;

/// Per-call state: Build -> Submit -> Parse -> Done | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStage {
    /// No call made yet
    #[default]
    Idle,
    Build,
    Submit,
    Parse,
    Done,
    Failed,
}

/// Forwards to whatever logger is installed in the `log` facade
pub struct GlobalLogger;

impl Log for GlobalLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record)
    }

    fn flush(&self) {
        log::logger().flush()
    }
}

/// Discards everything
pub struct NopLogger;

impl Log for NopLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        false
    }

    fn log(&self, _record: &Record) {}

    fn flush(&self) {}
}

/// Query orchestrator over a transport
pub struct UfsQuery<T: UfsTransport> {
    transport: T,
    codec: UpiuCodec,
    logger: Arc<dyn Log>,
    stage: QueryStage,
    failed_in: Option<QueryStage>,
}

impl<T: UfsTransport> UfsQuery<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, &QueryConfig::default())
    }

    pub fn with_config(transport: T, config: &QueryConfig) -> Self {
        UfsQuery {
            transport,
            codec: UpiuCodec::new(config.reserved_policy),
            logger: Arc::new(GlobalLogger),
            stage: QueryStage::Idle,
            failed_in: None,
        }
    }

    /// Replace the logger (e.g. with [`NopLogger`])
    pub fn with_logger(mut self, logger: Arc<dyn Log>) -> Self {
        self.logger = logger;
        self
    }

    /// Terminal stage of the most recent call
    pub fn stage(&self) -> QueryStage {
        self.stage
    }

    /// Stage in which the most recent call failed, if it did
    pub fn failed_in(&self) -> Option<QueryStage> {
        self.failed_in
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn emit(&self, level: Level, args: fmt::Arguments) {
        let record = Record::builder()
            .level(level)
            .target(module_path!())
            .module_path_static(Some(module_path!()))
            .file_static(Some(file!()))
            .args(args)
            .build();
        if self.logger.enabled(record.metadata()) {
            self.logger.log(&record);
        }
    }

    fn enter(&mut self, stage: QueryStage) {
        self.emit(Level::Trace, format_args!("{:?} -> {:?}", self.stage, stage));
        self.stage = stage;
    }

    fn step<V>(&mut self, result: UfsResult<V>) -> UfsResult<V> {
        if let Err(e) = &result {
            self.emit(Level::Debug, format_args!("Query failed in {:?}: {}", self.stage, e));
            self.failed_in = Some(self.stage);
            self.stage = QueryStage::Failed;
        }
        result
    }

    /// Run one Query Request/Response exchange
    pub fn execute(&mut self, req: &QueryRequest) -> UfsResult<QueryResponse> {
        self.failed_in = None;
        self.emit(
            Level::Debug,
            format_args!(
                "{} {} 0x{:02x} ({}) index {} selector {}",
                req.opcode.name(),
                req.idn.category(),
                req.idn.code(),
                req.idn.name(),
                req.index,
                req.selector
            ),
        );

        self.enter(QueryStage::Build);
        let encoded = self.codec.encode_request(req);
        let cmd = self.step(encoded)?;

        self.enter(QueryStage::Submit);
        let submitted = self.transport.submit(&cmd, req.expected_response_len());
        let raw = self.step(submitted)?;

        self.enter(QueryStage::Parse);
        let decoded = self.codec.decode_response(&raw, req);
        let rsp = self.step(decoded)?;

        self.enter(QueryStage::Done);
        Ok(rsp)
    }

    pub fn nop(&mut self) -> UfsResult<()> {
        self.execute(&QueryRequest::nop())?;
        Ok(())
    }

    pub fn read_flag(&mut self, idn: FlagIdn) -> UfsResult<bool> {
        let rsp = self.execute(&QueryRequest::read_flag(idn))?;
        flag_of(&rsp)
    }

    /// Set a flag, returning the value the device reports afterwards
    pub fn set_flag(&mut self, idn: FlagIdn) -> UfsResult<bool> {
        let rsp = self.execute(&QueryRequest::set_flag(idn))?;
        flag_of(&rsp)
    }

    pub fn clear_flag(&mut self, idn: FlagIdn) -> UfsResult<bool> {
        let rsp = self.execute(&QueryRequest::clear_flag(idn))?;
        flag_of(&rsp)
    }

    pub fn toggle_flag(&mut self, idn: FlagIdn) -> UfsResult<bool> {
        let rsp = self.execute(&QueryRequest::toggle_flag(idn))?;
        flag_of(&rsp)
    }

    pub fn read_attribute(&mut self, idn: AttributeIdn, index: u8, selector: u8) -> UfsResult<u32> {
        let rsp = self.execute(&QueryRequest::read_attribute(idn, index, selector))?;
        attribute_of(&rsp)
    }

    pub fn write_attribute(
        &mut self,
        idn: AttributeIdn,
        index: u8,
        selector: u8,
        value: u32,
    ) -> UfsResult<()> {
        self.execute(&QueryRequest::write_attribute(idn, index, selector, value))?;
        Ok(())
    }

    /// Read a descriptor using its kind's full size as the buffer
    pub fn read_descriptor(&mut self, kind: DescriptorKind, index: u8, selector: u8) -> UfsResult<Vec<u8>> {
        let len = desc::max_size(kind)?;
        self.read_descriptor_len(kind, index, selector, len as u16)
    }

    /// Read a descriptor into a buffer of `len` bytes
    pub fn read_descriptor_len(
        &mut self,
        kind: DescriptorKind,
        index: u8,
        selector: u8,
        len: u16,
    ) -> UfsResult<Vec<u8>> {
        let mut req = QueryRequest::read_descriptor(kind, index, selector, len);
        if kind.is_rfu() {
            req = req.with_size_override(len);
        }
        let rsp = self.execute(&req)?;
        match rsp.value {
            QueryValue::Descriptor(data) => Ok(data),
            _ => Err(unexpected_value(&rsp)),
        }
    }

    /// Read string descriptor `index` and decode it
    pub fn read_string_descriptor(&mut self, index: u8) -> UfsResult<String> {
        let data = self.read_descriptor(DescriptorKind::String, index, 0)?;
        decode_string_descriptor(&data)
    }

    pub fn write_descriptor(&mut self, buf: DescriptorBuffer, index: u8, selector: u8) -> UfsResult<()> {
        self.execute(&QueryRequest::write_descriptor(buf, index, selector))?;
        Ok(())
    }
}

fn flag_of(rsp: &QueryResponse) -> UfsResult<bool> {
    rsp.flag().ok_or_else(|| unexpected_value(rsp))
}

fn attribute_of(rsp: &QueryResponse) -> UfsResult<u32> {
    rsp.attribute().ok_or_else(|| unexpected_value(rsp))
}

fn unexpected_value(rsp: &QueryResponse) -> UfsError {
    UfsError::UnexpectedValue {
        opcode: rsp.opcode as u8,
    }
}
