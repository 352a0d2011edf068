//! UPIU Query Request/Response encoding and decoding
//!
//! This module handles the binary format of the Query Request and Query
//! Response UPIUs (UFS Protocol Information Units) exchanged over bsg.

use crate::config::ReservedPolicy;
use crate::desc::{self, DescriptorBuffer, DescriptorKind};
use crate::error::{UfsError, UfsResult};
use crate::idn::{AttributeIdn, FlagIdn, Idn, QueryOpcode};
use crate::transport::TransferBuffer;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::Cursor;

/// Header plus transaction specific fields, in bytes
pub const UPIU_SIZE: usize = 32;

/// Size of an attribute value on the wire
pub const ATTR_VALUE_SIZE: usize = 4;

/// UTP UPIU transaction codes
pub mod transaction {
    // Initiator to target
    pub const NOP_OUT: u8 = 0x00;
    pub const COMMAND: u8 = 0x01;
    pub const DATA_OUT: u8 = 0x02;
    pub const TASK_REQ: u8 = 0x04;
    pub const QUERY_REQ: u8 = 0x16;

    // Target to initiator
    pub const QUERY_RSP: u8 = 0x36;
}

/// UPIU read/write flags (byte 1)
pub mod flags {
    pub const NONE: u8 = 0x00;
    pub const WRITE: u8 = 0x20;
    pub const READ: u8 = 0x40;
}

/// UPIU query request functions (byte 5)
pub mod query_func {
    pub const STANDARD_READ_REQUEST: u8 = 0x01;
    pub const STANDARD_WRITE_REQUEST: u8 = 0x81;
}

/// Query UPIU layout
///
/// ```text
///  Byte   0         1         2         3
///      +---------+---------+---------+---------+
///    0 | TransTyp| Flags   | LUN     | TaskTag |
///      +---------+---------+---------+---------+
///    4 | CmdSet  | QueryFn | Response| Status  |
///      +---------+---------+---------+---------+
///    8 | EHS Len | DevInfo | Data Segment Len  |
///      +---------+---------+---------+---------+
///   12 | Opcode  | IDN     | Index   | Selector|
///      +---------+---------+---------+---------+
///   16 | Reserved          | Length            |
///      +---------+---------+---------+---------+
///   20 | Value                                 |
///      +---------+---------+---------+---------+
///   24 | Reserved (8 bytes)                    |
///      +---------+---------+---------+---------+
/// ```
mod offset {
    pub const TRANSACTION: usize = 0;
    pub const FLAGS: usize = 1;
    pub const QUERY_FUNCTION: usize = 5;
    pub const DATA_SEGMENT_LEN: usize = 10;
    pub const OPCODE: usize = 12;
    pub const LENGTH: usize = 18;
    pub const VALUE: usize = 20;
}

/// Data carried by a Query Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPayload {
    None,
    /// Big-endian attribute value, exactly four bytes for WRITE_ATTR
    Attribute(Vec<u8>),
    /// Descriptor bytes for WRITE_DESC
    Descriptor(Vec<u8>),
}

/// A fully resolved Query Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub opcode: QueryOpcode,
    pub idn: Idn,
    /// Logical unit or string index
    pub index: u8,
    pub selector: u8,
    pub payload: QueryPayload,
    /// Bytes allotted for a descriptor read
    pub length: u16,
    /// Explicit size for RFU descriptor kinds
    pub size_override: Option<u16>,
}

impl QueryRequest {
    /// Generic constructor; shape is validated when encoding
    pub fn new(opcode: QueryOpcode, idn: Idn, index: u8, selector: u8, payload: QueryPayload) -> Self {
        QueryRequest {
            opcode,
            idn,
            index,
            selector,
            payload,
            length: 0,
            size_override: None,
        }
    }

    pub fn nop() -> Self {
        Self::new(
            QueryOpcode::Nop,
            Idn::Flag(FlagIdn::Reserved1),
            0,
            0,
            QueryPayload::None,
        )
    }

    pub fn read_flag(idn: FlagIdn) -> Self {
        Self::new(QueryOpcode::ReadFlag, Idn::Flag(idn), 0, 0, QueryPayload::None)
    }

    pub fn set_flag(idn: FlagIdn) -> Self {
        Self::new(QueryOpcode::SetFlag, Idn::Flag(idn), 0, 0, QueryPayload::None)
    }

    pub fn clear_flag(idn: FlagIdn) -> Self {
        Self::new(QueryOpcode::ClearFlag, Idn::Flag(idn), 0, 0, QueryPayload::None)
    }

    pub fn toggle_flag(idn: FlagIdn) -> Self {
        Self::new(QueryOpcode::ToggleFlag, Idn::Flag(idn), 0, 0, QueryPayload::None)
    }

    pub fn read_attribute(idn: AttributeIdn, index: u8, selector: u8) -> Self {
        Self::new(
            QueryOpcode::ReadAttr,
            Idn::Attribute(idn),
            index,
            selector,
            QueryPayload::None,
        )
    }

    pub fn write_attribute(idn: AttributeIdn, index: u8, selector: u8, value: u32) -> Self {
        Self::new(
            QueryOpcode::WriteAttr,
            Idn::Attribute(idn),
            index,
            selector,
            QueryPayload::Attribute(value.to_be_bytes().to_vec()),
        )
    }

    pub fn read_descriptor(kind: DescriptorKind, index: u8, selector: u8, length: u16) -> Self {
        let mut req = Self::new(
            QueryOpcode::ReadDesc,
            Idn::Descriptor(kind),
            index,
            selector,
            QueryPayload::None,
        );
        req.length = length;
        req
    }

    /// Write a descriptor; RFU buffers carry their capacity as the size override
    pub fn write_descriptor(buf: DescriptorBuffer, index: u8, selector: u8) -> Self {
        let kind = buf.kind();
        let size_override = if kind.is_rfu() {
            Some(buf.capacity().min(u16::MAX as usize) as u16)
        } else {
            None
        };
        let mut req = Self::new(
            QueryOpcode::WriteDesc,
            Idn::Descriptor(kind),
            index,
            selector,
            QueryPayload::Descriptor(buf.into_bytes()),
        );
        req.size_override = size_override;
        req
    }

    pub fn with_size_override(mut self, size: u16) -> Self {
        self.size_override = Some(size);
        self
    }

    /// Response bytes the transport must make room for
    pub fn expected_response_len(&self) -> usize {
        match self.opcode {
            QueryOpcode::ReadDesc => UPIU_SIZE + self.length as usize,
            _ => UPIU_SIZE,
        }
    }
}

/// Value returned by a Query Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    None,
    Flag(bool),
    Attribute(u32),
    Descriptor(Vec<u8>),
}

/// Decoded Query Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub opcode: QueryOpcode,
    pub idn: u8,
    pub index: u8,
    pub selector: u8,
    /// Query function echoed by the device
    pub function: u8,
    /// Query response code (0 on success)
    pub response: u8,
    pub status: u8,
    /// Device-reported length field
    pub length: u16,
    pub value: QueryValue,
}

impl QueryResponse {
    pub fn flag(&self) -> Option<bool> {
        match self.value {
            QueryValue::Flag(f) => Some(f),
            _ => None,
        }
    }

    pub fn attribute(&self) -> Option<u32> {
        match self.value {
            QueryValue::Attribute(v) => Some(v),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> Option<&[u8]> {
        match &self.value {
            QueryValue::Descriptor(d) => Some(d),
            _ => None,
        }
    }
}

/// Encoder/decoder for Query UPIUs
#[derive(Debug, Clone, Copy, Default)]
pub struct UpiuCodec {
    policy: ReservedPolicy,
}

impl UpiuCodec {
    pub fn new(policy: ReservedPolicy) -> Self {
        UpiuCodec { policy }
    }

    pub fn policy(&self) -> ReservedPolicy {
        self.policy
    }

    /// Byte limit for a descriptor of this kind under the current policy
    pub fn descriptor_limit(&self, kind: DescriptorKind, size_override: Option<u16>) -> UfsResult<usize> {
        if !kind.is_rfu() {
            return desc::max_size(kind);
        }
        match (self.policy, size_override) {
            (ReservedPolicy::PassThrough, Some(size)) => {
                log::info!("Forwarding RFU descriptor 0x{:02x} with {} byte override", kind as u8, size);
                Ok(size as usize)
            }
            _ => Err(UfsError::UnknownDescriptorKind(kind as u8)),
        }
    }

    /// Check opcode, idn and payload agree with each other
    pub fn validate(&self, req: &QueryRequest) -> UfsResult<()> {
        // NOP carries no idn; the zero in that field is not a reserved flag
        if req.idn.is_reserved() && req.opcode != QueryOpcode::Nop {
            if let Idn::Flag(_) | Idn::Attribute(_) = req.idn {
                match self.policy {
                    ReservedPolicy::Reject => {
                        return Err(UfsError::InvalidRequestShape(format!(
                            "{} idn 0x{:02x} is reserved",
                            req.idn.category(),
                            req.idn.code()
                        )));
                    }
                    ReservedPolicy::PassThrough => {
                        log::info!(
                            "{} idn 0x{:02x} is reserved, forwarding to device",
                            req.idn.category(),
                            req.idn.code()
                        );
                    }
                }
            }
        }

        match req.opcode {
            QueryOpcode::Nop => expect_no_payload(req),
            QueryOpcode::ReadFlag
            | QueryOpcode::SetFlag
            | QueryOpcode::ClearFlag
            | QueryOpcode::ToggleFlag => {
                expect_category(req, matches!(req.idn, Idn::Flag(_)), "flag")?;
                expect_no_payload(req)
            }
            QueryOpcode::ReadAttr => {
                expect_category(req, matches!(req.idn, Idn::Attribute(_)), "attribute")?;
                expect_no_payload(req)
            }
            QueryOpcode::WriteAttr => {
                expect_category(req, matches!(req.idn, Idn::Attribute(_)), "attribute")?;
                match &req.payload {
                    QueryPayload::Attribute(v) if v.len() == ATTR_VALUE_SIZE => Ok(()),
                    QueryPayload::Attribute(v) => Err(UfsError::InvalidRequestShape(format!(
                        "attribute value must be {} bytes, got {}",
                        ATTR_VALUE_SIZE,
                        v.len()
                    ))),
                    _ => Err(UfsError::InvalidRequestShape(
                        "Write Attribute requires an attribute value".to_string(),
                    )),
                }
            }
            QueryOpcode::ReadDesc => {
                let kind = expect_descriptor(req)?;
                expect_no_payload(req)?;
                self.descriptor_limit(kind, req.size_override)?;
                if req.length == 0 {
                    return Err(UfsError::InvalidRequestShape(
                        "Read Descriptor requires a non-zero buffer length".to_string(),
                    ));
                }
                Ok(())
            }
            QueryOpcode::WriteDesc => {
                let kind = expect_descriptor(req)?;
                let limit = self.descriptor_limit(kind, req.size_override)?;
                match &req.payload {
                    QueryPayload::Descriptor(d) if d.is_empty() => Err(UfsError::InvalidRequestShape(
                        "Write Descriptor payload is empty".to_string(),
                    )),
                    QueryPayload::Descriptor(d) if d.len() > limit => {
                        Err(UfsError::InvalidRequestShape(format!(
                            "{} descriptor payload of {} bytes exceeds {} bytes",
                            kind.name(),
                            d.len(),
                            limit
                        )))
                    }
                    QueryPayload::Descriptor(_) => Ok(()),
                    _ => Err(UfsError::InvalidRequestShape(
                        "Write Descriptor requires a descriptor payload".to_string(),
                    )),
                }
            }
        }
    }

    /// Build the Query Request UPIU, followed by any descriptor payload
    pub fn encode_request(&self, req: &QueryRequest) -> UfsResult<TransferBuffer> {
        self.validate(req)?;

        let data: &[u8] = match &req.payload {
            QueryPayload::Descriptor(d) => d,
            _ => &[],
        };
        let mut buf = TransferBuffer::zeroed(UPIU_SIZE + data.len())?;

        buf[offset::TRANSACTION] = transaction::QUERY_REQ;
        buf[offset::FLAGS] = if req.opcode.is_write() {
            flags::WRITE
        } else if req.opcode.is_read() {
            flags::READ
        } else {
            flags::NONE
        };
        buf[offset::QUERY_FUNCTION] = if req.opcode.is_write() {
            query_func::STANDARD_WRITE_REQUEST
        } else {
            query_func::STANDARD_READ_REQUEST
        };
        BigEndian::write_u16(&mut buf[offset::DATA_SEGMENT_LEN..], data.len() as u16);

        // Transaction specific fields
        buf[offset::OPCODE] = req.opcode as u8;
        buf[offset::OPCODE + 1] = req.idn.code();
        buf[offset::OPCODE + 2] = req.index;
        buf[offset::OPCODE + 3] = req.selector;

        let length = match req.opcode {
            QueryOpcode::ReadDesc => req.length,
            QueryOpcode::WriteDesc => data.len() as u16,
            _ => 0,
        };
        BigEndian::write_u16(&mut buf[offset::LENGTH..], length);

        if let QueryPayload::Attribute(v) = &req.payload {
            buf[offset::VALUE..offset::VALUE + ATTR_VALUE_SIZE].copy_from_slice(v);
        }

        buf[UPIU_SIZE..].copy_from_slice(data);

        log::trace!("Query request UPIU: {}", hex::encode(&buf[..UPIU_SIZE]));
        Ok(buf)
    }

    /// Parse a Query Response and check it answers `expected`
    pub fn decode_response(&self, raw: &[u8], expected: &QueryRequest) -> UfsResult<QueryResponse> {
        if raw.len() < UPIU_SIZE {
            return Err(UfsError::TruncatedResponse {
                got: raw.len(),
                need: UPIU_SIZE,
            });
        }
        log::trace!("Query response UPIU: {}", hex::encode(&raw[..UPIU_SIZE]));

        let mut cursor = Cursor::new(raw);

        // Bytes 0-3: transaction type, flags, LUN, task tag
        let trans_type = cursor.read_u8()? & 0x3F;
        check_echo("transaction type", transaction::QUERY_RSP, trans_type)?;
        cursor.set_position(offset::QUERY_FUNCTION as u64);

        // Bytes 5-7: query function, response, status
        let function = cursor.read_u8()?;
        let response = cursor.read_u8()?;
        let status = cursor.read_u8()?;

        // Bytes 12-15: opcode, idn, index, selector
        cursor.set_position(offset::OPCODE as u64);
        let opcode = cursor.read_u8()?;
        check_echo("opcode", expected.opcode as u8, opcode)?;
        let idn = cursor.read_u8()?;
        check_echo("idn", expected.idn.code(), idn)?;
        let index = cursor.read_u8()?;
        check_echo("index", expected.index, index)?;
        let selector = cursor.read_u8()?;
        check_echo("selector", expected.selector, selector)?;

        if response != 0 {
            log::debug!(
                "{} of {} 0x{:02x} rejected by device: response 0x{:02x}",
                expected.opcode.name(),
                expected.idn.category(),
                idn,
                response
            );
            return Err(UfsError::QueryFailed { code: response });
        }

        // Bytes 18-23: length, value
        cursor.set_position(offset::LENGTH as u64);
        let length = cursor.read_u16::<BigEndian>()?;
        let value = cursor.read_u32::<BigEndian>()?;

        let value = match expected.opcode {
            QueryOpcode::ReadFlag
            | QueryOpcode::SetFlag
            | QueryOpcode::ClearFlag
            | QueryOpcode::ToggleFlag => QueryValue::Flag(value & 0x01 != 0),
            QueryOpcode::ReadAttr | QueryOpcode::WriteAttr => QueryValue::Attribute(value),
            QueryOpcode::ReadDesc => {
                let kind = expect_descriptor(expected)?;
                let limit = self
                    .descriptor_limit(kind, expected.size_override)?
                    .min(expected.length as usize);
                let reported = length as usize;
                if reported > limit {
                    return Err(UfsError::DescriptorTooLarge { reported, limit });
                }
                if raw.len() < UPIU_SIZE + reported {
                    return Err(UfsError::TruncatedResponse {
                        got: raw.len(),
                        need: UPIU_SIZE + reported,
                    });
                }
                QueryValue::Descriptor(raw[UPIU_SIZE..UPIU_SIZE + reported].to_vec())
            }
            QueryOpcode::WriteDesc | QueryOpcode::Nop => QueryValue::None,
        };

        Ok(QueryResponse {
            opcode: expected.opcode,
            idn,
            index,
            selector,
            function,
            response,
            status,
            length,
            value,
        })
    }
}

fn check_echo(field: &'static str, expected: u8, got: u8) -> UfsResult<()> {
    if expected != got {
        return Err(UfsError::IdnMismatch {
            field,
            expected,
            got,
        });
    }
    Ok(())
}

fn expect_category(req: &QueryRequest, ok: bool, wanted: &str) -> UfsResult<()> {
    if ok {
        return Ok(());
    }
    Err(UfsError::InvalidRequestShape(format!(
        "{} requires a {} idn, got {} idn 0x{:02x}",
        req.opcode.name(),
        wanted,
        req.idn.category(),
        req.idn.code()
    )))
}

fn expect_descriptor(req: &QueryRequest) -> UfsResult<DescriptorKind> {
    match req.idn {
        Idn::Descriptor(kind) => Ok(kind),
        _ => Err(UfsError::InvalidRequestShape(format!(
            "{} requires a descriptor idn, got {} idn 0x{:02x}",
            req.opcode.name(),
            req.idn.category(),
            req.idn.code()
        ))),
    }
}

fn expect_no_payload(req: &QueryRequest) -> UfsResult<()> {
    if req.payload != QueryPayload::None {
        return Err(UfsError::InvalidRequestShape(format!(
            "{} carries no payload",
            req.opcode.name()
        )));
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
