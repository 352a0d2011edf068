//! Descriptor kinds and their size table
//!
//! Descriptors are variable-length metadata blocks. Each kind has a fixed
//! maximum size; reserved (RFU) kinds have none.

use crate::error::{UfsError, UfsResult};

/// Size of the common descriptor header (bLength, bDescriptorIDN)
pub const DESC_HEADER_SIZE: usize = 2;

/// Descriptor idn for Query Requests
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Device = 0x0,
    Configuration = 0x1,
    Unit = 0x2,
    Rfu0 = 0x3,
    Interconnect = 0x4,
    String = 0x5,
    Rfu1 = 0x6,
    Geometry = 0x7,
    Power = 0x8,
    Health = 0x9,
    Rfu3 = 0xA,
}

impl DescriptorKind {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x0 => Some(DescriptorKind::Device),
            0x1 => Some(DescriptorKind::Configuration),
            0x2 => Some(DescriptorKind::Unit),
            0x3 => Some(DescriptorKind::Rfu0),
            0x4 => Some(DescriptorKind::Interconnect),
            0x5 => Some(DescriptorKind::String),
            0x6 => Some(DescriptorKind::Rfu1),
            0x7 => Some(DescriptorKind::Geometry),
            0x8 => Some(DescriptorKind::Power),
            0x9 => Some(DescriptorKind::Health),
            0xA => Some(DescriptorKind::Rfu3),
            _ => None,
        }
    }

    pub fn is_rfu(&self) -> bool {
        matches!(
            self,
            DescriptorKind::Rfu0 | DescriptorKind::Rfu1 | DescriptorKind::Rfu3
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DescriptorKind::Device => "Device",
            DescriptorKind::Configuration => "Configuration",
            DescriptorKind::Unit => "Unit",
            DescriptorKind::Interconnect => "Interconnect",
            DescriptorKind::String => "String",
            DescriptorKind::Geometry => "Geometry",
            DescriptorKind::Power => "Power",
            DescriptorKind::Health => "Health",
            DescriptorKind::Rfu0 | DescriptorKind::Rfu1 | DescriptorKind::Rfu3 => "RFU",
        }
    }
}

/// Maximum size in bytes of a descriptor of the given kind
pub fn max_size(kind: DescriptorKind) -> UfsResult<usize> {
    match kind {
        DescriptorKind::Device => Ok(0x40),
        DescriptorKind::Configuration => Ok(0x90),
        DescriptorKind::Unit => Ok(0x23),
        DescriptorKind::Interconnect => Ok(0x06),
        // 126 UTF-16 characters plus the 2-byte header
        DescriptorKind::String => Ok(0xFE),
        DescriptorKind::Geometry => Ok(0x48),
        DescriptorKind::Power => Ok(0x62),
        DescriptorKind::Health => Ok(0x2D),
        DescriptorKind::Rfu0 | DescriptorKind::Rfu1 | DescriptorKind::Rfu3 => {
            Err(UfsError::UnknownDescriptorKind(kind as u8))
        }
    }
}

/// Descriptor payload whose length is checked against its kind's capacity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBuffer {
    kind: DescriptorKind,
    capacity: usize,
    data: Vec<u8>,
}

impl DescriptorBuffer {
    /// Create an empty buffer bounded by `max_size(kind)`
    pub fn new(kind: DescriptorKind) -> UfsResult<Self> {
        let capacity = max_size(kind)?;
        Ok(DescriptorBuffer {
            kind,
            capacity,
            data: Vec::with_capacity(capacity),
        })
    }

    /// Create a buffer with an explicit capacity, used for RFU kinds
    pub fn with_capacity(kind: DescriptorKind, capacity: usize) -> Self {
        DescriptorBuffer {
            kind,
            capacity,
            data: Vec::with_capacity(capacity),
        }
    }

    /// Build a buffer from existing bytes, failing if they exceed the kind's size
    pub fn from_bytes(kind: DescriptorKind, bytes: &[u8]) -> UfsResult<Self> {
        let mut buf = Self::new(kind)?;
        buf.extend_from_slice(bytes)?;
        Ok(buf)
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> UfsResult<()> {
        let needed = self.data.len() + bytes.len();
        if needed > self.capacity {
            return Err(UfsError::InvalidRequestShape(format!(
                "{} descriptor payload of {} bytes exceeds {} bytes",
                self.kind.name(),
                needed,
                self.capacity
            )));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Common two-byte header at the start of every descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeader {
    /// bLength: total descriptor size in bytes
    pub length: u8,
    /// bDescriptorIDN: descriptor type
    pub idn: u8,
}

impl DescriptorHeader {
    pub fn parse(data: &[u8]) -> UfsResult<Self> {
        if data.len() < DESC_HEADER_SIZE {
            return Err(UfsError::TruncatedResponse {
                got: data.len(),
                need: DESC_HEADER_SIZE,
            });
        }
        Ok(DescriptorHeader {
            length: data[0],
            idn: data[1],
        })
    }
}

/// Decode a string descriptor (UTF-16BE characters after the header)
pub fn decode_string_descriptor(data: &[u8]) -> UfsResult<String> {
    let header = DescriptorHeader::parse(data)?;
    if header.idn != DescriptorKind::String as u8 {
        return Err(UfsError::IdnMismatch {
            field: "descriptor idn",
            expected: DescriptorKind::String as u8,
            got: header.idn,
        });
    }

    let end = (header.length as usize).min(data.len());
    if end < DESC_HEADER_SIZE {
        return Ok(String::new());
    }

    let units: Vec<u16> = data[DESC_HEADER_SIZE..end]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();

    Ok(String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string())
}
