//! Error types for UFS query operations

use thiserror::Error;

/// UFS query errors
#[derive(Debug, Error)]
pub enum UfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request shape: {0}")]
    InvalidRequestShape(String),

    #[error("Unknown descriptor kind: 0x{0:02x}")]
    UnknownDescriptorKind(u8),

    #[error("Transfer too large: {requested} bytes, limit is {limit} bytes")]
    BufferTooLarge { requested: usize, limit: usize },

    #[error("Transport error (status {status}): {detail}")]
    TransportError { status: i32, detail: String },

    #[error("Truncated response: {got} bytes, need at least {need}")]
    TruncatedResponse { got: usize, need: usize },

    #[error("Response {field} mismatch: expected 0x{expected:02x}, got 0x{got:02x}")]
    IdnMismatch {
        field: &'static str,
        expected: u8,
        got: u8,
    },

    #[error("Descriptor too large: device reported {reported} bytes, limit is {limit}")]
    DescriptorTooLarge { reported: usize, limit: usize },

    #[error("Response to opcode 0x{opcode:02x} carries no matching value")]
    UnexpectedValue { opcode: u8 },

    #[error("Query failed with response code 0x{code:02x}")]
    QueryFailed { code: u8 },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for UFS query operations
pub type UfsResult<T> = Result<T, UfsError>;

/// Query response codes returned in byte 6 of a Query Response UPIU
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResponseCode {
    Success = 0x00,
    ParameterNotReadable = 0xF6,
    ParameterNotWriteable = 0xF7,
    ParameterAlreadyWritten = 0xF8,
    InvalidLength = 0xF9,
    InvalidValue = 0xFA,
    InvalidSelector = 0xFB,
    InvalidIndex = 0xFC,
    InvalidIdn = 0xFD,
    InvalidOpcode = 0xFE,
    GeneralFailure = 0xFF,
}

impl QueryResponseCode {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x00 => Some(QueryResponseCode::Success),
            0xF6 => Some(QueryResponseCode::ParameterNotReadable),
            0xF7 => Some(QueryResponseCode::ParameterNotWriteable),
            0xF8 => Some(QueryResponseCode::ParameterAlreadyWritten),
            0xF9 => Some(QueryResponseCode::InvalidLength),
            0xFA => Some(QueryResponseCode::InvalidValue),
            0xFB => Some(QueryResponseCode::InvalidSelector),
            0xFC => Some(QueryResponseCode::InvalidIndex),
            0xFD => Some(QueryResponseCode::InvalidIdn),
            0xFE => Some(QueryResponseCode::InvalidOpcode),
            0xFF => Some(QueryResponseCode::GeneralFailure),
            _ => None,
        }
    }
}

/// Explain a query response code in terms an operator can act on
pub fn decode_query_response(code: u8) -> String {
    let text = match QueryResponseCode::from_u8(code) {
        Some(QueryResponseCode::Success) => "Query completed successfully",
        Some(QueryResponseCode::ParameterNotReadable) => {
            "Parameter not readable: the addressed flag, attribute or descriptor is write-only"
        }
        Some(QueryResponseCode::ParameterNotWriteable) => {
            "Parameter not writeable: the addressed field is read-only or locked"
        }
        Some(QueryResponseCode::ParameterAlreadyWritten) => {
            "Parameter already written: write-once field has been programmed before"
        }
        Some(QueryResponseCode::InvalidLength) => {
            "Invalid length: the length field does not match the descriptor size"
        }
        Some(QueryResponseCode::InvalidValue) => "Invalid value: the device rejected the written value",
        Some(QueryResponseCode::InvalidSelector) => "Invalid selector for this idn",
        Some(QueryResponseCode::InvalidIndex) => {
            "Invalid index: the logical unit or string index does not exist"
        }
        Some(QueryResponseCode::InvalidIdn) => "Invalid idn: the device does not implement this field",
        Some(QueryResponseCode::InvalidOpcode) => "Invalid opcode for this query function",
        Some(QueryResponseCode::GeneralFailure) => "General failure reported by the device",
        None => {
            return format!(
                "Unknown query response code 0x{:02x} (unrecognized by this library)",
                code
            )
        }
    };
    format!("{} (0x{:02x})", text, code)
}
