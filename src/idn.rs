//! Query opcodes and identification numbers (idn)
//!
//! Every Query Request addresses a single flag, attribute or descriptor.
//! The [`Idn`] sum type carries the category with the code so a flag opcode
//! can never silently target an attribute.

use crate::desc::DescriptorKind;
use crate::error::{UfsError, UfsResult};

/// UTP Query transaction specific opcode (byte 12 of the UPIU)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOpcode {
    Nop = 0x0,
    ReadDesc = 0x1,
    WriteDesc = 0x2,
    ReadAttr = 0x3,
    WriteAttr = 0x4,
    ReadFlag = 0x5,
    SetFlag = 0x6,
    ClearFlag = 0x7,
    ToggleFlag = 0x8,
}

impl QueryOpcode {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x0 => Some(QueryOpcode::Nop),
            0x1 => Some(QueryOpcode::ReadDesc),
            0x2 => Some(QueryOpcode::WriteDesc),
            0x3 => Some(QueryOpcode::ReadAttr),
            0x4 => Some(QueryOpcode::WriteAttr),
            0x5 => Some(QueryOpcode::ReadFlag),
            0x6 => Some(QueryOpcode::SetFlag),
            0x7 => Some(QueryOpcode::ClearFlag),
            0x8 => Some(QueryOpcode::ToggleFlag),
            _ => None,
        }
    }

    /// Convert a raw opcode supplied by a caller, rejecting values above TOGGLE_FLAG
    pub fn try_from_raw(val: u8) -> UfsResult<Self> {
        Self::from_u8(val).ok_or_else(|| {
            UfsError::InvalidRequestShape(format!("query opcode 0x{:02x} is out of range", val))
        })
    }

    /// Opcodes that change device state use the standard write function
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            QueryOpcode::WriteDesc
                | QueryOpcode::WriteAttr
                | QueryOpcode::SetFlag
                | QueryOpcode::ClearFlag
                | QueryOpcode::ToggleFlag
        )
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            QueryOpcode::ReadDesc | QueryOpcode::ReadAttr | QueryOpcode::ReadFlag
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueryOpcode::Nop => "NOP",
            QueryOpcode::ReadDesc => "Read Descriptor",
            QueryOpcode::WriteDesc => "Write Descriptor",
            QueryOpcode::ReadAttr => "Read Attribute",
            QueryOpcode::WriteAttr => "Write Attribute",
            QueryOpcode::ReadFlag => "Read Flag",
            QueryOpcode::SetFlag => "Set Flag",
            QueryOpcode::ClearFlag => "Clear Flag",
            QueryOpcode::ToggleFlag => "Toggle Flag",
        }
    }
}

/// Flag idn for Query Requests
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagIdn {
    Reserved1 = 0x00,
    DeviceInit = 0x01,
    PermanentWpe = 0x02,
    PowerOnWpe = 0x03,
    BkopsEn = 0x04,
    DeviceLifeSpanModeEn = 0x05,
    PurgeEnable = 0x06,
    RefreshEnable = 0x07,
    PhyResourceRemoval = 0x08,
    BusyRtc = 0x09,
    Reserved4 = 0x0A,
    PermanentlyDisableFw = 0x0B,
}

impl FlagIdn {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x00 => Some(FlagIdn::Reserved1),
            0x01 => Some(FlagIdn::DeviceInit),
            0x02 => Some(FlagIdn::PermanentWpe),
            0x03 => Some(FlagIdn::PowerOnWpe),
            0x04 => Some(FlagIdn::BkopsEn),
            0x05 => Some(FlagIdn::DeviceLifeSpanModeEn),
            0x06 => Some(FlagIdn::PurgeEnable),
            0x07 => Some(FlagIdn::RefreshEnable),
            0x08 => Some(FlagIdn::PhyResourceRemoval),
            0x09 => Some(FlagIdn::BusyRtc),
            0x0A => Some(FlagIdn::Reserved4),
            0x0B => Some(FlagIdn::PermanentlyDisableFw),
            _ => None,
        }
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, FlagIdn::Reserved1 | FlagIdn::Reserved4)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlagIdn::Reserved1 => "Reserved",
            FlagIdn::DeviceInit => "fDeviceInit",
            FlagIdn::PermanentWpe => "fPermanentWPEn",
            FlagIdn::PowerOnWpe => "fPowerOnWPEn",
            FlagIdn::BkopsEn => "fBackgroundOpsEn",
            FlagIdn::DeviceLifeSpanModeEn => "fDeviceLifeSpanModeEn",
            FlagIdn::PurgeEnable => "fPurgeEnable",
            FlagIdn::RefreshEnable => "fRefreshEnable",
            FlagIdn::PhyResourceRemoval => "fPhyResourceRemoval",
            FlagIdn::BusyRtc => "fBusyRTC",
            FlagIdn::Reserved4 => "Reserved",
            FlagIdn::PermanentlyDisableFw => "fPermanentlyDisableFwUpdate",
        }
    }
}

/// Attribute idn for Query Requests
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeIdn {
    BootLunEn = 0x00,
    Reserved1 = 0x01,
    PowerMode = 0x02,
    ActiveIccLevel = 0x03,
    OooDataEn = 0x04,
    BkopsStatus = 0x05,
    PurgeStatus = 0x06,
    MaxDataIn = 0x07,
    MaxDataOut = 0x08,
    DynCapNeeded = 0x09,
    RefClkFreq = 0x0A,
    ConfDescLock = 0x0B,
    MaxNumOfRtt = 0x0C,
    EeControl = 0x0D,
    EeStatus = 0x0E,
    SecondsPassed = 0x0F,
    ContextConf = 0x10,
    Obsolete = 0x11,
    Reserved2 = 0x12,
    Reserved3 = 0x13,
    DeviceFfuStatus = 0x14,
    PsaState = 0x15,
    PsaDataSize = 0x16,
    RefClkGatingWaitTime = 0x17,
    CaseRoughTemperature = 0x18,
    TooHighTempBoundary = 0x19,
    TooLowTempBoundary = 0x1A,
    RefreshStatus = 0x2C,
    RefreshFreq = 0x2D,
    RefreshUnit = 0x2E,
    RefreshMethod = 0x2F,
}

impl AttributeIdn {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x00 => Some(AttributeIdn::BootLunEn),
            0x01 => Some(AttributeIdn::Reserved1),
            0x02 => Some(AttributeIdn::PowerMode),
            0x03 => Some(AttributeIdn::ActiveIccLevel),
            0x04 => Some(AttributeIdn::OooDataEn),
            0x05 => Some(AttributeIdn::BkopsStatus),
            0x06 => Some(AttributeIdn::PurgeStatus),
            0x07 => Some(AttributeIdn::MaxDataIn),
            0x08 => Some(AttributeIdn::MaxDataOut),
            0x09 => Some(AttributeIdn::DynCapNeeded),
            0x0A => Some(AttributeIdn::RefClkFreq),
            0x0B => Some(AttributeIdn::ConfDescLock),
            0x0C => Some(AttributeIdn::MaxNumOfRtt),
            0x0D => Some(AttributeIdn::EeControl),
            0x0E => Some(AttributeIdn::EeStatus),
            0x0F => Some(AttributeIdn::SecondsPassed),
            0x10 => Some(AttributeIdn::ContextConf),
            0x11 => Some(AttributeIdn::Obsolete),
            0x12 => Some(AttributeIdn::Reserved2),
            0x13 => Some(AttributeIdn::Reserved3),
            0x14 => Some(AttributeIdn::DeviceFfuStatus),
            0x15 => Some(AttributeIdn::PsaState),
            0x16 => Some(AttributeIdn::PsaDataSize),
            0x17 => Some(AttributeIdn::RefClkGatingWaitTime),
            0x18 => Some(AttributeIdn::CaseRoughTemperature),
            0x19 => Some(AttributeIdn::TooHighTempBoundary),
            0x1A => Some(AttributeIdn::TooLowTempBoundary),
            0x2C => Some(AttributeIdn::RefreshStatus),
            0x2D => Some(AttributeIdn::RefreshFreq),
            0x2E => Some(AttributeIdn::RefreshUnit),
            0x2F => Some(AttributeIdn::RefreshMethod),
            _ => None,
        }
    }

    /// Reserved and obsolete attributes still encode but carry no defined meaning
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            AttributeIdn::Reserved1
                | AttributeIdn::Obsolete
                | AttributeIdn::Reserved2
                | AttributeIdn::Reserved3
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttributeIdn::BootLunEn => "bBootLunEn",
            AttributeIdn::Reserved1 => "Reserved",
            AttributeIdn::PowerMode => "bCurrentPowerMode",
            AttributeIdn::ActiveIccLevel => "bActiveICCLevel",
            AttributeIdn::OooDataEn => "bOutOfOrderDataEn",
            AttributeIdn::BkopsStatus => "bBackgroundOpStatus",
            AttributeIdn::PurgeStatus => "bPurgeStatus",
            AttributeIdn::MaxDataIn => "bMaxDataInSize",
            AttributeIdn::MaxDataOut => "bMaxDataOutSize",
            AttributeIdn::DynCapNeeded => "dDynCapNeeded",
            AttributeIdn::RefClkFreq => "bRefClkFreq",
            AttributeIdn::ConfDescLock => "bConfigDescrLock",
            AttributeIdn::MaxNumOfRtt => "bMaxNumOfRTT",
            AttributeIdn::EeControl => "wExceptionEventControl",
            AttributeIdn::EeStatus => "wExceptionEventStatus",
            AttributeIdn::SecondsPassed => "dSecondsPassed",
            AttributeIdn::ContextConf => "wContextConf",
            AttributeIdn::Obsolete => "Obsolete",
            AttributeIdn::Reserved2 => "Reserved",
            AttributeIdn::Reserved3 => "Reserved",
            AttributeIdn::DeviceFfuStatus => "bDeviceFFUStatus",
            AttributeIdn::PsaState => "bPSAState",
            AttributeIdn::PsaDataSize => "dPSADataSize",
            AttributeIdn::RefClkGatingWaitTime => "bRefClkGatingWaitTime",
            AttributeIdn::CaseRoughTemperature => "bDeviceCaseRoughTemperaure",
            AttributeIdn::TooHighTempBoundary => "bDeviceTooHighTempBoundary",
            AttributeIdn::TooLowTempBoundary => "bDeviceTooLowTempBoundary",
            AttributeIdn::RefreshStatus => "bRefreshStatus",
            AttributeIdn::RefreshFreq => "bRefreshFreq",
            AttributeIdn::RefreshUnit => "bRefreshUnit",
            AttributeIdn::RefreshMethod => "bRefreshMethod",
        }
    }
}

/// Target of a Query Request, tagged with its category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idn {
    Flag(FlagIdn),
    Attribute(AttributeIdn),
    Descriptor(DescriptorKind),
}

impl Idn {
    /// Raw idn byte as it appears on the wire
    pub fn code(&self) -> u8 {
        match self {
            Idn::Flag(f) => *f as u8,
            Idn::Attribute(a) => *a as u8,
            Idn::Descriptor(d) => *d as u8,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Idn::Flag(_) => "flag",
            Idn::Attribute(_) => "attribute",
            Idn::Descriptor(_) => "descriptor",
        }
    }

    pub fn is_reserved(&self) -> bool {
        match self {
            Idn::Flag(f) => f.is_reserved(),
            Idn::Attribute(a) => a.is_reserved(),
            Idn::Descriptor(d) => d.is_rfu(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Idn::Flag(f) => f.name(),
            Idn::Attribute(a) => a.name(),
            Idn::Descriptor(d) => d.name(),
        }
    }
}

impl From<FlagIdn> for Idn {
    fn from(idn: FlagIdn) -> Self {
        Idn::Flag(idn)
    }
}

impl From<AttributeIdn> for Idn {
    fn from(idn: AttributeIdn) -> Self {
        Idn::Attribute(idn)
    }
}

impl From<DescriptorKind> for Idn {
    fn from(kind: DescriptorKind) -> Self {
        Idn::Descriptor(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_range() {
        for raw in 0u8..=8 {
            let op = QueryOpcode::from_u8(raw).unwrap();
            assert_eq!(op as u8, raw);
        }
        assert!(QueryOpcode::from_u8(9).is_none());
        assert!(matches!(
            QueryOpcode::try_from_raw(0x20),
            Err(UfsError::InvalidRequestShape(_))
        ));
    }

    #[test]
    fn test_opcode_direction() {
        assert!(QueryOpcode::WriteAttr.is_write());
        assert!(QueryOpcode::ToggleFlag.is_write());
        assert!(QueryOpcode::ReadDesc.is_read());
        assert!(!QueryOpcode::Nop.is_read());
        assert!(!QueryOpcode::Nop.is_write());
    }

    #[test]
    fn test_flag_idn_codes() {
        assert_eq!(FlagIdn::from_u8(0x01), Some(FlagIdn::DeviceInit));
        assert_eq!(FlagIdn::from_u8(0x0B), Some(FlagIdn::PermanentlyDisableFw));
        assert!(FlagIdn::from_u8(0x0C).is_none());
        assert!(FlagIdn::Reserved4.is_reserved());
        assert!(!FlagIdn::BkopsEn.is_reserved());
    }

    #[test]
    fn test_attribute_idn_gap() {
        // 0x1B..=0x2B are not defined
        assert_eq!(AttributeIdn::from_u8(0x1A), Some(AttributeIdn::TooLowTempBoundary));
        assert!(AttributeIdn::from_u8(0x1B).is_none());
        assert!(AttributeIdn::from_u8(0x2B).is_none());
        assert_eq!(AttributeIdn::from_u8(0x2F), Some(AttributeIdn::RefreshMethod));
        assert!(AttributeIdn::Obsolete.is_reserved());
    }

    #[test]
    fn test_idn_code_and_category() {
        let idn: Idn = FlagIdn::PurgeEnable.into();
        assert_eq!(idn.code(), 0x06);
        assert_eq!(idn.category(), "flag");

        let idn: Idn = DescriptorKind::Geometry.into();
        assert_eq!(idn.code(), 0x07);
        assert_eq!(idn.name(), "Geometry");
    }
}
