//! Integration tests for the query orchestrator
//!
//! These tests drive `UfsQuery` against `SimulatedDevice` and cover:
//! - Flag, attribute and descriptor round trips
//! - Request shape validation before any transport call
//! - Response validation (idn echo, descriptor bounds, device NAK)
//! - Transfer size limits and reserved idn policy

use rand::Rng;
use std::sync::Arc;
use ufs_query::desc::{self, DescriptorBuffer, DescriptorKind};
use ufs_query::idn::{AttributeIdn, FlagIdn, Idn, QueryOpcode};
use ufs_query::query::{NopLogger, QueryStage};
use ufs_query::transport::{UfsTransport, MAX_IOCTL_BUF_SIZE};
use ufs_query::upiu::{flags, QueryPayload, QueryRequest, QueryValue, UPIU_SIZE};
use ufs_query::{QueryConfig, ReservedPolicy, SimulatedDevice, UfsError, UfsQuery};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn query(dev: SimulatedDevice) -> UfsQuery<SimulatedDevice> {
    init_logging();
    UfsQuery::new(dev)
}

const FLAGS: [FlagIdn; 10] = [
    FlagIdn::DeviceInit,
    FlagIdn::PermanentWpe,
    FlagIdn::PowerOnWpe,
    FlagIdn::BkopsEn,
    FlagIdn::DeviceLifeSpanModeEn,
    FlagIdn::PurgeEnable,
    FlagIdn::RefreshEnable,
    FlagIdn::PhyResourceRemoval,
    FlagIdn::BusyRtc,
    FlagIdn::PermanentlyDisableFw,
];

const DESCRIPTOR_KINDS: [DescriptorKind; 8] = [
    DescriptorKind::Device,
    DescriptorKind::Configuration,
    DescriptorKind::Unit,
    DescriptorKind::Interconnect,
    DescriptorKind::String,
    DescriptorKind::Geometry,
    DescriptorKind::Power,
    DescriptorKind::Health,
];

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_flag_round_trip() {
    let mut q = query(SimulatedDevice::new());

    for idn in FLAGS {
        assert!(q.set_flag(idn).unwrap(), "{} should read back set", idn.name());
        assert!(q.read_flag(idn).unwrap());
        assert!(!q.toggle_flag(idn).unwrap());
        assert!(!q.read_flag(idn).unwrap());
        assert!(q.toggle_flag(idn).unwrap());
        assert!(!q.clear_flag(idn).unwrap());
    }
}

#[test]
fn test_flag_response_echoes_request() {
    let mut q = query(SimulatedDevice::new());
    let req = QueryRequest::set_flag(FlagIdn::RefreshEnable);
    let rsp = q.execute(&req).unwrap();

    assert_eq!(rsp.opcode, QueryOpcode::SetFlag);
    assert_eq!(rsp.idn, FlagIdn::RefreshEnable as u8);
    assert_eq!(rsp.value, QueryValue::Flag(true));
}

#[test]
fn test_attribute_round_trip() {
    let mut q = query(SimulatedDevice::new());
    let mut rng = rand::thread_rng();

    for idn in [
        AttributeIdn::BootLunEn,
        AttributeIdn::ActiveIccLevel,
        AttributeIdn::EeControl,
        AttributeIdn::SecondsPassed,
        AttributeIdn::RefreshMethod,
    ] {
        let value: u32 = rng.gen();
        let index: u8 = rng.gen_range(0..8);
        q.write_attribute(idn, index, 0, value).unwrap();
        assert_eq!(q.read_attribute(idn, index, 0).unwrap(), value);
    }
}

#[test]
fn test_attribute_write_response_value() {
    let mut q = query(SimulatedDevice::new());
    let req = QueryRequest::write_attribute(AttributeIdn::MaxNumOfRtt, 0, 0, 0x0000_0004);
    let rsp = q.execute(&req).unwrap();
    assert_eq!(rsp.attribute(), Some(4));
    assert_eq!(rsp.idn, AttributeIdn::MaxNumOfRtt as u8);
}

#[test]
fn test_attribute_index_and_selector_are_distinct() {
    let mut q = query(SimulatedDevice::new());
    q.write_attribute(AttributeIdn::ConfDescLock, 1, 0, 11).unwrap();
    q.write_attribute(AttributeIdn::ConfDescLock, 1, 1, 22).unwrap();

    assert_eq!(q.read_attribute(AttributeIdn::ConfDescLock, 1, 0).unwrap(), 11);
    assert_eq!(q.read_attribute(AttributeIdn::ConfDescLock, 1, 1).unwrap(), 22);
    assert_eq!(q.read_attribute(AttributeIdn::ConfDescLock, 0, 0).unwrap(), 0);
}

#[test]
fn test_descriptor_round_trip() {
    let mut q = query(SimulatedDevice::new());
    let mut rng = rand::thread_rng();

    for kind in DESCRIPTOR_KINDS {
        let size = desc::max_size(kind).unwrap();
        let mut payload: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
        payload[0] = size as u8;
        payload[1] = kind as u8;

        let buf = DescriptorBuffer::from_bytes(kind, &payload).unwrap();
        q.write_descriptor(buf, 0, 0).unwrap();

        let read = q.read_descriptor(kind, 0, 0).unwrap();
        assert_eq!(read, payload, "{} descriptor should round trip", kind.name());
    }
}

#[test]
fn test_short_descriptor_read() {
    let mut q = query(SimulatedDevice::standard());
    let data = q.read_descriptor_len(DescriptorKind::Device, 0, 0, 0x10).unwrap();
    assert_eq!(data.len(), 0x10);
    assert_eq!(data[0], 0x40);
    assert_eq!(data[1], DescriptorKind::Device as u8);
}

#[test]
fn test_read_manufacturer_name() {
    let mut q = query(SimulatedDevice::standard());
    let device = q.read_descriptor(DescriptorKind::Device, 0, 0).unwrap();
    let name_index = device[0x10];
    assert_eq!(q.read_string_descriptor(name_index).unwrap(), "SIMUFS");
}

#[test]
fn test_nop() {
    let mut q = query(SimulatedDevice::new());
    q.nop().unwrap();
    assert_eq!(q.stage(), QueryStage::Done);
    assert_eq!(q.transport().requests()[0][1], flags::NONE);
}

// ============================================================================
// Request shape validation
// ============================================================================

#[test]
fn test_write_attribute_needs_four_bytes() {
    let mut q = query(SimulatedDevice::new());

    for len in [0usize, 1, 2, 3, 5, 16] {
        let req = QueryRequest::new(
            QueryOpcode::WriteAttr,
            Idn::Attribute(AttributeIdn::EeControl),
            0,
            0,
            QueryPayload::Attribute(vec![0xAA; len]),
        );
        assert!(
            matches!(q.execute(&req), Err(UfsError::InvalidRequestShape(_))),
            "{} byte attribute value should be rejected",
            len
        );
    }
    assert_eq!(q.transport().calls(), 0);
    assert_eq!(q.failed_in(), Some(QueryStage::Build));
}

#[test]
fn test_flag_opcodes_need_flag_idn() {
    let mut q = query(SimulatedDevice::new());

    for opcode in [QueryOpcode::SetFlag, QueryOpcode::ClearFlag, QueryOpcode::ToggleFlag] {
        for idn in [
            Idn::Attribute(AttributeIdn::BootLunEn),
            Idn::Attribute(AttributeIdn::PurgeStatus),
            Idn::Descriptor(DescriptorKind::Health),
        ] {
            let req = QueryRequest::new(opcode, idn, 0, 0, QueryPayload::None);
            assert!(matches!(
                q.execute(&req),
                Err(UfsError::InvalidRequestShape(_))
            ));
        }
    }
    assert_eq!(q.transport().calls(), 0);
}

#[test]
fn test_descriptor_opcodes_need_descriptor_idn() {
    let mut q = query(SimulatedDevice::new());
    let mut req = QueryRequest::new(
        QueryOpcode::ReadDesc,
        Idn::Flag(FlagIdn::DeviceInit),
        0,
        0,
        QueryPayload::None,
    );
    req.length = 0x40;
    assert!(matches!(q.execute(&req), Err(UfsError::InvalidRequestShape(_))));
}

#[test]
fn test_raw_opcode_out_of_range() {
    for raw in [9u8, 0x10, 0xFF] {
        assert!(matches!(
            QueryOpcode::try_from_raw(raw),
            Err(UfsError::InvalidRequestShape(_))
        ));
    }
}

#[test]
fn test_oversized_descriptor_write_rejected() {
    let mut q = query(SimulatedDevice::new());
    let req = QueryRequest::new(
        QueryOpcode::WriteDesc,
        Idn::Descriptor(DescriptorKind::Unit),
        0,
        0,
        QueryPayload::Descriptor(vec![0; 0x24]),
    );
    assert!(matches!(q.execute(&req), Err(UfsError::InvalidRequestShape(_))));
    assert_eq!(q.transport().calls(), 0);
}

// ============================================================================
// Response validation
// ============================================================================

#[test]
fn test_device_descriptor_too_large() {
    let mut dev = SimulatedDevice::new();
    dev.set_descriptor(DescriptorKind::Device, 0, 0, vec![0x41; 0x41]);
    let mut q = query(dev);

    match q.read_descriptor_len(DescriptorKind::Device, 0, 0, 0x41) {
        Err(UfsError::DescriptorTooLarge { reported, limit }) => {
            assert_eq!(reported, 0x41);
            assert_eq!(limit, 0x40);
        }
        other => panic!("expected DescriptorTooLarge, got {:?}", other),
    }
    assert_eq!(q.failed_in(), Some(QueryStage::Parse));
}

#[test]
fn test_echoed_idn_mismatch() {
    let mut dev = SimulatedDevice::standard();
    dev.set_tamper(|rsp| rsp[13] = AttributeIdn::RefClkFreq as u8);
    let mut q = query(dev);

    match q.read_attribute(AttributeIdn::BootLunEn, 0, 0) {
        Err(UfsError::IdnMismatch { field, expected, got }) => {
            assert_eq!(field, "idn");
            assert_eq!(expected, AttributeIdn::BootLunEn as u8);
            assert_eq!(got, AttributeIdn::RefClkFreq as u8);
        }
        other => panic!("expected IdnMismatch, got {:?}", other),
    }
}

#[test]
fn test_truncated_response() {
    let mut dev = SimulatedDevice::new();
    dev.set_tamper(|rsp| rsp.truncate(UPIU_SIZE - 8));
    let mut q = query(dev);
    assert!(matches!(
        q.read_flag(FlagIdn::BkopsEn),
        Err(UfsError::TruncatedResponse { got: 24, need: 32 })
    ));
}

#[test]
fn test_device_nak() {
    let mut q = query(SimulatedDevice::standard());
    match q.write_attribute(AttributeIdn::BkopsStatus, 0, 0, 1) {
        Err(UfsError::QueryFailed { code }) => {
            let msg = ufs_query::error::decode_query_response(code);
            assert!(msg.contains("not writeable"));
        }
        other => panic!("expected QueryFailed, got {:?}", other),
    }
}

#[test]
fn test_missing_descriptor_nak() {
    let mut q = query(SimulatedDevice::new());
    assert!(matches!(
        q.read_descriptor(DescriptorKind::Power, 0, 0),
        Err(UfsError::QueryFailed { code: 0xFC })
    ));
}

// ============================================================================
// Transfer limits
// ============================================================================

#[test]
fn test_submit_over_limit_never_reaches_device() {
    let mut dev = SimulatedDevice::new();
    let cmd = vec![0u8; UPIU_SIZE];

    let result = dev.submit(&cmd, MAX_IOCTL_BUF_SIZE - UPIU_SIZE + 1);
    match result {
        Err(UfsError::BufferTooLarge { requested, limit }) => {
            assert_eq!(requested, 262145);
            assert_eq!(limit, 262144);
        }
        other => panic!("expected BufferTooLarge, got {:?}", other),
    }
    assert_eq!(dev.calls(), 0);
}

#[test]
fn test_raised_device_limit_still_capped() {
    let mut dev = SimulatedDevice::new().with_max_transfer(1 << 20);
    let mut cmd = vec![0u8; UPIU_SIZE];
    cmd[0] = 0x16;

    assert!(matches!(
        dev.submit(&cmd, MAX_IOCTL_BUF_SIZE),
        Err(UfsError::BufferTooLarge { requested: 262176, limit: 262144 })
    ));
    assert_eq!(dev.calls(), 0);
}

#[test]
fn test_orchestrator_respects_transport_limit() {
    let dev = SimulatedDevice::new().with_max_transfer(1024);
    let mut q = query(dev);

    let req = QueryRequest::read_descriptor(DescriptorKind::Rfu0, 0, 0, 2048).with_size_override(2048);
    assert!(matches!(
        q.execute(&req),
        Err(UfsError::BufferTooLarge { requested: 2112, limit: 1024 })
    ));
    assert_eq!(q.failed_in(), Some(QueryStage::Submit));
    assert_eq!(q.transport().calls(), 0);
}

// ============================================================================
// Reserved idn policy
// ============================================================================

#[test]
fn test_reserved_idns_pass_through_by_default() {
    let mut q = query(SimulatedDevice::new());
    assert!(!q.read_flag(FlagIdn::Reserved4).unwrap());
    assert_eq!(q.read_attribute(AttributeIdn::Obsolete, 0, 0).unwrap(), 0);

    let mut dev_rfu = SimulatedDevice::new();
    dev_rfu.set_descriptor(DescriptorKind::Rfu3, 0, 0, vec![0x04, 0x0A, 0x00, 0x00]);
    let mut q = query(dev_rfu);
    let data = q.read_descriptor_len(DescriptorKind::Rfu3, 0, 0, 4).unwrap();
    assert_eq!(data, vec![0x04, 0x0A, 0x00, 0x00]);
}

#[test]
fn test_reserved_idns_rejected_when_configured() {
    init_logging();
    let config = QueryConfig::builder()
        .reserved_policy(ReservedPolicy::Reject)
        .build()
        .unwrap();
    let mut q = UfsQuery::with_config(SimulatedDevice::new(), &config).with_logger(Arc::new(NopLogger));

    assert!(matches!(
        q.read_flag(FlagIdn::Reserved1),
        Err(UfsError::InvalidRequestShape(_))
    ));
    assert!(matches!(
        q.read_attribute(AttributeIdn::Reserved3, 0, 0),
        Err(UfsError::InvalidRequestShape(_))
    ));
    assert!(matches!(
        q.read_descriptor_len(DescriptorKind::Rfu0, 0, 0, 8),
        Err(UfsError::UnknownDescriptorKind(0x3))
    ));
    assert_eq!(q.transport().calls(), 0);

    // Defined idns and NOP are unaffected
    assert!(!q.read_flag(FlagIdn::DeviceInit).unwrap());
    q.nop().unwrap();
}

#[test]
fn test_rfu_descriptor_read_without_size_fails() {
    let mut q = query(SimulatedDevice::new());
    assert!(matches!(
        q.read_descriptor(DescriptorKind::Rfu1, 0, 0),
        Err(UfsError::UnknownDescriptorKind(0x6))
    ));
}

// ============================================================================
// Independent handles
// ============================================================================

#[test]
fn test_devices_do_not_share_state() {
    let mut a = query(SimulatedDevice::new());
    let mut b = query(SimulatedDevice::new());

    a.set_flag(FlagIdn::PurgeEnable).unwrap();
    a.write_attribute(AttributeIdn::ActiveIccLevel, 0, 0, 7).unwrap();

    assert!(!b.read_flag(FlagIdn::PurgeEnable).unwrap());
    assert_eq!(b.read_attribute(AttributeIdn::ActiveIccLevel, 0, 0).unwrap(), 0);
    assert_eq!(a.transport().calls(), 2);
    assert_eq!(b.transport().calls(), 2);
}

#[test]
fn test_devices_on_separate_threads() {
    let handles: Vec<_> = (0..4u32)
        .map(|n| {
            std::thread::spawn(move || {
                let mut q = UfsQuery::new(SimulatedDevice::new()).with_logger(Arc::new(NopLogger));
                q.write_attribute(AttributeIdn::SecondsPassed, 0, 0, n).unwrap();
                q.read_attribute(AttributeIdn::SecondsPassed, 0, 0).unwrap()
            })
        })
        .collect();

    for (n, h) in handles.into_iter().enumerate() {
        assert_eq!(h.join().unwrap(), n as u32);
    }
}

#[test]
fn test_encoded_request_bytes() {
    let mut q = query(SimulatedDevice::new());
    q.write_attribute(AttributeIdn::EeControl, 2, 1, 0x0102_0304).unwrap();

    let sent = &q.transport().requests()[0];
    assert_eq!(sent.len(), UPIU_SIZE);
    assert_eq!(sent[0], 0x16);
    assert_eq!(sent[1], flags::WRITE);
    assert_eq!(sent[5], 0x81);
    assert_eq!(&sent[12..16], &[0x04, 0x0D, 0x02, 0x01]);
    assert_eq!(&sent[20..24], &[0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn test_loggers_from_crate_root() {
    init_logging();
    let mut quiet = UfsQuery::new(SimulatedDevice::standard()).with_logger(Arc::new(ufs_query::NopLogger));
    let mut loud = UfsQuery::new(SimulatedDevice::standard()).with_logger(Arc::new(ufs_query::GlobalLogger));

    assert_eq!(quiet.read_attribute(AttributeIdn::BootLunEn, 0, 0).unwrap(), 1);
    assert_eq!(loud.read_attribute(AttributeIdn::BootLunEn, 0, 0).unwrap(), 1);
}
