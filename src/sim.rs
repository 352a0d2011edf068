//! In-memory UFS device for tests and dry runs
//!
//! `SimulatedDevice` answers Query Requests from tables of flags,
//! attributes and descriptors, echoing the request fields the way a real
//! device does. A tamper hook lets tests corrupt responses.

use crate::desc::DescriptorKind;
use crate::error::{QueryResponseCode, UfsError, UfsResult};
use crate::idn::{AttributeIdn, FlagIdn, QueryOpcode};
use crate::transport::{TransferBuffer, UfsTransport, MAX_IOCTL_BUF_SIZE};
use crate::upiu::{transaction, UPIU_SIZE};
use byteorder::{BigEndian, ByteOrder};
use std::collections::{HashMap, HashSet};

type Tamper = Box<dyn FnMut(&mut Vec<u8>)>;

/// Simulated UFS device implementing [`UfsTransport`]
#[derive(Default)]
pub struct SimulatedDevice {
    flags: HashMap<u8, bool>,
    attributes: HashMap<(u8, u8, u8), u32>,
    read_only: HashSet<u8>,
    descriptors: HashMap<(u8, u8, u8), Vec<u8>>,
    tamper: Option<Tamper>,
    requests: Vec<Vec<u8>>,
    max_transfer: Option<usize>,
}

impl SimulatedDevice {
    /// Empty device; every flag and attribute reads as zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Device populated with a plausible set of descriptors and attributes
    pub fn standard() -> Self {
        let mut dev = Self::new();

        let mut device = vec![0u8; 0x40];
        device[0] = 0x40;
        device[1] = DescriptorKind::Device as u8;
        device[0x06] = 0x08; // bNumberLU
        device[0x10] = 0x01; // iManufacturerName
        dev.set_descriptor(DescriptorKind::Device, 0, 0, device);

        let mut geometry = vec![0u8; 0x48];
        geometry[0] = 0x48;
        geometry[1] = DescriptorKind::Geometry as u8;
        dev.set_descriptor(DescriptorKind::Geometry, 0, 0, geometry);

        let name = "SIMUFS";
        let mut string = vec![(2 + 2 * name.len()) as u8, DescriptorKind::String as u8];
        for unit in name.encode_utf16() {
            string.extend_from_slice(&unit.to_be_bytes());
        }
        dev.set_descriptor(DescriptorKind::String, 1, 0, string);

        dev.set_attribute(AttributeIdn::BootLunEn, 0, 0, 0x01);
        dev.set_attribute(AttributeIdn::PowerMode, 0, 0, 0x11);
        dev.set_attribute(AttributeIdn::RefClkFreq, 0, 0, 0x01);
        dev.read_only.insert(AttributeIdn::BkopsStatus as u8);
        dev.read_only.insert(AttributeIdn::PowerMode as u8);

        dev.set_flag(FlagIdn::DeviceInit, false);
        dev.set_flag(FlagIdn::BkopsEn, true);
        dev
    }

    pub fn set_flag(&mut self, idn: FlagIdn, value: bool) {
        self.flags.insert(idn as u8, value);
    }

    pub fn flag(&self, idn: FlagIdn) -> bool {
        self.flags.get(&(idn as u8)).copied().unwrap_or(false)
    }

    pub fn set_attribute(&mut self, idn: AttributeIdn, index: u8, selector: u8, value: u32) {
        self.attributes.insert((idn as u8, index, selector), value);
    }

    pub fn attribute(&self, idn: AttributeIdn, index: u8, selector: u8) -> u32 {
        self.attributes
            .get(&(idn as u8, index, selector))
            .copied()
            .unwrap_or(0)
    }

    /// Store raw descriptor bytes; no size check so tests can model bad devices
    pub fn set_descriptor(&mut self, kind: DescriptorKind, index: u8, selector: u8, data: Vec<u8>) {
        self.descriptors.insert((kind as u8, index, selector), data);
    }

    pub fn descriptor(&self, kind: DescriptorKind, index: u8, selector: u8) -> Option<&[u8]> {
        self.descriptors
            .get(&(kind as u8, index, selector))
            .map(|d| d.as_slice())
    }

    /// Lower the transfer limit below the ioctl maximum
    pub fn with_max_transfer(mut self, bytes: usize) -> Self {
        self.max_transfer = Some(bytes);
        self
    }

    /// Rewrite every response before it is returned
    pub fn set_tamper<F>(&mut self, f: F)
    where
        F: FnMut(&mut Vec<u8>) + 'static,
    {
        self.tamper = Some(Box::new(f));
    }

    /// Number of exchanges that reached the device
    pub fn calls(&self) -> usize {
        self.requests.len()
    }

    /// Raw bytes of every request received, oldest first
    pub fn requests(&self) -> &[Vec<u8>] {
        &self.requests
    }

    fn handle(&mut self, cmd: &[u8], din_capacity: usize) -> Vec<u8> {
        let opcode = cmd[12];
        let idn = cmd[13];
        let index = cmd[14];
        let selector = cmd[15];
        let length = BigEndian::read_u16(&cmd[18..20]) as usize;
        let value = BigEndian::read_u32(&cmd[20..24]);

        let Some(opcode) = QueryOpcode::from_u8(opcode) else {
            return reply(cmd, QueryResponseCode::InvalidOpcode, 0, 0, &[]);
        };

        match opcode {
            QueryOpcode::Nop => reply(cmd, QueryResponseCode::Success, 0, 0, &[]),
            QueryOpcode::ReadFlag
            | QueryOpcode::SetFlag
            | QueryOpcode::ClearFlag
            | QueryOpcode::ToggleFlag => {
                if FlagIdn::from_u8(idn).is_none() {
                    return reply(cmd, QueryResponseCode::InvalidIdn, 0, 0, &[]);
                }
                let current = self.flags.get(&idn).copied().unwrap_or(false);
                let next = match opcode {
                    QueryOpcode::SetFlag => true,
                    QueryOpcode::ClearFlag => false,
                    QueryOpcode::ToggleFlag => !current,
                    _ => current,
                };
                self.flags.insert(idn, next);
                reply(cmd, QueryResponseCode::Success, 0, next as u32, &[])
            }
            QueryOpcode::ReadAttr => {
                if AttributeIdn::from_u8(idn).is_none() {
                    return reply(cmd, QueryResponseCode::InvalidIdn, 0, 0, &[]);
                }
                let v = self
                    .attributes
                    .get(&(idn, index, selector))
                    .copied()
                    .unwrap_or(0);
                reply(cmd, QueryResponseCode::Success, 0, v, &[])
            }
            QueryOpcode::WriteAttr => {
                if AttributeIdn::from_u8(idn).is_none() {
                    return reply(cmd, QueryResponseCode::InvalidIdn, 0, 0, &[]);
                }
                if self.read_only.contains(&idn) {
                    return reply(cmd, QueryResponseCode::ParameterNotWriteable, 0, 0, &[]);
                }
                self.attributes.insert((idn, index, selector), value);
                reply(cmd, QueryResponseCode::Success, 0, value, &[])
            }
            QueryOpcode::ReadDesc => match self.descriptors.get(&(idn, index, selector)) {
                Some(data) => {
                    let n = data.len().min(length).min(din_capacity);
                    let data = data[..n].to_vec();
                    reply(cmd, QueryResponseCode::Success, n as u16, 0, &data)
                }
                None => reply(cmd, QueryResponseCode::InvalidIndex, 0, 0, &[]),
            },
            QueryOpcode::WriteDesc => {
                let data = &cmd[UPIU_SIZE..];
                if data.len() != length {
                    return reply(cmd, QueryResponseCode::InvalidLength, 0, 0, &[]);
                }
                self.descriptors.insert((idn, index, selector), data.to_vec());
                reply(cmd, QueryResponseCode::Success, length as u16, 0, &[])
            }
        }
    }
}

/// Build a Query Response echoing the request's transaction specific fields
fn reply(cmd: &[u8], code: QueryResponseCode, length: u16, value: u32, data: &[u8]) -> Vec<u8> {
    let mut rsp = vec![0u8; UPIU_SIZE + data.len()];
    rsp[0] = transaction::QUERY_RSP;
    rsp[3] = cmd[3];
    rsp[5] = cmd[5];
    rsp[6] = code as u8;
    BigEndian::write_u16(&mut rsp[10..12], data.len() as u16);
    rsp[12..16].copy_from_slice(&cmd[12..16]);
    BigEndian::write_u16(&mut rsp[18..20], length);
    BigEndian::write_u32(&mut rsp[20..24], value);
    rsp[UPIU_SIZE..].copy_from_slice(data);
    rsp
}

impl UfsTransport for SimulatedDevice {
    fn max_transfer(&self) -> usize {
        self.max_transfer.unwrap_or(MAX_IOCTL_BUF_SIZE)
    }

    fn transfer(&mut self, cmd: &[u8], expect_response_len: usize) -> UfsResult<TransferBuffer> {
        self.requests.push(cmd.to_vec());

        if cmd.len() < UPIU_SIZE || cmd[0] != transaction::QUERY_REQ {
            return Err(UfsError::TransportError {
                status: -libc::EINVAL,
                detail: "not a Query Request UPIU".to_string(),
            });
        }

        let din_capacity = expect_response_len.saturating_sub(UPIU_SIZE);
        let mut rsp = self.handle(cmd, din_capacity);
        if let Some(tamper) = self.tamper.as_mut() {
            tamper(&mut rsp);
        }
        TransferBuffer::from_vec(rsp)
    }
}
