//! Device transport over the bsg SG_IO ioctl
//!
//! The transport moves an encoded Query UPIU (plus any descriptor payload)
//! to the device and returns the response UPIU followed by any descriptor
//! data the device sent back.

use crate::config::QueryConfig;
use crate::error::{UfsError, UfsResult};
use crate::upiu::{transaction, UPIU_SIZE};
use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Sector size used when transfer lengths are expressed in blocks
pub const BLOCK_SIZE: usize = 512;

/// Largest exchange this library hands to the kernel.
///
/// Hardware usually accepts 512 KiB per chunk; 256 KiB keeps a margin.
pub const MAX_IOCTL_BUF_SIZE: usize = 256 * 1024;

/// Number of 512-byte sectors needed to hold `bytes`
pub fn bytes_to_blocks(bytes: usize) -> usize {
    bytes.div_ceil(BLOCK_SIZE)
}

/// Fail with `BufferTooLarge` unless request plus response fit in `limit`
pub fn check_transfer_size(cmd_len: usize, expect_response_len: usize, limit: usize) -> UfsResult<()> {
    let requested = cmd_len.saturating_add(expect_response_len);
    if requested > limit {
        log::debug!(
            "Rejecting {} byte transfer ({} sectors), limit {}",
            requested,
            bytes_to_blocks(requested),
            limit
        );
        return Err(UfsError::BufferTooLarge { requested, limit });
    }
    Ok(())
}

/// Owned byte buffer bounded by [`MAX_IOCTL_BUF_SIZE`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBuffer {
    data: Vec<u8>,
}

impl TransferBuffer {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> UfsResult<Self> {
        if len > MAX_IOCTL_BUF_SIZE {
            return Err(UfsError::BufferTooLarge {
                requested: len,
                limit: MAX_IOCTL_BUF_SIZE,
            });
        }
        Ok(TransferBuffer { data: vec![0u8; len] })
    }

    pub fn from_vec(data: Vec<u8>) -> UfsResult<Self> {
        if data.len() > MAX_IOCTL_BUF_SIZE {
            return Err(UfsError::BufferTooLarge {
                requested: data.len(),
                limit: MAX_IOCTL_BUF_SIZE,
            });
        }
        Ok(TransferBuffer { data })
    }

    /// Shrink to the number of bytes actually transferred
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Deref for TransferBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for TransferBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A channel that can carry one Query UPIU exchange at a time
///
/// Implementors provide [`UfsTransport::transfer`]; callers use
/// [`UfsTransport::submit`], which enforces the transfer limit first.
pub trait UfsTransport {
    /// Perform one blocking exchange.
    ///
    /// `cmd` is the request UPIU followed by any data-out bytes. The result
    /// is the response UPIU followed by the data-in bytes the device sent.
    fn transfer(&mut self, cmd: &[u8], expect_response_len: usize) -> UfsResult<TransferBuffer>;

    /// Byte limit for request plus response; never raises the
    /// [`MAX_IOCTL_BUF_SIZE`] cap, which `submit` applies regardless
    fn max_transfer(&self) -> usize {
        MAX_IOCTL_BUF_SIZE
    }

    /// Submit a request, checking the size bound before touching the device
    fn submit(&mut self, cmd: &[u8], expect_response_len: usize) -> UfsResult<TransferBuffer> {
        let limit = self.max_transfer().min(MAX_IOCTL_BUF_SIZE);
        check_transfer_size(cmd.len(), expect_response_len, limit)?;

        let rsp = self.transfer(cmd, expect_response_len)?;
        if rsp.len() > expect_response_len {
            return Err(UfsError::TransportError {
                status: 0,
                detail: format!(
                    "device returned {} bytes, expected at most {}",
                    rsp.len(),
                    expect_response_len
                ),
            });
        }
        Ok(rsp)
    }
}

// ============================================================================
// Linux bsg interface
// ============================================================================

/// SG_IO ioctl request number
const SG_IO: libc::c_ulong = 0x2285;

const BSG_PROTOCOL_SCSI: u32 = 0;
const BSG_SUB_PROTOCOL_SCSI_TRANSPORT: u32 = 2;

/// `struct sg_io_v4` from <linux/bsg.h>
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Default)]
struct SgIoV4 {
    guard: i32,
    protocol: u32,
    subprotocol: u32,
    request_len: u32,
    request: u64,
    request_tag: u64,
    request_attr: u32,
    request_priority: u32,
    request_extra: u32,
    max_response_len: u32,
    response: u64,
    dout_iovec_count: u32,
    dout_xfer_len: u32,
    din_iovec_count: u32,
    din_xfer_len: u32,
    dout_xferp: u64,
    din_xferp: u64,
    timeout: u32,
    flags: u32,
    usr_ptr: u64,
    spare_in: u32,
    driver_status: u32,
    transport_status: u32,
    device_status: u32,
    retry_delay: u32,
    info: u32,
    duration: u32,
    response_len: u32,
    din_resid: i32,
    dout_resid: i32,
    generated_tag: u64,
    spare_out: u32,
    padding: u32,
}

/// `struct ufs_bsg_request`: msgcode followed by the request UPIU
#[allow(dead_code)]
#[repr(C)]
struct UfsBsgRequest {
    msgcode: u32,
    upiu: [u8; UPIU_SIZE],
}

/// `struct ufs_bsg_reply`: result, payload length, response UPIU
#[allow(dead_code)]
#[repr(C)]
struct UfsBsgReply {
    result: i32,
    reply_payload_rcv_len: u32,
    upiu: [u8; UPIU_SIZE],
}

/// Data-in bytes the device actually sent.
///
/// bsg-lib reports `din_resid` as zero for these jobs, so the count comes
/// from the reply payload length ufs-bsg fills in, capped at the buffer.
fn din_received(reply: &UfsBsgReply, din_len: usize) -> usize {
    (reply.reply_payload_rcv_len as usize).min(din_len)
}

/// UFS bsg node, usually `/dev/bsg/ufs-bsg0`
pub struct BsgDevice {
    file: File,
    path: PathBuf,
    timeout_ms: u32,
    max_transfer: usize,
}

impl BsgDevice {
    /// Open the bsg node read/write
    ///
    /// # Errors
    ///
    /// Returns `UfsError::Io` if the node cannot be opened
    pub fn open<P: AsRef<Path>>(path: P, config: &QueryConfig) -> UfsResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        log::debug!("Opened UFS bsg device {}", path.display());

        Ok(BsgDevice {
            file,
            path,
            timeout_ms: config.timeout_ms,
            max_transfer: config.max_transfer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UfsTransport for BsgDevice {
    fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    fn transfer(&mut self, cmd: &[u8], expect_response_len: usize) -> UfsResult<TransferBuffer> {
        if cmd.len() < UPIU_SIZE || expect_response_len < UPIU_SIZE {
            return Err(UfsError::InvalidRequestShape(format!(
                "bsg exchange needs a {} byte UPIU each way",
                UPIU_SIZE
            )));
        }

        let mut request = UfsBsgRequest {
            msgcode: transaction::QUERY_REQ as u32,
            upiu: [0u8; UPIU_SIZE],
        };
        request.upiu.copy_from_slice(&cmd[..UPIU_SIZE]);
        let mut reply = UfsBsgReply {
            result: 0,
            reply_payload_rcv_len: 0,
            upiu: [0u8; UPIU_SIZE],
        };

        let dout = &cmd[UPIU_SIZE..];
        let mut din = TransferBuffer::zeroed(expect_response_len - UPIU_SIZE)?;

        let mut hdr = SgIoV4 {
            guard: 'Q' as i32,
            protocol: BSG_PROTOCOL_SCSI,
            subprotocol: BSG_SUB_PROTOCOL_SCSI_TRANSPORT,
            request_len: std::mem::size_of::<UfsBsgRequest>() as u32,
            request: &request as *const UfsBsgRequest as u64,
            max_response_len: std::mem::size_of::<UfsBsgReply>() as u32,
            response: &mut reply as *mut UfsBsgReply as u64,
            timeout: self.timeout_ms,
            ..Default::default()
        };
        if !dout.is_empty() {
            hdr.dout_xfer_len = dout.len() as u32;
            hdr.dout_xferp = dout.as_ptr() as u64;
        } else if !din.is_empty() {
            hdr.din_xfer_len = din.len() as u32;
            hdr.din_xferp = din.as_mut_ptr() as u64;
        }

        log::trace!(
            "SG_IO on {}: dout {} bytes, din {} bytes",
            self.path.display(),
            hdr.dout_xfer_len,
            hdr.din_xfer_len
        );

        // SAFETY: every pointer in `hdr` refers to a live buffer of the
        // advertised length that outlives this blocking call.
        let r = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, &mut hdr as *mut SgIoV4) };
        if r < 0 {
            let err = std::io::Error::last_os_error();
            log::debug!("{}: SG_IO ioctl failed: {}", self.path.display(), err);
            return Err(UfsError::TransportError {
                status: err.raw_os_error().unwrap_or(r),
                detail: format!("SG_IO ioctl failed: {}", err),
            });
        }

        if reply.result != 0 {
            return Err(UfsError::TransportError {
                status: reply.result,
                detail: format!(
                    "ufs-bsg reply result {} (driver 0x{:x}, transport 0x{:x}, device 0x{:x})",
                    reply.result, hdr.driver_status, hdr.transport_status, hdr.device_status
                ),
            });
        }

        let received = if hdr.din_xfer_len > 0 {
            din_received(&reply, din.len())
        } else {
            0
        };
        din.truncate(received);

        let mut rsp = Vec::with_capacity(UPIU_SIZE + received);
        rsp.extend_from_slice(&reply.upiu);
        rsp.extend_from_slice(&din);
        TransferBuffer::from_vec(rsp)
    }
}
