//! Minimal S7 client over ISO-on-TCP (RFC 1006).
//!
//! Only what acquisition needs: COTP connection with rack/slot TSAPs, PDU
//! length negotiation, and single-item "read var" requests against the
//! process image areas. Every frame is a TPKT (`03 00 <len>`) wrapping a
//! COTP header and, after connection, an S7 PDU.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::address::Area;
use crate::config::S7Config;
use crate::reader::{Controller, ReadError};

const TPKT_VERSION: u8 = 0x03;
const TPKT_HEADER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 4096;

const COTP_CONNECTION_REQUEST: u8 = 0xE0;
const COTP_CONNECTION_CONFIRM: u8 = 0xD0;
const COTP_DATA: [u8; 3] = [0x02, 0xF0, 0x80];

const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;
const FUNCTION_READ_VAR: u8 = 0x04;
const FUNCTION_SETUP_COMMUNICATION: u8 = 0xF0;

/// Offset of the S7 header inside a data frame (TPKT + COTP DT).
const S7_HEADER_OFFSET: usize = TPKT_HEADER_LEN + COTP_DATA.len();
/// Ack-data headers carry two extra error bytes.
const ACK_HEADER_LEN: usize = 12;
const JOB_HEADER_LEN: usize = 10;
/// Overhead of a single-item read response around the payload.
const READ_RESPONSE_OVERHEAD: usize = 18;

const REQUESTED_PDU_LENGTH: u16 = 480;
const RETURN_CODE_SUCCESS: u8 = 0xFF;

/// S7 client errors.
#[derive(Debug, Error)]
pub enum S7Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Controller rejected request: {0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,
}

impl From<S7Error> for ReadError {
    fn from(err: S7Error) -> Self {
        match err {
            S7Error::Io(e) => ReadError::Io(e),
            S7Error::NotConnected => ReadError::Disconnected,
            S7Error::Timeout(t) => ReadError::Timeout(t),
            S7Error::Protocol(msg) => ReadError::Protocol(msg),
            S7Error::Rejected(msg) => ReadError::Rejected(msg),
        }
    }
}

/// A connected S7 session.
pub struct S7Client {
    stream: Option<TcpStream>,
    pdu_length: u16,
    pdu_ref: u16,
    timeout: Duration,
}

impl S7Client {
    /// Open the TCP connection, the COTP connection and negotiate the PDU
    /// length. The whole handshake is bounded by the configured timeout.
    pub async fn connect(config: &S7Config) -> Result<Self, S7Error> {
        let timeout = config.timeout();

        let stream = tokio::time::timeout(
            timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| S7Error::Timeout(timeout))??;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream: Some(stream),
            pdu_length: REQUESTED_PDU_LENGTH,
            pdu_ref: 0,
            timeout,
        };

        let confirm = client
            .exchange(&connection_request(config.rack, config.slot))
            .await?;
        parse_connection_confirm(&confirm)?;

        let pdu_ref = client.next_pdu_ref();
        let response = client
            .exchange(&setup_communication_request(pdu_ref))
            .await?;
        client.pdu_length = parse_setup_communication(&response, pdu_ref)?;

        info!(
            host = %config.host,
            port = config.port,
            rack = config.rack,
            slot = config.slot,
            pdu_length = client.pdu_length,
            "Connected to S7 controller"
        );
        Ok(client)
    }

    /// Negotiated PDU length.
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Read `count` bytes of `area` starting at byte `start`.
    pub async fn read_area(&mut self, area: Area, start: u32, count: u16) -> Result<Vec<u8>, S7Error> {
        let max = usize::from(self.pdu_length).saturating_sub(READ_RESPONSE_OVERHEAD);
        if usize::from(count) > max {
            return Err(S7Error::Protocol(format!(
                "read of {count} bytes exceeds PDU payload of {max} bytes"
            )));
        }

        let pdu_ref = self.next_pdu_ref();
        let request = read_var_request(pdu_ref, area, start, count)?;
        let response = self.exchange(&request).await?;
        let data = match parse_read_var_response(&response, pdu_ref) {
            Ok(data) => data,
            Err(e @ S7Error::Protocol(_)) => {
                // Stale or malformed reply: the stream can no longer be trusted.
                self.stream = None;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        debug!(area = ?area, start, count, received = data.len(), "S7 read");
        Ok(data)
    }

    /// Shut the connection down. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("S7 connection closed");
        }
    }

    fn next_pdu_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    /// Send a frame and wait for the reply. A transport failure, timeout or
    /// unframeable reply drops the stream, so the client reports itself
    /// disconnected afterwards.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, S7Error> {
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(S7Error::NotConnected)?;

        let result = tokio::time::timeout(timeout, async {
            stream.write_all(request).await?;
            read_frame(stream).await
        })
        .await
        .unwrap_or(Err(S7Error::Timeout(timeout)));

        if matches!(
            result,
            Err(S7Error::Io(_) | S7Error::Timeout(_) | S7Error::Protocol(_))
        ) {
            self.stream = None;
        }
        result
    }
}

#[async_trait]
impl Controller for S7Client {
    async fn read_area(&mut self, area: Area, start: u32, count: u16) -> Result<Vec<u8>, ReadError> {
        S7Client::read_area(self, area, start, count)
            .await
            .map_err(ReadError::from)
    }

    fn is_connected(&self) -> bool {
        S7Client::is_connected(self)
    }

    async fn close(&mut self) {
        S7Client::close(self).await;
    }
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, S7Error> {
    let mut header = [0u8; TPKT_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    if header[0] != TPKT_VERSION {
        return Err(S7Error::Protocol(format!(
            "unexpected TPKT version {:#04x}",
            header[0]
        )));
    }

    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    if !(TPKT_HEADER_LEN + 3..=MAX_FRAME_LEN).contains(&len) {
        return Err(S7Error::Protocol(format!("invalid TPKT length {len}")));
    }

    let mut frame = vec![0u8; len];
    frame[..TPKT_HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut frame[TPKT_HEADER_LEN..]).await?;
    Ok(frame)
}

fn tpkt(payload: &[u8]) -> Vec<u8> {
    let len = (TPKT_HEADER_LEN + payload.len()) as u16;
    let mut frame = Vec::with_capacity(usize::from(len));
    frame.extend_from_slice(&[TPKT_VERSION, 0x00]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// COTP connection request. Local TSAP `01 00`, remote TSAP
/// `01 <rack*0x20 + slot>` (PG connection).
pub fn connection_request(rack: u8, slot: u8) -> Vec<u8> {
    let remote_tsap = rack.wrapping_mul(0x20).wrapping_add(slot);
    tpkt(&[
        0x11, // length of the COTP header that follows
        COTP_CONNECTION_REQUEST,
        0x00,
        0x00, // destination reference
        0x00,
        0x01, // source reference
        0x00, // class 0
        0xC0,
        0x01,
        0x0A, // TPDU size 1024
        0xC1,
        0x02,
        0x01,
        0x00, // calling TSAP
        0xC2,
        0x02,
        0x01,
        remote_tsap, // called TSAP
    ])
}

pub fn parse_connection_confirm(frame: &[u8]) -> Result<(), S7Error> {
    match frame.get(TPKT_HEADER_LEN + 1) {
        Some(&COTP_CONNECTION_CONFIRM) => Ok(()),
        Some(other) => Err(S7Error::Protocol(format!(
            "expected COTP connection confirm, got {other:#04x}"
        ))),
        None => Err(S7Error::Protocol("truncated COTP confirm".to_string())),
    }
}

fn job(pdu_ref: u16, params: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(COTP_DATA.len() + JOB_HEADER_LEN + params.len());
    payload.extend_from_slice(&COTP_DATA);
    payload.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00]);
    payload.extend_from_slice(&pdu_ref.to_be_bytes());
    payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
    payload.extend_from_slice(&0u16.to_be_bytes());
    payload.extend_from_slice(params);
    tpkt(&payload)
}

pub fn setup_communication_request(pdu_ref: u16) -> Vec<u8> {
    let pdu = REQUESTED_PDU_LENGTH.to_be_bytes();
    job(
        pdu_ref,
        &[
            FUNCTION_SETUP_COMMUNICATION,
            0x00,
            0x00,
            0x01, // max AmQ calling
            0x00,
            0x01, // max AmQ called
            pdu[0],
            pdu[1],
        ],
    )
}

/// Single-item read of `count` bytes. The start address is a bit address
/// (`byte * 8`) on 24 bits.
pub fn read_var_request(pdu_ref: u16, area: Area, start: u32, count: u16) -> Result<Vec<u8>, S7Error> {
    let bit_address = start
        .checked_mul(8)
        .filter(|a| *a <= 0x00FF_FFFF)
        .ok_or_else(|| S7Error::Protocol(format!("byte offset {start} out of range")))?;
    let address = bit_address.to_be_bytes();
    let count = count.to_be_bytes();

    Ok(job(
        pdu_ref,
        &[
            FUNCTION_READ_VAR,
            0x01, // item count
            0x12, // variable specification
            0x0A, // length of the address specification
            0x10, // S7ANY
            0x02, // transport size BYTE
            count[0],
            count[1],
            0x00,
            0x00, // DB number
            area.s7_code(),
            address[1],
            address[2],
            address[3],
        ],
    ))
}

/// Validate an ack-data header and return the parameter and data sections.
fn ack_data(frame: &[u8], pdu_ref: u16) -> Result<(&[u8], &[u8]), S7Error> {
    let header = frame
        .get(S7_HEADER_OFFSET..S7_HEADER_OFFSET + ACK_HEADER_LEN)
        .ok_or_else(|| S7Error::Protocol("truncated S7 header".to_string()))?;

    if header[0] != S7_PROTOCOL_ID {
        return Err(S7Error::Protocol(format!(
            "unexpected protocol id {:#04x}",
            header[0]
        )));
    }
    if header[1] != ROSCTR_ACK_DATA {
        return Err(S7Error::Protocol(format!(
            "unexpected message type {:#04x}",
            header[1]
        )));
    }

    let reply_ref = u16::from_be_bytes([header[4], header[5]]);
    if reply_ref != pdu_ref {
        return Err(S7Error::Protocol(format!(
            "reply for PDU {reply_ref}, expected {pdu_ref}"
        )));
    }

    let (class, code) = (header[10], header[11]);
    if class != 0 || code != 0 {
        return Err(S7Error::Rejected(format!(
            "error class {class:#04x}, code {code:#04x}"
        )));
    }

    let param_len = usize::from(u16::from_be_bytes([header[6], header[7]]));
    let data_len = usize::from(u16::from_be_bytes([header[8], header[9]]));
    let params_start = S7_HEADER_OFFSET + ACK_HEADER_LEN;
    let data_start = params_start + param_len;

    let params = frame
        .get(params_start..data_start)
        .ok_or_else(|| S7Error::Protocol("truncated S7 parameters".to_string()))?;
    let data = frame
        .get(data_start..data_start + data_len)
        .ok_or_else(|| S7Error::Protocol("truncated S7 data".to_string()))?;
    Ok((params, data))
}

/// Returns the PDU length granted by the controller.
pub fn parse_setup_communication(frame: &[u8], pdu_ref: u16) -> Result<u16, S7Error> {
    let (params, _) = ack_data(frame, pdu_ref)?;
    match params {
        [FUNCTION_SETUP_COMMUNICATION, _, _, _, _, _, hi, lo, ..] => {
            let pdu_length = u16::from_be_bytes([*hi, *lo]);
            if usize::from(pdu_length) <= READ_RESPONSE_OVERHEAD {
                return Err(S7Error::Protocol(format!(
                    "negotiated PDU length {pdu_length} too small"
                )));
            }
            Ok(pdu_length)
        }
        _ => Err(S7Error::Protocol(
            "malformed setup communication reply".to_string(),
        )),
    }
}

/// Returns the bytes of the single read item.
pub fn parse_read_var_response(frame: &[u8], pdu_ref: u16) -> Result<Vec<u8>, S7Error> {
    let (params, data) = ack_data(frame, pdu_ref)?;

    match params {
        [FUNCTION_READ_VAR, 1, ..] => {}
        [FUNCTION_READ_VAR, n, ..] => {
            return Err(S7Error::Protocol(format!("expected 1 item, got {n}")));
        }
        _ => return Err(S7Error::Protocol("malformed read var reply".to_string())),
    }

    let [return_code, transport_size, len_hi, len_lo, payload @ ..] = data else {
        return Err(S7Error::Protocol("truncated read var item".to_string()));
    };

    if *return_code != RETURN_CODE_SUCCESS {
        return Err(S7Error::Rejected(return_code_text(*return_code).to_string()));
    }

    let length = usize::from(u16::from_be_bytes([*len_hi, *len_lo]));
    // BIT, BYTE/WORD/DWORD and INT report their length in bits.
    let byte_len = match transport_size {
        0x03..=0x05 => length.div_ceil(8),
        _ => length,
    };

    payload
        .get(..byte_len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| S7Error::Protocol("truncated read var payload".to_string()))
}

fn return_code_text(code: u8) -> &'static str {
    match code {
        0x01 => "hardware fault",
        0x03 => "access denied",
        0x05 => "address out of range",
        0x06 => "data type not supported",
        0x07 => "data type inconsistent",
        0x0A => "object does not exist",
        _ => "unknown item error",
    }
}
