//! The wire format: byte-packed, little-endian, framed by the pipe's message
//! mode rather than by length prefixes.

use scroll::Pread;

/// What a client sends to register itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// The client's process id, verified against the pipe's actual peer.
    pub client_process_id: u32,
    /// Address of the client's published info block, in the client's
    /// address space.
    pub info_address: u64,
}

impl RegistrationRequest {
    /// Exact size on the wire; anything else is a protocol violation.
    pub const WIRE_SIZE: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.client_process_id.to_le_bytes());
        buf[4..12].copy_from_slice(&self.info_address.to_le_bytes());
        buf
    }

    /// Decodes one message. The message framing is the pipe's, so a short
    /// or long message means a confused or hostile client.
    pub fn read_from(bytes: &[u8]) -> Result<Self, scroll::Error> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(scroll::Error::BadInput {
                size: bytes.len(),
                msg: "registration request size mismatch",
            });
        }

        let mut offset = 0;
        Ok(Self {
            client_process_id: bytes.gread_with(&mut offset, scroll::LE)?,
            info_address: bytes.gread_with(&mut offset, scroll::LE)?,
        })
    }
}

/// What the server answers on success.
///
/// Both fields are event handles valid in the client process. A handle has
/// at most 32 significant bits even on 64-bit Windows; 64-bit clients must
/// sign-extend when widening back (the pseudo value -1 survives truncation
/// that way).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationResponse {
    /// Signal this event to request a dump.
    pub request_report_event: u32,
    /// This event signals when the requested dump is complete.
    pub report_complete_event: u32,
}

impl RegistrationResponse {
    pub const WIRE_SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.request_report_event.to_le_bytes());
        buf[4..8].copy_from_slice(&self.report_complete_event.to_le_bytes());
        buf
    }

    pub fn read_from(bytes: &[u8]) -> Result<Self, scroll::Error> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(scroll::Error::BadInput {
                size: bytes.len(),
                msg: "registration response size mismatch",
            });
        }

        let mut offset = 0;
        Ok(Self {
            request_report_event: bytes.gread_with(&mut offset, scroll::LE)?,
            report_complete_event: bytes.gread_with(&mut offset, scroll::LE)?,
        })
    }
}
