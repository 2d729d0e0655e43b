//! Encoded payload buffers for the two transmission layouts.
//!
//! Fixed-length mode always sends an 82-byte data block (payload
//! zero-padded) followed by the configured parity. Variable-length mode
//! prefixes the payload with its length, protected by its own tiny
//! Reed-Solomon codeword so a receiver can commit to a length early,
//! then appends length-scaled parity.

use crate::error::Result;
use crate::params::ecc_len_for;
use crate::rs::ReedSolomon;
use crate::FIXED_PAYLOAD_LEN;

/// Fixed-mode buffer: `[82-byte padded payload][ecc_len parity]`
pub fn build_fixed(payload: &[u8], ecc_len: usize) -> Result<Vec<u8>> {
    let rs = ReedSolomon::new(FIXED_PAYLOAD_LEN, ecc_len)?;
    let mut block = vec![0u8; FIXED_PAYLOAD_LEN];
    block[..payload.len()].copy_from_slice(payload);
    rs.encode(&block)
}

/// Variable-mode buffer:
/// `[length byte][2 length parity][payload][ecc_len_for(L) parity]`
pub fn build_variable(payload: &[u8]) -> Result<Vec<u8>> {
    let len = payload.len();
    let rs_length = ReedSolomon::new(1, 2)?;
    let rs_data = ReedSolomon::new(len, ecc_len_for(len))?;

    let mut out = rs_length.encode(&[len as u8])?;
    out.extend_from_slice(&rs_data.encode(payload)?);
    Ok(out)
}
