//! Checked byte-decoding helpers shared by the protocol decoders.
//!
//! All reads are bounds-checked (including offset overflow) and return
//! `DecodeError::Malformed` on short buffers — a truncated account must
//! never panic the pipeline.

use dexstream_core::DecodeError;

pub fn read_u64_le(data: &[u8], offset: usize, decoder: &'static str) -> Result<u64, DecodeError> {
    let bytes: [u8; 8] = read_slice(data, offset, 8, decoder)?
        .try_into()
        .map_err(|_| short_buffer(decoder, data.len(), offset))?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn read_u128_le(
    data: &[u8],
    offset: usize,
    decoder: &'static str,
) -> Result<u128, DecodeError> {
    let bytes: [u8; 16] = read_slice(data, offset, 16, decoder)?
        .try_into()
        .map_err(|_| short_buffer(decoder, data.len(), offset))?;
    Ok(u128::from_le_bytes(bytes))
}

/// Read a 32-byte public key and render it base58.
pub fn read_pubkey(
    data: &[u8],
    offset: usize,
    decoder: &'static str,
) -> Result<String, DecodeError> {
    Ok(bs58::encode(read_slice(data, offset, 32, decoder)?).into_string())
}

fn read_slice<'a>(
    data: &'a [u8],
    offset: usize,
    len: usize,
    decoder: &'static str,
) -> Result<&'a [u8], DecodeError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| short_buffer(decoder, data.len(), offset))
}

fn short_buffer(decoder: &'static str, len: usize, offset: usize) -> DecodeError {
    DecodeError::malformed(decoder, format!("buffer of {len} bytes, read at {offset}"))
}
