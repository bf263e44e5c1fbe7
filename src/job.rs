//! Work units and Equihash block-header assembly.
//!
//! A [`WorkUnit`] is everything a solver needs to search: the assembled
//! header prefix from `mining.notify`, the pool-fixed left part of the
//! nonce from the subscribe response, and the share target. The byte-order
//! rules live here so the rest of the crate deals in plain bytes.

/// Maximum pool-fixed nonce prefix the solver can work with.
///
/// The 32-byte nonce is nonce_left || 3 search bytes || zero padding, and
/// the solver requires the last 12 bytes to be zero, leaving at most
/// 32 - 12 - 3 = 17 bytes for the pool.
pub const MAX_NONCE_LEFT_BYTES: usize = 17;

/// Assembled header prefix length: version + prev + merkle + reserved +
/// ntime + nbits.
pub const HEADER_PREFIX_BYTES: usize = 4 + 32 + 32 + 32 + 4 + 4;

/// One in-flight mining job, dispatched to every live solver.
///
/// Replaced wholesale when the pool sends `mining.notify` with
/// `clean_jobs` set; never mutated in place.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Opaque job identifier from the pool, echoed back in submits
    pub job_id: String,

    /// 108-byte header prefix (everything before the nonce)
    pub header: Vec<u8>,

    /// Pool-fixed high-order nonce bytes (1-17)
    pub nonce_left: Vec<u8>,

    /// Share target, little-endian byte order
    pub target: [u8; 32],
}

/// Assemble the 108-byte header prefix from the `mining.notify` fields.
///
/// All fields are concatenated in the byte order the pool supplied them;
/// no reversal happens here.
pub fn assemble_header(
    version: &[u8; 4],
    prev_block: &[u8; 32],
    merkle_root: &[u8; 32],
    reserved: &[u8; 32],
    ntime: &[u8; 4],
    nbits: &[u8; 4],
) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_PREFIX_BYTES);
    header.extend_from_slice(version);
    header.extend_from_slice(prev_block);
    header.extend_from_slice(merkle_root);
    header.extend_from_slice(reserved);
    header.extend_from_slice(ntime);
    header.extend_from_slice(nbits);
    debug_assert_eq!(header.len(), HEADER_PREFIX_BYTES);
    header
}

/// Decode a wire target into internal byte order.
///
/// The pool sends the target as 32 big-endian bytes in hex; the solver
/// compares hashes little-endian, so the bytes are reversed on the way in.
pub fn decode_target(hex_target: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hex_target).map_err(|e| format!("target hex: {e}"))?;
    let mut target: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("target wrong length: {}", b.len()))?;
    target.reverse();
    Ok(target)
}
