/*
[INPUT]:  Best-to-worst price levels, sequence ids from book pushes
[OUTPUT]: Signed CRC-32 checksum, sequence/checksum verdicts
[POS]:    Book layer - pure integrity functions shared by all merge strategies
[UPDATE]: When the server changes its checksum string format or depth
*/

use crate::book::order_book::PriceLevel;
use crate::error::IntegrityError;

/// Default number of levels per side included in diff-book checksums
pub const DEFAULT_CHECKSUM_DEPTH: usize = 25;

const DELIMITER: char = ':';

/// Compute the book checksum over the top `depth` levels of each side.
///
/// Levels are interleaved `bid_px:bid_sz:ask_px:ask_sz:...` best first; when
/// one side runs out the other continues alone. Price and size strings are
/// used exactly as received.
pub fn checksum<'a, B, A>(bids: B, asks: A, depth: usize) -> i32
where
    B: IntoIterator<Item = &'a PriceLevel>,
    A: IntoIterator<Item = &'a PriceLevel>,
{
    crc32_signed(checksum_string(bids, asks, depth).as_bytes())
}

/// Build the string the checksum is computed over
pub fn checksum_string<'a, B, A>(bids: B, asks: A, depth: usize) -> String
where
    B: IntoIterator<Item = &'a PriceLevel>,
    A: IntoIterator<Item = &'a PriceLevel>,
{
    let mut bids = bids.into_iter().take(depth);
    let mut asks = asks.into_iter().take(depth);
    let mut out = String::new();

    loop {
        let bid = bids.next();
        let ask = asks.next();
        if bid.is_none() && ask.is_none() {
            break;
        }
        for level in [bid, ask].into_iter().flatten() {
            if !out.is_empty() {
                out.push(DELIMITER);
            }
            out.push_str(&level.price);
            out.push(DELIMITER);
            out.push_str(&level.size);
        }
    }

    out
}

/// Accept a delta iff it was computed against our current sequence id.
pub fn validate_sequence(current_seq_id: i64, incoming_prev_seq_id: i64) -> Result<(), IntegrityError> {
    if current_seq_id != incoming_prev_seq_id {
        return Err(IntegrityError::Sequence {
            expected: current_seq_id,
            received: incoming_prev_seq_id,
        });
    }
    Ok(())
}

pub fn verify_checksum(expected: i32, computed: i32) -> Result<(), IntegrityError> {
    if expected != computed {
        return Err(IntegrityError::Checksum { expected, computed });
    }
    Ok(())
}

fn crc32_signed(bytes: &[u8]) -> i32 {
    crc32fast::hash(bytes) as i32
}
