//! Pure orderbook merge rules.
//!
//! `merge` never mutates its input: a failed merge leaves the caller's book
//! exactly as it was, which is how crossing updates get reverted.

use std::cmp::Ordering;

use agora_types::{AgoraError, BookLevel, Decimal, Orderbook, OrderbookUpdate, UpdateKind};

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    /// Book after the merge.
    pub book: Orderbook,
    /// False when the merge left both sides untouched.
    pub changed: bool,
}

#[derive(Clone, Copy)]
enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Ordering of `a` relative to `b` within this side.
    fn cmp(self, a: Decimal, b: Decimal) -> Ordering {
        match self {
            Self::Bid => b.cmp(&a),
            Self::Ask => a.cmp(&b),
        }
    }
}

fn check_amount(level: &BookLevel) -> Result<(), AgoraError> {
    if level.amount.is_sign_negative() || level.price.is_sign_negative() {
        return Err(AgoraError::Integrity(format!(
            "negative level {} @ {}",
            level.amount, level.price
        )));
    }
    Ok(())
}

/// Build one side of a snapshot: zero amounts dropped, sorted, last duplicate wins.
fn build_side(levels: &[BookLevel], side: Side) -> Result<Vec<BookLevel>, AgoraError> {
    let mut out: Vec<BookLevel> = Vec::with_capacity(levels.len());
    for level in levels {
        check_amount(level)?;
        apply_level(&mut out, level, side);
    }
    Ok(out)
}

/// Insert, replace or (for a zero amount) remove one level, keeping order.
fn apply_level(book_side: &mut Vec<BookLevel>, level: &BookLevel, side: Side) {
    match book_side.binary_search_by(|probe| side.cmp(probe.price, level.price)) {
        Ok(idx) if level.amount.is_zero() => {
            book_side.remove(idx);
        }
        Ok(idx) => book_side[idx] = level.clone(),
        Err(_) if level.amount.is_zero() => {}
        Err(idx) => book_side.insert(idx, level.clone()),
    }
}

/// Fail with `Integrity` when max-bid >= min-ask.
pub fn check_uncrossed(book: &Orderbook) -> Result<(), AgoraError> {
    if book.is_crossed() {
        let bid = book.best_bid().map(|l| l.price).unwrap_or_default();
        let ask = book.best_ask().map(|l| l.price).unwrap_or_default();
        return Err(AgoraError::Integrity(format!(
            "{} {} {}: bid {bid} >= ask {ask}",
            book.venue, book.asset_class, book.pair
        )));
    }
    Ok(())
}

/// Merge `update` into `book`.
///
/// Snapshots replace both sides and clear the stale flag. Deltas patch level
/// by level; an amount of zero removes the level. Any result violating
/// max-bid < min-ask is rejected with `Integrity`.
pub fn merge(book: &Orderbook, update: &OrderbookUpdate) -> Result<Merged, AgoraError> {
    let mut next = book.clone();
    match update.kind {
        UpdateKind::Snapshot => {
            next.bids = build_side(&update.bids, Side::Bid)?;
            next.asks = build_side(&update.asks, Side::Ask)?;
            next.stale = false;
        }
        UpdateKind::Delta => {
            for level in &update.bids {
                check_amount(level)?;
                apply_level(&mut next.bids, level, Side::Bid);
            }
            for level in &update.asks {
                check_amount(level)?;
                apply_level(&mut next.asks, level, Side::Ask);
            }
        }
    }
    check_uncrossed(&next)?;
    let changed = next.bids != book.bids || next.asks != book.asks || next.stale != book.stale;
    if changed {
        next.last_updated = update.last_updated.max(book.last_updated);
    }
    Ok(Merged {
        book: next,
        changed,
    })
}
