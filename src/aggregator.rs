//! Redistributes the pool's flat output back onto the job's items.

use crate::error::BatchError;
use crate::state_machine::Item;

/// Splits `outputs` into per-item slices using each item's reference count.
///
/// Entries are consumed in order: the first `n0` belong to item 0, the next
/// `n1` to item 1, and so on. `None` entries stay in `Item::outputs` so the
/// positional invariant holds; [`Item::output_keys`] drops them.
///
/// A length mismatch is reported as a pool fault, since the pool promised one
/// entry per input.
pub fn aggregate(items: &mut [Item], outputs: Vec<Option<String>>) -> Result<(), BatchError> {
    let expected: usize = items.iter().map(|item| item.stored.len()).sum();
    if outputs.len() != expected {
        return Err(BatchError::PoolFault(format!(
            "expected {expected} transform results, got {}",
            outputs.len()
        )));
    }

    let mut outputs = outputs.into_iter();
    for item in items.iter_mut() {
        item.outputs = outputs.by_ref().take(item.stored.len()).collect();
    }
    Ok(())
}

/// Summary counts over aggregated items, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub items: usize,
    pub partial_items: usize,
    pub failed_references: usize,
}

pub fn tally(items: &[Item]) -> Tally {
    items.iter().fold(Tally::default(), |mut t, item| {
        t.items += 1;
        if item.is_partial() {
            t.partial_items += 1;
        }
        t.failed_references += item.outputs.iter().filter(|o| o.is_none()).count();
        t
    })
}
