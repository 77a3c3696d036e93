//! Overflow columns for values longer than the service's column limit.
//!
//! A long string column `form` is stored as `form`, `form2`, `form3`, …
//! with each piece at most `limit` UTF-16 code units, the unit the service
//! measures strings in. A surrogate pair is never split across pieces.
//! [`restore_overflow`] glues the pieces back together.

use crate::types::{Entity, EntityValue};

/// Longest string the service accepts in a single column, in UTF-16 units.
pub const TABLE_COLUMN_LENGTH_LIMIT: usize = 31_999;

/// Length of `s` as the service counts it.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Name of the `index`-th piece of `column` (0-based).
pub fn overflow_column_name(column: &str, index: usize) -> String {
    if index == 0 {
        column.to_string()
    } else {
        format!("{}{}", column, index + 1)
    }
}

/// Split long string columns into overflow columns.
///
/// `limit` of `None` or `0` falls back to [`TABLE_COLUMN_LENGTH_LIMIT`].
/// Columns that are missing, empty, non-string or within the limit are left
/// as they are. The input entity is not modified.
pub fn split_overflow<S: AsRef<str>>(item: &Entity, columns: &[S], limit: Option<usize>) -> Entity {
    let limit = limit.filter(|l| *l > 0).unwrap_or(TABLE_COLUMN_LENGTH_LIMIT);
    let mut out = item.clone();

    for column in columns {
        let column = column.as_ref();
        let Some(value) = item.get_str(column).filter(|v| !v.is_empty()) else {
            continue;
        };
        if utf16_len(value) <= limit {
            continue;
        }
        for (i, chunk) in split_utf16(value, limit).into_iter().enumerate() {
            out.set(overflow_column_name(column, i), chunk);
        }
    }

    out
}

/// Reassemble columns split by [`split_overflow`], removing the pieces.
///
/// Pieces are read in suffix order starting at `2` and stop at the first
/// missing or empty suffix. An empty piece marks the end and is removed.
pub fn restore_overflow<S: AsRef<str>>(mut item: Entity, columns: &[S]) -> Entity {
    for column in columns {
        let column = column.as_ref();
        let Some(mut value) = item.get_str(column).map(str::to_string) else {
            continue;
        };

        let mut suffix = 2;
        let mut restored = false;
        loop {
            let key = format!("{column}{suffix}");
            match item.get_str(&key) {
                Some(piece) if !piece.is_empty() => value.push_str(piece),
                Some(_) => {
                    item.remove(&key);
                    break;
                }
                None => break,
            }
            item.remove(&key);
            restored = true;
            suffix += 1;
        }

        if restored {
            item.set(column, EntityValue::String(value));
        }
    }
    item
}

/// Cut `value` into pieces of at most `limit` UTF-16 units. A piece is
/// closed before a char that would overflow it, so a limit of 1 still keeps
/// each astral char whole.
fn split_utf16(value: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut units = 0;
    for c in value.chars() {
        let width = c.len_utf16();
        if units + width > limit && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            units = 0;
        }
        current.push(c);
        units += width;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

// ─── Tests ──────────────────────────────────────────────────────────
