//! Key layout of the ordered store.
//!
//! Entry keys are zero-padded so lexicographic order equals index order.

pub const STATE_KEY: &str = "state";
pub const TERM_KEY: &str = "meta:term";
pub const APPLIED_KEY: &str = "meta:applied";

pub const ENTRY_PREFIX: &str = "entry:";
pub const CONTENT_PREFIX: &str = "content:";
pub const VIEW_PREFIX: &str = "view:";

pub fn entry_key(index: u64) -> String {
    format!("{}{:020}", ENTRY_PREFIX, index)
}

pub fn content_key(hash: &str) -> String {
    format!("{}{}", CONTENT_PREFIX, hash)
}

pub fn view_key(key: &str) -> String {
    format!("{}{}", VIEW_PREFIX, key)
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.to_string();
    match end.pop() {
        Some(last) => {
            let next = char::from_u32(last as u32 + 1).unwrap_or(char::MAX);
            end.push(next);
            end
        }
        None => String::from(char::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_keys_sort_by_index() {
        assert!(entry_key(9) < entry_key(10));
        assert!(entry_key(99) < entry_key(100_000));
    }

    #[test]
    fn test_prefix_end_bounds_prefix() {
        let end = prefix_end(ENTRY_PREFIX);
        assert!(entry_key(u64::MAX) < end);
        assert!(content_key("ff") < entry_key(0));
        assert!(view_key("k") > end);
    }
}
