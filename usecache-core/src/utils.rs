use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix epoch milliseconds.
///
/// A clock set before the epoch reads as zero.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Moves a key to the end of the order queue (marks it most recently used).
///
/// Keys that are not in the queue are left alone.
///
/// # Examples
///
/// ```
/// use std::collections::VecDeque;
/// use usecache_core::utils::move_key_to_end;
///
/// let mut order = VecDeque::from(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
/// move_key_to_end(&mut order, "a");
/// assert_eq!(order.back().unwrap(), "a");
///
/// move_key_to_end(&mut order, "zzz");
/// assert_eq!(order.len(), 3);
/// ```
pub fn move_key_to_end(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
        order.push_back(key.to_string());
    }
}

/// Removes a key from the order queue, returning whether it was present.
pub fn remove_key_from_order(order: &mut VecDeque<String>, key: &str) -> bool {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
        true
    } else {
        false
    }
}
