use bytes::Bytes;

/// Estimates how much memory a stored value occupies.
///
/// Used by the in-memory backend to enforce `max_memory`. Implementations
/// should include heap allocations, not only the inline size.
///
/// # Examples
///
/// ```
/// use usecache_core::MemoryEstimator;
///
/// struct Fragment {
///     html: String,
/// }
///
/// impl MemoryEstimator for Fragment {
///     fn estimate_memory(&self) -> usize {
///         std::mem::size_of::<Self>() + self.html.capacity()
///     }
/// }
///
/// let fragment = Fragment { html: "<p>hi</p>".to_string() };
/// assert!(fragment.estimate_memory() >= 9);
/// ```
pub trait MemoryEstimator {
    /// The default only accounts for the inline size.
    fn estimate_memory(&self) -> usize {
        std::mem::size_of_val(self)
    }
}

impl MemoryEstimator for u64 {}
impl MemoryEstimator for bool {}

impl MemoryEstimator for String {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>() + self.capacity()
    }
}

impl MemoryEstimator for Bytes {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>() + self.len()
    }
}

impl<T> MemoryEstimator for Vec<T>
where
    T: MemoryEstimator,
{
    fn estimate_memory(&self) -> usize {
        let base = std::mem::size_of::<Self>();
        let elements: usize = self.iter().map(|item| item.estimate_memory()).sum();
        base + elements
    }
}

impl<T> MemoryEstimator for Option<T>
where
    T: MemoryEstimator,
{
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>()
            + match self {
                Some(val) => val.estimate_memory(),
                None => 0,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_memory() {
        let s = String::from("hello");
        let expected = std::mem::size_of::<String>() + s.capacity();
        assert_eq!(s.estimate_memory(), expected);
    }

    #[test]
    fn test_bytes_memory() {
        let b = Bytes::from_static(b"0123456789");
        assert_eq!(b.estimate_memory(), std::mem::size_of::<Bytes>() + 10);
    }

    #[test]
    fn test_vec_of_strings() {
        let tags = vec!["a".to_string(), "bb".to_string()];
        let expected = std::mem::size_of::<Vec<String>>()
            + tags.iter().map(|t| t.estimate_memory()).sum::<usize>();
        assert_eq!(tags.estimate_memory(), expected);
    }

    #[test]
    fn test_option_memory() {
        let none: Option<u64> = None;
        assert_eq!(none.estimate_memory(), std::mem::size_of::<Option<u64>>());
        assert!(Some(1u64).estimate_memory() > std::mem::size_of::<Option<u64>>());
    }
}
