use serde::Deserialize;

/// Order in which the in-memory backend drops entries once it is full.
///
/// # Variants
///
/// * `FIFO` - the oldest stored entry goes first; hits do not reorder
/// * `LRU` - the least recently read entry goes first (default)
///
/// # Examples
///
/// ```
/// use usecache_core::EvictionPolicy;
///
/// let policy: EvictionPolicy = "fifo".into();
/// assert_eq!(policy, EvictionPolicy::FIFO);
///
/// let unknown: EvictionPolicy = "random".into();
/// assert_eq!(unknown, EvictionPolicy::LRU);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum EvictionPolicy {
    FIFO,
    #[default]
    LRU,
}

impl EvictionPolicy {
    /// Whether a hit moves the key to the back of the eviction order.
    pub fn reorders_on_hit(self) -> bool {
        match self {
            EvictionPolicy::FIFO => false,
            EvictionPolicy::LRU => true,
        }
    }
}

/// Case-insensitive; unrecognized values fall back to LRU.
impl From<&str> for EvictionPolicy {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fifo" => EvictionPolicy::FIFO,
            _ => EvictionPolicy::LRU,
        }
    }
}

impl From<String> for EvictionPolicy {
    fn from(s: String) -> Self {
        EvictionPolicy::from(s.as_str())
    }
}
