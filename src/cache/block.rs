/*!
A single cache-line slot (spec.md §3 "Cache block").
*/

/// One way of one set in a [`super::CacheLevel`]'s tag array.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheBlock {
    pub valid: bool,
    pub address: u64,
    pub dirty: bool,
    pub cpu: u8,
    pub prefetch: bool,
}

impl CacheBlock {
    pub fn empty() -> Self {
        Self::default()
    }
}
