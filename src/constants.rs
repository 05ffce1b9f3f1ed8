//! Shared constants for topic segment sizing and default allocator dimensions.

/// Number of domain columns a topic segment can hold. Fixed by the width of
/// the `availability` bitmask and the row lock word (both 32 bits).
pub const DOMAINS_PER_TOPIC: usize = 32;

/// Prefix for the named shared-memory object backing a topic segment.
/// The full name is `{SEGMENT_NAME_PREFIX}{topic-with-slashes-replaced-by-dots}`.
pub const SEGMENT_NAME_PREFIX: &str = "/domainmq.";

/// Default slot size (bytes) for the host ring allocator the core constructs
/// when an endpoint supplies none.
pub const DEFAULT_ALLOC_SLOT_SIZE: usize = 4096;

/// Default slot count for that same fallback allocator.
pub const DEFAULT_ALLOC_SLOT_COUNT: usize = 200;

/// Maximum value of `pub_count`/`sub_count` before registration is rejected.
pub const MAX_ENDPOINT_COUNT: u16 = u16::MAX;

/// System page size, used to round up initial segment truncation sizes.
pub const PAGE_SIZE: usize = 4096;
