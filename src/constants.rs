//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Job input constants
pub mod job {
    /// Smallest document a Job may request (characters)
    pub const MIN_TARGET_LENGTH: u32 = 2_000;
}

/// Source acquisition constants
pub mod sources {
    /// User-supplied text above this skips discovery search entirely
    pub const USER_BUDGET_THRESHOLD: usize = 200_000;

    /// Extracted text shorter than this is discarded (discovered sources only)
    pub const MIN_TEXT_CHARS: usize = 500;

    /// Character budget shared by every fetch of one scrape batch
    pub const BATCH_CHAR_BUDGET: usize = 600_000;

    /// Floor for a single fetch's share of the batch budget
    pub const MIN_FETCH_SHARE: usize = 8_000;

    /// Characters of each candidate shown to the selection prompt
    pub const PREVIEW_CHARS: usize = 20_000;

    /// Selection bounds
    pub const MIN_SELECTED: usize = 3;
    pub const MAX_SELECTED: usize = 8;

    /// Search query word cap
    pub const MAX_QUERY_WORDS: usize = 8;

    /// Only the head of a page is inspected for failure markers
    pub const FAILURE_MARKER_SCAN_CHARS: usize = 2_000;
}

/// Search service constants
pub mod search {
    /// Stop paging once this many results are collected
    pub const MIN_RESULTS: usize = 10;

    /// Never keep more results than this
    pub const MAX_RESULTS: usize = 15;

    /// Results requested per page
    pub const PAGE_SIZE: usize = 10;

    /// Maximum pages requested
    pub const MAX_PAGES: usize = 3;
}

/// Structure planning constants
pub mod planning {
    /// Below this length the writer improvises its own skeleton
    pub const PLAN_THRESHOLD: u32 = 10_000;

    /// Characters one writer is expected to produce
    pub const CHARS_PER_WRITER: u32 = 48_000;

    /// Hard cap on writers per Job
    pub const MAX_WRITERS: u32 = 7;

    /// One top-level section per this many characters
    pub const CHARS_PER_SECTION: u32 = 3_000;

    /// Lower bound on top-level sections
    pub const MIN_SECTIONS: u32 = 2;

    /// Subsections allowed under one top-level section
    pub const MAX_SUBSECTIONS: u32 = 4;
}

/// Synthesis and recovery constants
pub mod generation {
    /// Trailing context handed to the next writer or continuation
    pub const TAIL_WINDOW_CHARS: usize = 5_000;

    /// Continuation attempts per assignment
    pub const MAX_CONTINUATIONS: usize = 3;

    /// Characters per token used for ceiling estimates
    pub const CHARS_PER_TOKEN: f64 = 4.0;

    /// Headroom factor applied to the token estimate
    pub const TOKEN_HEADROOM: f64 = 1.85;

    /// Token ceiling bounds
    pub const MIN_OUTPUT_TOKENS: u32 = 1_024;
    pub const MAX_OUTPUT_TOKENS: u32 = 16_384;

    /// Planned and written headings match at or above this similarity
    pub const HEADING_SIMILARITY: f64 = 0.80;

    /// One embedded list per this many characters
    pub const CHARS_PER_LIST: u32 = 4_000;

    /// One embedded table per this many characters
    pub const CHARS_PER_TABLE: u32 = 10_000;

    /// Longest duplicated tail stripped from the head of a continuation
    pub const MAX_OVERLAP_CHARS: usize = 600;
}

/// Post-generation validation constants
pub mod validation {
    /// Tail of the document inspected for a complete final sentence
    pub const ENDING_WINDOW_CHARS: usize = 800;

    /// A link repair shorter than this fraction of the input is rejected
    pub const MIN_REPAIR_RATIO: f64 = 0.9;
}

/// Retry constants
pub mod retry {
    /// Retries per external call
    pub const MAX_RETRIES: usize = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;
}

/// HTTP/Network constants
pub mod network {
    /// Default LLM request timeout (seconds)
    pub const LLM_TIMEOUT_SECS: u64 = 300;

    /// Search request timeout (seconds)
    pub const SEARCH_TIMEOUT_SECS: u64 = 30;

    /// Scrape timeout for discovered sources (seconds)
    pub const DISCOVERED_SCRAPE_TIMEOUT_SECS: u64 = 30;

    /// Scrape timeout for user-supplied sources (seconds)
    pub const USER_SCRAPE_TIMEOUT_SECS: u64 = 120;

    /// Store write timeout (seconds)
    pub const STORE_TIMEOUT_SECS: u64 = 30;

    /// How long the CLI waits for pending notifications before exiting (seconds)
    pub const NOTIFY_DRAIN_SECS: u64 = 15;
}
