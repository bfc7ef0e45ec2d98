pub mod candidate_sanitizer;
pub mod pii_scrubber;
