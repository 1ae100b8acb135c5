pub mod result_cache;

pub use result_cache::{
    CacheEntryStats, CacheOptions, CacheStats, ResultCache, ANALYSIS_TTL, DEFAULT_CAPACITY,
    DEFAULT_TTL, GRADING_TTL,
};
