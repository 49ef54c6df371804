pub mod gateway;
pub mod rate_limit;
pub mod retry;
pub mod source;

pub use gateway::{FetchGateway, FetchReport};
pub use rate_limit::{RateLimiterConfig, SourceRateLimiter};
pub use retry::{PolicyKind, RetryPolicies, RetryPolicy};
pub use source::MarketDataSource;
