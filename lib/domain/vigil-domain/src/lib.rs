//! Domain models and invariants.

pub mod alert;
pub mod config;
pub mod group;
pub mod query;
pub mod sample;
pub mod status;
pub mod validator;

pub use alert::{Acknowledger, Alert, AlertId, RecipientId, Subscription};
pub use config::{
    BackfillConfig, CacheConfig, IngestionConfig, NotificationsConfig, RetryConfig, ServerConfig,
    StorageConfig, TrackingConfig, VigilConfig,
};
pub use group::{Group, GroupId, GroupInfo, GroupMember, ScoreboardRow};
pub use query::{
    AggregateRequest, BUCKETS_PER_RANGE, ChartPoint, ChartSeries, IntervalBucket, StatusGrid,
    StatusOverview, TimeRange, ValidatorMeta, bucket_series, round_to_minute,
};
pub use sample::{Sample, ValidityWindow};
pub use status::{StatusRecord, TrackedStatus, ValidatorStatus};
pub use validator::{ValidatorId, is_valid_address};
