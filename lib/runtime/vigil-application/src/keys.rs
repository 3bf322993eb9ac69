//! Cache key layout: `{query-type}:{entity-or-list}:{start}:{end}[:{group}]`.

use vigil_domain::{AlertId, GroupId, RecipientId, TimeRange};

pub const ALERT_COUNTER: &str = "alert_id";
pub const GLOBAL_SUBSCRIBERS: &str = "global_subscribers";
pub const SUBSCRIPTION_PREFIX: &str = "subscription:";

fn with_group(base: String, group_id: Option<GroupId>) -> String {
    match group_id {
        Some(group_id) => format!("{base}:{group_id}"),
        None => base,
    }
}

pub fn chart(validator_id: &str, range: TimeRange) -> String {
    format!("chart:{validator_id}:{}:{}", range.from, range.to)
}

pub fn validator_list(range: TimeRange) -> String {
    format!("validators:list:{}:{}", range.from, range.to)
}

pub fn grid(validator_id: &str, range: TimeRange, group_id: Option<GroupId>) -> String {
    with_group(
        format!("grid:{validator_id}:{}:{}", range.from, range.to),
        group_id,
    )
}

pub fn meta_list(range: TimeRange, group_id: Option<GroupId>) -> String {
    with_group(format!("meta:list:{}:{}", range.from, range.to), group_id)
}

pub fn status_history(validator_id: &str, limit: usize) -> String {
    format!("status_history:{validator_id}:{limit}")
}

pub fn validator_status(validator_id: &str) -> String {
    format!("validator_status:{validator_id}")
}

pub fn alert(id: AlertId) -> String {
    format!("alert:{id}")
}

pub fn subscription(validator_id: &str) -> String {
    format!("{SUBSCRIPTION_PREFIX}{validator_id}")
}

pub fn rate_limit(recipient: RecipientId, unix_minute: i64) -> String {
    format!("rate_limit:{recipient}:{unix_minute}")
}
