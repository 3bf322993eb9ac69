use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use vigil_adapter_notification::telegram::parse_ack_callback;
use vigil_application::DeliveryReport;
use vigil_domain::{
    Acknowledger, Alert, AlertId, ChartSeries, GroupId, RecipientId, StatusOverview,
    StatusRecord, Subscription, TimeRange, ValidatorId,
};

use super::AppState;
use super::error::{ApiError, ApiResult};

const DEFAULT_SPAN_SECS: i64 = 24 * 3_600;
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Missing ends default to the last 24 hours.
fn resolve_range(from: Option<i64>, to: Option<i64>, now: i64) -> TimeRange {
    let to = to.unwrap_or(now);
    let from = from.unwrap_or_else(|| to.saturating_sub(DEFAULT_SPAN_SECS));
    TimeRange::new(from, to)
}

#[derive(Debug, Deserialize)]
pub struct ChartParams {
    #[serde(default)]
    pub validators: String,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub group_id: Option<GroupId>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub by: RecipientId,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackFrom {
    pub id: RecipientId,
    #[serde(default)]
    pub username: Option<String>,
}

/// Inline-button callback as delivered by the chat platform.
#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub data: String,
    pub from: CallbackFrom,
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub validator_id: ValidatorId,
    pub recipient_id: RecipientId,
    pub changed: bool,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

fn parse_validators(raw: &str) -> Vec<ValidatorId> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn chart(
    State(state): State<AppState>,
    Query(params): Query<ChartParams>,
) -> ApiResult<Json<Vec<ChartSeries>>> {
    let validators = parse_validators(&params.validators);
    if validators.is_empty() {
        return Err(ApiError::BadRequest("validators is required".into()));
    }
    let range = resolve_range(params.from, params.to, state.clock.unix_now());
    Ok(Json(state.query.chart_series(&validators, range).await?))
}

pub async fn validator_statuses(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> ApiResult<Json<StatusOverview>> {
    let range = resolve_range(params.from, params.to, state.clock.unix_now());
    Ok(Json(
        state.query.status_overview(range, params.group_id).await?,
    ))
}

pub async fn status_history(
    State(state): State<AppState>,
    Path(validator_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<StatusRecord>>> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(
        state.query.status_history(&validator_id, limit).await?,
    ))
}

pub async fn acknowledge(
    State(state): State<AppState>,
    Path(alert_id): Path<AlertId>,
    Json(request): Json<AckRequest>,
) -> ApiResult<Json<Alert>> {
    let by = Acknowledger {
        id: request.by,
        username: request.username,
    };
    Ok(Json(state.tracker.acknowledge(alert_id, by).await?))
}

pub async fn ack_callback(
    State(state): State<AppState>,
    Json(request): Json<CallbackRequest>,
) -> ApiResult<Json<Alert>> {
    let alert_id = parse_ack_callback(&request.data)
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported callback: {}", request.data)))?;
    let by = Acknowledger {
        id: request.from.id,
        username: request.from.username,
    };
    Ok(Json(state.tracker.acknowledge(alert_id, by).await?))
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<Subscription>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let changed = state
        .dispatcher
        .subscribe(&request.validator_id, request.recipient_id)
        .await?;
    Ok(Json(SubscriptionResponse {
        validator_id: request.validator_id,
        recipient_id: request.recipient_id,
        changed,
    }))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(request): Json<Subscription>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let changed = state
        .dispatcher
        .unsubscribe(&request.validator_id, request.recipient_id)
        .await?;
    Ok(Json(SubscriptionResponse {
        validator_id: request.validator_id,
        recipient_id: request.recipient_id,
        changed,
    }))
}

pub async fn announce(
    State(state): State<AppState>,
    Json(request): Json<AnnouncementRequest>,
) -> ApiResult<Json<DeliveryReport>> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("announcement text is empty".into()));
    }
    let report = state
        .dispatcher
        .announce(&request.text)
        .await
        .map_err(vigil_application::ServiceError::from)?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validators_list_is_comma_separated() {
        assert_eq!(parse_validators(" a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_validators("").is_empty());
    }

    #[test]
    fn range_defaults_to_last_day() {
        assert_eq!(
            resolve_range(None, None, 100_000),
            TimeRange::new(100_000 - 86_400, 100_000)
        );
        assert_eq!(resolve_range(Some(10), None, 500), TimeRange::new(10, 500));
        assert_eq!(resolve_range(None, Some(90_000), 500), TimeRange::new(3_600, 90_000));
    }

    #[test]
    fn default_start_saturates_at_the_earliest_timestamp() {
        assert_eq!(
            resolve_range(None, Some(i64::MIN), 500),
            TimeRange::new(i64::MIN, i64::MIN)
        );
    }
}
