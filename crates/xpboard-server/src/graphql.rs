//! Query endpoint
//!
//! `POST /graphql` takes `{"operation": "...", "variables": {...}}` and answers
//! `{"data": {"<operation>": ...}}`. Every operation is scoped to the caller:
//! the resolver pins `userId` to the authenticated principal whatever the
//! caller put in `where`.

use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use xpboard_core::query::{self, Direction};
use xpboard_core::{
    Error, FilterSpec, OrderSpec, Predicate, Record, RecordRepository, Result, User,
};

use crate::AppState;
use crate::auth::Principal;
use crate::error::ApiError;

const DEFAULT_AGGREGATE_FIELD: &str = "amount";
const DEFAULT_CHART_LIMIT: i64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct OperationRequest {
    pub operation: String,
    #[serde(default)]
    pub variables: Value,
}

/// Arguments shared by the record operations
#[derive(Debug, Default)]
struct QueryArgs {
    filter: FilterSpec,
    order: Option<OrderSpec>,
    limit: Option<i64>,
}

impl QueryArgs {
    fn parse(variables: &Value, user_id: i64) -> Self {
        let mut filter = variables
            .get("where")
            .map(FilterSpec::from_json)
            .unwrap_or_default();
        filter.set("userId", Predicate::eq(user_id));

        Self {
            filter,
            order: variables.get("order_by").and_then(OrderSpec::from_json),
            limit: variables.get("limit").and_then(Value::as_i64),
        }
    }
}

/// Run one operation for `user`
pub async fn resolve(
    repository: &dyn RecordRepository,
    user: &User,
    request: &OperationRequest,
) -> Result<Value> {
    let vars = &request.variables;
    let args = QueryArgs::parse(vars, user.id);
    debug!(
        "Resolving '{}' for user {} with {:?}",
        request.operation, user.id, args
    );

    match request.operation.as_str() {
        "user" => Ok(serde_json::to_value(user)?),
        "transaction" => {
            let records = repository.transactions().await?;
            Ok(records_json(query::query(
                &records,
                Some(&args.filter),
                args.order.as_ref(),
                args.limit,
            )))
        }
        "progress" => {
            let records = repository.progress().await?;
            Ok(records_json(query::query(
                &records,
                Some(&args.filter),
                args.order.as_ref(),
                args.limit,
            )))
        }
        "transaction_aggregate" => {
            let field = vars
                .get("field")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_AGGREGATE_FIELD);
            let records = repository.transactions().await?;
            let totals = query::aggregate(&records, Some(&args.filter), field);

            let mut sum = Map::new();
            sum.insert(field.to_string(), json!(totals.sum));
            Ok(json!({ "aggregate": { "sum": sum, "count": totals.count } }))
        }
        "pass_fail" => {
            let records = repository.progress().await?;
            Ok(serde_json::to_value(query::pass_fail(
                &records,
                Some(&args.filter),
            ))?)
        }
        "xp_by_project" => {
            let records = repository.transactions().await?;
            let filter = args.filter.eq("type", "xp");
            let order = OrderSpec::new("createdAt", Direction::Desc);
            let limit = args.limit.unwrap_or(DEFAULT_CHART_LIMIT);
            Ok(records_json(query::query(
                &records,
                Some(&filter),
                Some(&order),
                Some(limit),
            )))
        }
        other => Err(Error::InvalidRequest(format!(
            "Unknown operation '{}'",
            other
        ))),
    }
}

fn records_json(records: Vec<Record>) -> Value {
    Value::Array(records.into_iter().map(Record::into_value).collect())
}

/// `POST /graphql`
pub async fn graphql_handler(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<OperationRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    // A token for a user that no longer exists is treated like a bad token
    let user = state
        .repository
        .user(principal.user_id)
        .await
        .map_err(|e| match e {
            Error::NotFound(_) => ApiError::Unauthenticated("Unknown user".to_string()),
            other => other.into(),
        })?;

    let result = resolve(state.repository.as_ref(), &user, &request).await?;

    let mut data = Map::new();
    data.insert(request.operation, result);
    Ok(Json(json!({ "data": data })))
}
