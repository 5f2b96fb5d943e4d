//! [`StatementApi`] over the Redshift Data API.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_redshiftdata::types::{Field, StatusString};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::WarehouseConfig;
use crate::error::ExecutionError;
use crate::polling::{StatementApi, StatementStatus};
use crate::result::RawResultSet;

/// Data API client bound to one cluster, database and database user.
pub struct RedshiftDataApi {
    client: aws_sdk_redshiftdata::Client,
    cluster_id: String,
    database: String,
    db_user: String,
}

impl RedshiftDataApi {
    /// Load the default AWS credential chain for the configured region.
    pub async fn new(cfg: &WarehouseConfig) -> Result<Self, ExecutionError> {
        let db_user = cfg
            .db_user
            .clone()
            .ok_or_else(|| ExecutionError::Validation("REDSHIFT_DB_USER is not set".into()))?;

        let region = aws_sdk_redshiftdata::config::Region::new(cfg.region.clone());
        let aws_cfg = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;

        info!(
            region = %cfg.region,
            cluster = %cfg.cluster_id(),
            database = %cfg.database(),
            "Redshift Data API client initialised"
        );

        Ok(Self {
            client: aws_sdk_redshiftdata::Client::new(&aws_cfg),
            cluster_id: cfg.cluster_id().to_string(),
            database: cfg.database().to_string(),
            db_user,
        })
    }
}

#[async_trait]
impl StatementApi for RedshiftDataApi {
    async fn submit(&self, sql: &str) -> Result<String, ExecutionError> {
        let resp = self
            .client
            .execute_statement()
            .cluster_identifier(&self.cluster_id)
            .database(&self.database)
            .db_user(&self.db_user)
            .sql(sql)
            .send()
            .await
            .map_err(|e| ExecutionError::from_sdk("ExecuteStatement", e))?;

        resp.id()
            .map(str::to_string)
            .ok_or_else(|| ExecutionError::Backend("ExecuteStatement returned no statement id".into()))
    }

    async fn describe(&self, statement_id: &str) -> Result<StatementStatus, ExecutionError> {
        let resp = self
            .client
            .describe_statement()
            .id(statement_id)
            .send()
            .await
            .map_err(|e| ExecutionError::from_sdk("DescribeStatement", e))?;

        let status = match resp.status() {
            Some(StatusString::Submitted) | None => StatementStatus::Submitted,
            Some(StatusString::Picked) => StatementStatus::Picked,
            Some(StatusString::Started) => StatementStatus::Started,
            Some(StatusString::Finished) => StatementStatus::Finished {
                has_result_set: resp.has_result_set().unwrap_or(true),
            },
            Some(StatusString::Failed) => StatementStatus::Failed {
                error: resp.error().map(str::to_string),
            },
            Some(StatusString::Aborted) => StatementStatus::Aborted,
            Some(other) => StatementStatus::Unknown(other.as_str().to_string()),
        };
        Ok(status)
    }

    async fn fetch(&self, statement_id: &str) -> Result<RawResultSet, ExecutionError> {
        let mut result = RawResultSet::default();
        let mut next_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let resp = self
                .client
                .get_statement_result()
                .id(statement_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| ExecutionError::from_sdk("GetStatementResult", e))?;

            if pages == 0 {
                result.columns = resp
                    .column_metadata()
                    .iter()
                    .map(|c| c.name().unwrap_or_default().to_string())
                    .collect();
            }
            pages += 1;

            result
                .rows
                .extend(resp.records().iter().map(|record| record.iter().map(field_to_json).collect()));

            match resp.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(
            statement_id = %statement_id,
            pages,
            rows = result.rows.len(),
            "Collected Data API result pages"
        );

        Ok(result)
    }

    async fn cancel(&self, statement_id: &str) -> Result<(), ExecutionError> {
        self.client
            .cancel_statement()
            .id(statement_id)
            .send()
            .await
            .map_err(|e| ExecutionError::from_sdk("CancelStatement", e))?;
        Ok(())
    }
}

/// Map one Data API cell to JSON.
fn field_to_json(field: &Field) -> Value {
    match field {
        Field::StringValue(s) => Value::String(s.clone()),
        Field::LongValue(n) => Value::from(*n),
        Field::DoubleValue(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Field::BooleanValue(b) => Value::Bool(*b),
        Field::IsNull(_) => Value::Null,
        Field::BlobValue(blob) => Value::String(hex::encode(blob.as_ref())),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_redshiftdata::primitives::Blob;
    use serde_json::json;

    #[test]
    fn field_mapping() {
        assert_eq!(field_to_json(&Field::StringValue("abc".into())), json!("abc"));
        assert_eq!(field_to_json(&Field::LongValue(-42)), json!(-42));
        assert_eq!(field_to_json(&Field::DoubleValue(1.5)), json!(1.5));
        assert_eq!(field_to_json(&Field::DoubleValue(f64::NAN)), Value::Null);
        assert_eq!(field_to_json(&Field::BooleanValue(true)), json!(true));
        assert_eq!(field_to_json(&Field::IsNull(true)), Value::Null);
        assert_eq!(field_to_json(&Field::BlobValue(Blob::new(vec![0xde, 0xad]))), json!("dead"));
    }
}
