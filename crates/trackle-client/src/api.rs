//! One operation per provider capability, all sharing the transport's
//! retry policy and the `{code, data: {accepted, rejected}}` envelope.

use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::ClientError;
use crate::transport::{ApiReply, Transport};

/// Provider-defined batch page size; callers chunk larger sets themselves.
pub const PAGE_SIZE: usize = 40;

/// One registration/query item. Absent fields are omitted from the wire
/// body, which the provider treats as "use defaults".
#[derive(Clone, Debug, Default, Serialize)]
pub struct TrackItem {
    pub number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

impl TrackItem {
    pub fn number(number: &str) -> Self {
        Self {
            number: number.to_owned(),
            ..Default::default()
        }
    }
}

/// One rejected batch item with its own error code and message. Rejections
/// never cause store mutations and are surfaced individually.
#[derive(Clone, Debug)]
pub struct Rejection {
    pub number: Option<String>,
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} {}",
            self.number.as_deref().unwrap_or("?"),
            self.code.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
            self.message.as_deref().unwrap_or(""),
        )
    }
}

/// Accepted/rejected split of one batch call.
#[derive(Clone, Debug, Default)]
pub struct BatchReply {
    pub accepted: Vec<Value>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug)]
pub struct TrackingClient {
    transport: Transport,
}

impl TrackingClient {
    /// Missing token is a configuration error, caught before any network
    /// activity.
    pub fn new(token: Option<SecretString>) -> Result<Self, ClientError> {
        let token = token.ok_or(ClientError::MissingToken)?;
        Ok(Self {
            transport: Transport::new(token)?,
        })
    }

    /// Test hook: point at a local server.
    pub fn with_base(token: SecretString, base: String) -> Result<Self, ClientError> {
        Ok(Self {
            transport: Transport::with_base(token, base)?,
        })
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn register(&self, items: &[TrackItem]) -> Result<BatchReply, ClientError> {
        self.batch_call("register", items).await
    }

    /// Batch status query; at most `PAGE_SIZE` items per call.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn get_track_info(&self, items: &[TrackItem]) -> Result<BatchReply, ClientError> {
        if items.len() > PAGE_SIZE {
            return Err(ClientError::InvalidRequest(format!(
                "batch of {} exceeds provider page size {PAGE_SIZE}",
                items.len()
            )));
        }
        self.batch_call("gettrackinfo", items).await
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn stop_track(&self, items: &[TrackItem]) -> Result<BatchReply, ClientError> {
        self.batch_call("stoptrack", items).await
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn retrack(&self, items: &[TrackItem]) -> Result<BatchReply, ClientError> {
        self.batch_call("retrack", items).await
    }

    /// Rename tag/remark for already-registered numbers.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn change_info(&self, items: &[TrackItem]) -> Result<BatchReply, ClientError> {
        self.batch_call("changeinfo", items).await
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn delete_track(&self, items: &[TrackItem]) -> Result<BatchReply, ClientError> {
        self.batch_call("deletetrack", items).await
    }

    /// Remaining API quota; the endpoint takes no body.
    #[instrument(skip(self))]
    pub async fn get_quota(&self) -> Result<Value, ClientError> {
        let reply = self.transport.post("getquota", None).await?;
        let body = check_reply(reply)?;
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn batch_call(&self, endpoint: &str, items: &[TrackItem]) -> Result<BatchReply, ClientError> {
        let body = serde_json::to_value(items)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let reply = self.transport.post(endpoint, Some(&body)).await?;
        parse_batch(reply)
    }
}

fn check_reply(reply: ApiReply) -> Result<Value, ClientError> {
    if !reply.is_success() {
        return Err(ClientError::Http {
            status: reply.status,
            body: reply.body.to_string(),
        });
    }
    let code = reply.body.get("code").and_then(Value::as_i64).unwrap_or(-1);
    if code != 0 {
        return Err(ClientError::Provider {
            code,
            detail: reply.body.to_string(),
        });
    }
    Ok(reply.body)
}

/// Split the `{code, data: {accepted, rejected}}` envelope.
pub fn parse_batch(reply: ApiReply) -> Result<BatchReply, ClientError> {
    let body = check_reply(reply)?;
    let data = body.get("data").cloned().unwrap_or(Value::Null);

    let accepted = match data.get("accepted") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    let rejected = match data.get("rejected") {
        Some(Value::Array(items)) => items.iter().map(parse_rejection).collect(),
        _ => Vec::new(),
    };

    Ok(BatchReply { accepted, rejected })
}

fn parse_rejection(item: &Value) -> Rejection {
    let error = item.get("error");
    Rejection {
        number: item
            .get("number")
            .and_then(Value::as_str)
            .map(str::to_owned),
        code: error.and_then(|e| e.get("code")).and_then(Value::as_i64),
        message: error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(status: u16, body: Value) -> ApiReply {
        ApiReply { status, body }
    }

    #[test]
    fn missing_token_is_fatal_before_network() {
        let err = TrackingClient::new(None).unwrap_err();
        assert!(matches!(err, ClientError::MissingToken));
    }

    #[test]
    fn item_serializes_without_absent_fields() {
        let wire = serde_json::to_value(TrackItem::number("RR1")).unwrap();
        assert_eq!(wire, json!({"number": "RR1"}));

        let full = TrackItem {
            number: "RR1".into(),
            carrier: Some(3011),
            lang: Some("en".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(full).unwrap(),
            json!({"number": "RR1", "carrier": 3011, "lang": "en"})
        );
    }

    #[tokio::test]
    async fn page_size_enforced() {
        let client =
            TrackingClient::with_base(secrecy::SecretString::from("t"), "http://unused".into())
                .unwrap();
        let items: Vec<TrackItem> = (0..41).map(|i| TrackItem::number(&format!("N{i}"))).collect();
        let err = client.get_track_info(&items).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[test]
    fn parse_batch_splits_accepted_rejected() {
        let body = json!({
            "code": 0,
            "data": {
                "accepted": [{"number": "RR1", "carrier": 3011}],
                "rejected": [{"number": "RR2", "error": {"code": -18019901, "message": "quota exceeded"}}]
            }
        });
        let batch = parse_batch(reply(200, body)).unwrap();
        assert_eq!(batch.accepted.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        let rejection = &batch.rejected[0];
        assert_eq!(rejection.number.as_deref(), Some("RR2"));
        assert_eq!(rejection.code, Some(-18019901));
        assert!(rejection.to_string().contains("quota exceeded"));
    }

    #[test]
    fn provider_code_nonzero_is_error() {
        let err = parse_batch(reply(200, json!({"code": 401, "data": null}))).unwrap_err();
        assert!(matches!(err, ClientError::Provider { code: 401, .. }));
    }

    #[test]
    fn http_failure_carries_last_observed_body() {
        let err = parse_batch(reply(401, json!({"code": 401}))).unwrap_err();
        match err {
            ClientError::Http { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("401"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_envelope_tolerated() {
        // No data object at all: empty batch rather than a parse error.
        let batch = parse_batch(reply(200, json!({"code": 0}))).unwrap();
        assert!(batch.accepted.is_empty());
        assert!(batch.rejected.is_empty());
    }
}
