//! `X-Configuration-Tag` response header and `X-If-Configuration-Matches`
//! conditional-update request guard, the REST API's compare-and-swap
//! surface over `ConfigurationStore::set_if_matches`.

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::{self, Responder};
use rocket::serde::json::{json, Json, Value};

use crate::model::{ConfigTag, ConfigurationError};
use crate::store::ConfigStoreError;

const IF_MATCHES_HEADER: &str = "X-If-Configuration-Matches";
pub const TAG_HEADER: &str = "X-Configuration-Tag";

fn parse_tag(raw: &str) -> Option<ConfigTag> {
    let hex = raw.strip_prefix("tag-")?;
    let value = u64::from_str_radix(hex, 16).ok()?;
    Some(ConfigTag(value))
}

/// Extracted from `X-If-Configuration-Matches`. Absent when the caller sent
/// no header at all — callers that want unconditional writes (discouraged,
/// but not forbidden by spec.md) omit it rather than the API inventing a
/// wildcard value.
pub struct IfConfigurationMatches(pub Option<ConfigTag>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for IfConfigurationMatches {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request.headers().get_one(IF_MATCHES_HEADER) {
            None => Outcome::Success(IfConfigurationMatches(None)),
            Some(raw) => match parse_tag(raw) {
                Some(tag) => Outcome::Success(IfConfigurationMatches(Some(tag))),
                None => Outcome::Error((Status::BadRequest, ())),
            },
        }
    }
}

/// A JSON body tagged with the configuration tag it reflects, so the
/// response always carries `X-Configuration-Tag` alongside the payload.
pub struct Tagged {
    pub tag: ConfigTag,
    pub body: Value,
    pub status: Status,
}

impl Tagged {
    pub fn ok(tag: ConfigTag, body: Value) -> Self {
        Self {
            tag,
            body,
            status: Status::Ok,
        }
    }

    pub fn created(tag: ConfigTag, body: Value) -> Self {
        Self {
            tag,
            body,
            status: Status::Created,
        }
    }
}

impl<'r> Responder<'r, 'static> for Tagged {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let mut response = Json(self.body).respond_to(request)?;
        response.set_status(self.status);
        response.set_raw_header(TAG_HEADER, self.tag.to_string());
        Ok(response)
    }
}

/// Maps a `ConfigStoreError` onto the REST error-tuple convention:
/// `409 Conflict` for a stale tag (someone else's write landed first, retry
/// is plausible), everything else is `500`, matching
/// `apps::create::create_app`'s `(Status, Json<Value>)` shape verbatim.
pub fn store_error_response(error: ConfigStoreError) -> (Status, Json<Value>) {
    match error {
        ConfigStoreError::TagMismatch { expected, actual } => (
            Status::Conflict,
            Json(json!({
                "error": "configuration_tag_mismatch",
                "expected": expected.to_string(),
                "actual": actual.to_string(),
            })),
        ),
        other => (
            Status::InternalServerError,
            Json(json!({ "error": other.to_string() })),
        ),
    }
}

/// Maps a `ConfigurationError` onto the REST error-tuple convention: any
/// condition where the requested change conflicts with another dataset's
/// current state — an existing primary, an unexpired lease, a name already
/// in use — is `409 Conflict`, not `400`, since retrying with different
/// input wouldn't help; the request was fine, the cluster's current state
/// just disagrees with it.
pub fn configuration_error_response(error: ConfigurationError) -> (Status, Json<Value>) {
    let status = match error {
        ConfigurationError::AlreadyPrimaryElsewhere(..)
        | ConfigurationError::LeaseViolation(..)
        | ConfigurationError::DuplicateName(..) => Status::Conflict,
        ConfigurationError::DeletedWithManifestations(..) => Status::BadRequest,
    };
    (status, Json(json!({ "error": error.to_string() })))
}

/// `412 Precondition Failed`, used when the caller supplied
/// `X-If-Configuration-Matches` but it didn't match the store's current tag
/// before any mutation was even attempted.
pub fn precondition_failed(current: ConfigTag) -> (Status, Json<Value>) {
    (
        Status::PreconditionFailed,
        Json(json!({
            "error": "configuration_precondition_failed",
            "current": current.to_string(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tag_round_trips_display_format() {
        let tag = ConfigTag(42);
        let rendered = tag.to_string();
        assert_eq!(parse_tag(&rendered), Some(tag));
    }

    #[test]
    fn parse_tag_rejects_garbage() {
        assert_eq!(parse_tag("not-a-tag"), None);
    }

    #[test]
    fn configuration_error_response_maps_conflicts_to_409() {
        use crate::model::{DatasetId, NodeId};

        let (status, _) = configuration_error_response(ConfigurationError::AlreadyPrimaryElsewhere(
            DatasetId::new(),
            NodeId::new(),
        ));
        assert_eq!(status, Status::Conflict);

        let (status, _) =
            configuration_error_response(ConfigurationError::LeaseViolation(DatasetId::new(), NodeId::new()));
        assert_eq!(status, Status::Conflict);

        let (status, _) = configuration_error_response(ConfigurationError::DuplicateName("vol1".to_string()));
        assert_eq!(status, Status::Conflict);
    }

    #[test]
    fn configuration_error_response_maps_deleted_with_manifestations_to_400() {
        use crate::model::DatasetId;

        let (status, _) =
            configuration_error_response(ConfigurationError::DeletedWithManifestations(DatasetId::new()));
        assert_eq!(status, Status::BadRequest);
    }

    #[test]
    fn tagged_created_sets_status_created() {
        let tagged = Tagged::created(ConfigTag(1), json!({}));
        assert_eq!(tagged.status, Status::Created);
    }

    #[test]
    fn tagged_ok_sets_status_ok() {
        let tagged = Tagged::ok(ConfigTag(1), json!({}));
        assert_eq!(tagged.status, Status::Ok);
    }
}
