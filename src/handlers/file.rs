//! File record handlers.
//!
//! Endpoints mirror the record lifecycle: register a file and receive the
//! upload capability, look records up, request further capabilities, and
//! patch status/checksum/size. Presigned URLs are returned to the client
//! but never persisted.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::StoreError;
use crate::lifecycle::{ObjectStatus, Operation};
use crate::metadata::store::FileRecord;
use crate::AppState;

// -- Request / reply types -----------------------------------------------------

/// Tenant/device scope, required on create and filter reads.
#[derive(Debug, Deserialize, Validate)]
pub struct ScopeParams {
    /// Owning tenant.
    #[garde(length(min = 1))]
    pub tenant: String,
    /// Originating device.
    #[garde(length(min = 1))]
    pub device: String,
}

/// Body of a create request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateFileRequest {
    /// Client-visible file name.
    #[garde(length(min = 1))]
    pub name: String,
    /// Checksum of the content to be uploaded.
    #[serde(default)]
    #[garde(skip)]
    pub check_sum: String,
    /// Content size in bytes.
    #[serde(default)]
    #[garde(range(min = 0))]
    pub size: i64,
}

/// Body of an update (PATCH) request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateFileRequest {
    /// Target status code (`N/C/U/D/E`).
    #[schema(value_type = String)]
    pub status: ObjectStatus,
    /// Corrected checksum, if it changed in transit.
    #[serde(default)]
    pub check_sum: Option<String>,
    /// Corrected size, if it changed in transit.
    #[serde(default)]
    pub size: Option<i64>,
}

/// A record in a reply, with the freshly minted capability URL when one
/// was issued.
#[derive(Debug, Serialize)]
pub struct FileView {
    #[serde(flatten)]
    pub record: FileRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Reply envelope: success flag, record count, records.
#[derive(Debug, Serialize)]
pub struct FileReply {
    pub status: bool,
    pub count: usize,
    pub data: Vec<FileView>,
}

impl FileReply {
    fn one(record: FileRecord, url: Option<String>) -> Self {
        Self {
            status: true,
            count: 1,
            data: vec![FileView { record, url }],
        }
    }

    fn many(records: Vec<FileRecord>) -> Self {
        Self {
            status: true,
            count: records.len(),
            data: records
                .into_iter()
                .map(|record| FileView { record, url: None })
                .collect(),
        }
    }
}

fn validation_error(report: garde::Report) -> StoreError {
    StoreError::InvalidArgument {
        message: report.to_string(),
    }
}

// -- Handlers ------------------------------------------------------------------

/// `POST /files` -- Register a file and mint its upload capability.
#[utoipa::path(
    post,
    path = "/files",
    tag = "File",
    operation_id = "CreateFile",
    params(
        ("tenant" = String, Query, description = "Owning tenant"),
        ("device" = String, Query, description = "Originating device")
    ),
    responses(
        (status = 200, description = "Record created; reply carries the presigned PUT URL"),
        (status = 400, description = "Missing or invalid parameters"),
        (status = 502, description = "Storage backend unavailable")
    )
)]
pub async fn create_file(
    State(state): State<Arc<AppState>>,
    Query(scope): Query<ScopeParams>,
    Json(request): Json<CreateFileRequest>,
) -> Result<Json<FileReply>, StoreError> {
    scope.validate().map_err(validation_error)?;
    request.validate().map_err(validation_error)?;

    let (record, url) = state
        .controller
        .issue_create_capability(
            &scope.tenant,
            &scope.device,
            &request.name,
            &request.check_sum,
            request.size,
        )
        .await?;
    Ok(Json(FileReply::one(record, Some(url))))
}

/// `GET /files/{id}` -- Read one record.
#[utoipa::path(
    get,
    path = "/files/{id}",
    tag = "File",
    operation_id = "ReadFile",
    params(("id" = i64, Path, description = "Record id")),
    responses(
        (status = 200, description = "The record"),
        (status = 404, description = "No such record")
    )
)]
pub async fn read_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<FileReply>, StoreError> {
    let record = state.controller.read_file(id).await?;
    Ok(Json(FileReply::one(record, None)))
}

/// `GET /files` -- Read all records of a tenant/device pair.
#[utoipa::path(
    get,
    path = "/files",
    tag = "File",
    operation_id = "ReadFiles",
    params(
        ("tenant" = String, Query, description = "Owning tenant"),
        ("device" = String, Query, description = "Originating device")
    ),
    responses(
        (status = 200, description = "Matching records (possibly none)"),
        (status = 400, description = "Missing or invalid parameters")
    )
)]
pub async fn read_files(
    State(state): State<Arc<AppState>>,
    Query(scope): Query<ScopeParams>,
) -> Result<Json<FileReply>, StoreError> {
    scope.validate().map_err(validation_error)?;
    let records = state
        .controller
        .read_files(&scope.tenant, &scope.device)
        .await?;
    Ok(Json(FileReply::many(records)))
}

/// `GET /files/{id}/access/{method}` -- Mint a capability for an existing
/// record.
#[utoipa::path(
    get,
    path = "/files/{id}/access/{method}",
    tag = "File",
    operation_id = "ReadFileAccess",
    params(
        ("id" = i64, Path, description = "Record id"),
        ("method" = String, Path, description = "One of get, put, head")
    ),
    responses(
        (status = 200, description = "Reply carries the presigned URL"),
        (status = 400, description = "Unsupported access method"),
        (status = 404, description = "No such record or object"),
        (status = 409, description = "Record state does not permit the operation")
    )
)]
pub async fn access_file(
    State(state): State<Arc<AppState>>,
    Path((id, method)): Path<(i64, String)>,
) -> Result<Json<FileReply>, StoreError> {
    let operation =
        Operation::from_method(&method).ok_or_else(|| StoreError::OperationUnsupported {
            operation: method.clone(),
        })?;
    let (record, url) = state
        .controller
        .issue_access_capability(id, operation)
        .await?;
    Ok(Json(FileReply::one(record, Some(url))))
}

/// `PATCH /files/{id}` -- Update status and optionally checksum/size.
#[utoipa::path(
    patch,
    path = "/files/{id}",
    tag = "File",
    operation_id = "UpdateFile",
    params(("id" = i64, Path, description = "Record id")),
    responses(
        (status = 200, description = "The updated record"),
        (status = 404, description = "No such record"),
        (status = 409, description = "Transition not allowed")
    )
)]
pub async fn update_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateFileRequest>,
) -> Result<Json<FileReply>, StoreError> {
    let record = state
        .controller
        .update_file(id, request.status, request.check_sum, request.size)
        .await?;
    Ok(Json(FileReply::one(record, None)))
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_requires_name() {
        let request = CreateFileRequest {
            name: String::new(),
            check_sum: String::new(),
            size: 0,
        };
        assert!(request.validate().is_err());

        let request = CreateFileRequest {
            name: "f.txt".into(),
            check_sum: String::new(),
            size: 0,
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_scope_requires_tenant_and_device() {
        let scope = ScopeParams {
            tenant: "t1".into(),
            device: String::new(),
        };
        assert!(scope.validate().is_err());
    }

    #[test]
    fn test_update_request_parses_status_codes() {
        let request: UpdateFileRequest =
            serde_json::from_str(r#"{"status":"E"}"#).unwrap();
        assert_eq!(request.status, ObjectStatus::Expired);
        assert!(request.check_sum.is_none());
        assert!(request.size.is_none());

        assert!(serde_json::from_str::<UpdateFileRequest>(r#"{"status":"Z"}"#).is_err());
    }

    #[test]
    fn test_reply_envelope_shape() {
        let reply = FileReply {
            status: true,
            count: 0,
            data: vec![],
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], true);
        assert_eq!(json["count"], 0);
        assert!(json["data"].as_array().unwrap().is_empty());
    }
}
