//! The closed catalogue of S3 error kinds.
//!
//! Every variant carries a fixed HTTP status and a stable `<Code>` string.
//! Handlers return `Result<_, S3Error>`; [`IntoResponse`] renders the XML
//! error body and stamps the common response headers so a rejected request
//! still looks like a BleepStore response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::xml::render_error;

/// Generate a 128-bit request ID, rendered as 32 uppercase hex characters.
pub fn generate_request_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// The full S3-compatible error catalogue (§4.1).
#[derive(Debug, Error)]
pub enum S3Error {
    #[error("The specified bucket does not exist")]
    NoSuchBucket { bucket: String },

    #[error("The resource you requested does not exist")]
    NoSuchKey { key: String },

    #[error("The specified upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.")]
    NoSuchUpload { upload_id: String },

    #[error("The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.")]
    BucketAlreadyExists,

    #[error("Your previous request to create the named bucket succeeded and you already own it.")]
    BucketAlreadyOwnedByYou { bucket: String },

    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty { bucket: String },

    #[error("Access Denied")]
    AccessDenied { message: String },

    #[error("{message}")]
    InvalidArgument { message: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    #[error("At least one of the pre-conditions you specified did not hold")]
    PreconditionFailed,

    #[error("Your proposed upload exceeds the maximum allowed object size.")]
    EntityTooLarge,

    #[error("Your proposed upload is smaller than the minimum allowed size")]
    EntityTooSmall,

    #[error("Your key is too long")]
    KeyTooLongError,

    #[error("{message}")]
    InvalidPart { message: String },

    #[error("The list of parts was not in ascending order. Parts must be ordered by part number.")]
    InvalidPartOrder,

    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    #[error("The specified access control list is not valid.")]
    MalformedACLError,

    #[error("The AWS Access Key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    #[error("A header you provided implies functionality that is not implemented")]
    NotImplemented,

    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    #[error("You must provide the Content-Length HTTP header.")]
    MissingContentLength,

    #[error("The requested range is not satisfiable")]
    InvalidRange,

    #[error("Not Modified")]
    NotModified { etag: String, last_modified: String },

    #[error("The Content-MD5 you specified did not match what we received.")]
    BadDigest,

    #[error("The Content-MD5 you specified is not valid.")]
    InvalidDigest,

    #[error("The provided encoding-type is not valid.")]
    InvalidEncodingType,

    #[error("The specified location constraint is not valid.")]
    InvalidLocationConstraint,

    #[error("You have attempted to create more buckets than allowed.")]
    TooManyBuckets,

    #[error("Your socket connection to the server was not read from or written to within the timeout period.")]
    RequestTimeout,

    #[error("The difference between the request time and the server's time is too large.")]
    RequestTimeTooSkewed,

    #[error("Please reduce your request rate.")]
    ServiceUnavailable,

    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl S3Error {
    /// The stable `<Code>` string used in XML error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket { .. } => "NoSuchBucket",
            S3Error::NoSuchKey { .. } => "NoSuchKey",
            S3Error::NoSuchUpload { .. } => "NoSuchUpload",
            S3Error::BucketAlreadyExists => "BucketAlreadyExists",
            S3Error::BucketAlreadyOwnedByYou { .. } => "BucketAlreadyOwnedByYou",
            S3Error::BucketNotEmpty { .. } => "BucketNotEmpty",
            S3Error::AccessDenied { .. } => "AccessDenied",
            S3Error::InvalidArgument { .. } => "InvalidArgument",
            S3Error::InvalidRequest { .. } => "InvalidRequest",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::InvalidBucketName { .. } => "InvalidBucketName",
            S3Error::PreconditionFailed => "PreconditionFailed",
            S3Error::EntityTooLarge => "EntityTooLarge",
            S3Error::EntityTooSmall => "EntityTooSmall",
            S3Error::KeyTooLongError => "KeyTooLongError",
            S3Error::InvalidPart { .. } => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::MalformedACLError => "MalformedACLError",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::MissingContentLength => "MissingContentLength",
            S3Error::InvalidRange => "InvalidRange",
            S3Error::NotModified { .. } => "NotModified",
            S3Error::BadDigest => "BadDigest",
            S3Error::InvalidDigest => "InvalidDigest",
            S3Error::InvalidEncodingType => "InvalidEncodingType",
            S3Error::InvalidLocationConstraint => "InvalidLocationConstraint",
            S3Error::TooManyBuckets => "TooManyBuckets",
            S3Error::RequestTimeout => "RequestTimeout",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::ServiceUnavailable => "ServiceUnavailable",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// The HTTP status this error kind maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket { .. } => StatusCode::NOT_FOUND,
            S3Error::NoSuchKey { .. } => StatusCode::NOT_FOUND,
            S3Error::NoSuchUpload { .. } => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyExists => StatusCode::CONFLICT,
            S3Error::BucketAlreadyOwnedByYou { .. } => StatusCode::CONFLICT,
            S3Error::BucketNotEmpty { .. } => StatusCode::CONFLICT,
            S3Error::AccessDenied { .. } => StatusCode::FORBIDDEN,
            S3Error::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            S3Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            S3Error::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            S3Error::InvalidBucketName { .. } => StatusCode::BAD_REQUEST,
            S3Error::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            S3Error::EntityTooLarge => StatusCode::BAD_REQUEST,
            S3Error::EntityTooSmall => StatusCode::BAD_REQUEST,
            S3Error::KeyTooLongError => StatusCode::BAD_REQUEST,
            S3Error::InvalidPart { .. } => StatusCode::BAD_REQUEST,
            S3Error::InvalidPartOrder => StatusCode::BAD_REQUEST,
            S3Error::MalformedXML => StatusCode::BAD_REQUEST,
            S3Error::MalformedACLError => StatusCode::BAD_REQUEST,
            S3Error::InvalidAccessKeyId => StatusCode::FORBIDDEN,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            S3Error::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::NotModified { .. } => StatusCode::NOT_MODIFIED,
            S3Error::BadDigest => StatusCode::BAD_REQUEST,
            S3Error::InvalidDigest => StatusCode::BAD_REQUEST,
            S3Error::InvalidEncodingType => StatusCode::BAD_REQUEST,
            S3Error::InvalidLocationConstraint => StatusCode::BAD_REQUEST,
            S3Error::TooManyBuckets => StatusCode::BAD_REQUEST,
            S3Error::RequestTimeout => StatusCode::BAD_REQUEST,
            S3Error::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            S3Error::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        if matches!(self, S3Error::InternalError(_)) {
            tracing::error!(error = %self, "internal error");
        }

        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        // 304 responses carry no body, matching GetObject/HeadObject semantics (§4.8),
        // but still carry the object's current ETag/Last-Modified.
        if let S3Error::NotModified { etag, last_modified } = &self {
            return (
                status,
                [
                    ("etag", etag.clone()),
                    ("last-modified", last_modified.clone()),
                    ("x-amz-request-id", request_id),
                    ("date", date),
                    ("server", "BleepStore".to_string()),
                ],
            )
                .into_response();
        }

        let body = render_error(self.code(), &self.to_string(), "", &request_id);

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-amz-request-id", request_id),
                ("date", date),
                ("server", "BleepStore".to_string()),
            ],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_32_hex_chars() {
        let id = generate_request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_codes_match_catalogue() {
        assert_eq!(
            S3Error::NoSuchBucket { bucket: "b".to_string() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(S3Error::BucketAlreadyExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(S3Error::InvalidRange.status_code(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(S3Error::MissingContentLength.status_code(), StatusCode::LENGTH_REQUIRED);
        assert_eq!(S3Error::RequestTimeTooSkewed.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(S3Error::ServiceUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(S3Error::NoSuchKey { key: "k".to_string() }.code(), "NoSuchKey");
        assert_eq!(S3Error::EntityTooSmall.code(), "EntityTooSmall");
        assert_eq!(S3Error::InvalidEncodingType.code(), "InvalidEncodingType");
    }
}
