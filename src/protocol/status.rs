//! Response status classification.

use serde::Serialize;

/// The five outcomes a call can have, with their HTTP codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// 200 - success.
    Ok,
    /// 400 - malformed request, undecodable body or bad arguments.
    BadRequest,
    /// 403 - private method without a valid token.
    Forbidden,
    /// 404 - unknown method.
    NotFound,
    /// 500 - the handler failed.
    InternalError,
}

impl Status {
    /// Numeric HTTP status code.
    #[inline]
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalError => 500,
        }
    }

    /// Reason phrase for the status line.
    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalError => "Internal Server Error",
        }
    }

    /// Classify a received status code.
    ///
    /// Codes outside the five known ones are bucketed by class: 401/407 are
    /// auth errors, other 4xx are client errors, anything else non-200 is a
    /// server error.
    pub fn from_code(code: u16) -> Status {
        match code {
            200 => Status::Ok,
            401 | 403 | 407 => Status::Forbidden,
            404 => Status::NotFound,
            400..=499 => Status::BadRequest,
            _ => Status::InternalError,
        }
    }

    /// True for 200.
    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Ok
    }
}
