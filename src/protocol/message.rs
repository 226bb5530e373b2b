//! Request and response messages.
//!
//! These mirror doozerd's `msg.proto` (proto2) field for field, so the bodies
//! we put on the wire are byte-compatible with a stock server:
//!
//! ```text
//! Request  { tag=1 verb=2 path=4 value=5 other_tag=6 offset=7 rev=9 }
//! Response { tag=1 flags=2 rev=3 path=5 value=6 len=8 err_code=100 err_detail=101 }
//! ```
//!
//! `prost` generates default-returning getters for every optional field
//! (`request.path()`, `response.rev()`, ...). Setters on [`Request`] are named
//! `with_*` to stay clear of them.

use std::fmt;

/// Operation requested from the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Verb {
    Get = 1,
    Set = 2,
    Del = 3,
    Rev = 5,
    Wait = 6,
    Nop = 7,
    Walk = 9,
    Getdir = 14,
    Stat = 16,
    Self_ = 20,
    Access = 99,
}

/// Server error codes this client understands.
///
/// A response whose `err_code` is not one of these is a contract violation
/// and surfaces as [`DoozerError::UnknownErrorCode`](crate::DoozerError::UnknownErrorCode).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ErrorCode {
    TagInUse = 1,
    UnknownVerb = 2,
    Readonly = 3,
    TooLate = 4,
    RevMismatch = 5,
    BadPath = 6,
    MissingArg = 7,
    Range = 8,
    NotDir = 20,
    IsDir = 21,
    NoEnt = 22,
}

impl ErrorCode {
    /// Look up a raw wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::try_from(code).ok()
    }

    /// Protocol name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TagInUse => "TAG_IN_USE",
            ErrorCode::UnknownVerb => "UNKNOWN_VERB",
            ErrorCode::Readonly => "READONLY",
            ErrorCode::TooLate => "TOO_LATE",
            ErrorCode::RevMismatch => "REV_MISMATCH",
            ErrorCode::BadPath => "BAD_PATH",
            ErrorCode::MissingArg => "MISSING_ARG",
            ErrorCode::Range => "RANGE",
            ErrorCode::NotDir => "NOTDIR",
            ErrorCode::IsDir => "ISDIR",
            ErrorCode::NoEnt => "NOENT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response flag bits.
pub mod flags {
    /// The response carries a valid entry.
    pub const VALID: i32 = 0b0001;
    /// Final response for a tag.
    pub const DONE: i32 = 0b0010;
    /// The change created or updated the path.
    pub const SET: i32 = 0b0100;
    /// The change deleted the path.
    pub const DEL: i32 = 0b1000;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: i32, flag: i32) -> bool {
        flags & flag != 0
    }
}

/// A request to the server. The transport owns `tag`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Request {
    #[prost(int32, optional, tag = "1")]
    pub tag: Option<i32>,
    #[prost(enumeration = "Verb", optional, tag = "2")]
    pub verb: Option<i32>,
    #[prost(string, optional, tag = "4")]
    pub path: Option<String>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub value: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "6")]
    pub other_tag: Option<i32>,
    #[prost(int32, optional, tag = "7")]
    pub offset: Option<i32>,
    #[prost(int64, optional, tag = "9")]
    pub rev: Option<i64>,
}

impl Request {
    /// Create a request for the given verb with every other field unset.
    pub fn new(verb: Verb) -> Self {
        Self {
            verb: Some(verb as i32),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_rev(mut self, rev: i64) -> Self {
        self.rev = Some(rev);
        self
    }

    pub fn with_offset(mut self, offset: i32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A response from the server, matched to its request by `tag`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(int32, optional, tag = "1")]
    pub tag: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub flags: Option<i32>,
    #[prost(int64, optional, tag = "3")]
    pub rev: Option<i64>,
    #[prost(string, optional, tag = "5")]
    pub path: Option<String>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub value: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "8")]
    pub len: Option<i32>,
    #[prost(enumeration = "ErrorCode", optional, tag = "100")]
    pub err_code: Option<i32>,
    #[prost(string, optional, tag = "101")]
    pub err_detail: Option<String>,
}

impl Response {
    /// Value as text (lossy for non-UTF-8 payloads).
    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.value())
    }

    /// True if this change created or updated its path.
    #[inline]
    pub fn is_set(&self) -> bool {
        flags::has_flag(self.flags(), flags::SET)
    }

    /// True if this change deleted its path.
    #[inline]
    pub fn is_del(&self) -> bool {
        flags::has_flag(self.flags(), flags::DEL)
    }
}
