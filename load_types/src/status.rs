//! Status codes returned to the load coordinator.

use std::fmt::Display;

/// The subset of RPC status codes the load path answers with.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum StatusCode {
    #[default]
    Ok,
    /// The request was malformed or outside the sender's window. The sender must not retry it
    /// unchanged.
    InvalidArgument,
    /// The same packet is still being processed. The sender should retry later.
    DuplicateRpcInvocation,
    /// A routing or writer failure on this node.
    InternalError,
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DuplicateRpcInvocation => "DUPLICATE_RPC_INVOCATION",
            Self::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(s)
    }
}

/// A status code with the error messages that explain it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub error_msgs: Vec<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn new(code: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            error_msgs: vec![msg.into()],
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, msg)
    }

    pub fn duplicate_rpc_invocation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::DuplicateRpcInvocation, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalError, msg)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// Fold `other` into `self`.
    ///
    /// The first non-OK code wins; messages of later failures are appended but never replace
    /// the code already recorded.
    pub fn merge(&mut self, other: Self) {
        if other.is_ok() {
            return;
        }
        if self.is_ok() {
            self.code = other.code;
        }
        self.error_msgs.extend(other.error_msgs);
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.error_msgs.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.error_msgs.join("; "))
        }
    }
}
