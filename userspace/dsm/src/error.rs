// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{NodeId, PageNum};

/// Result alias for coherence operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by nodes, the manager and the transports between them.
///
/// Errors travel inside [`crate::Reply::Failed`], so every variant must stay
/// serializable and cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Error {
    /// Another coherence transaction is outstanding.
    #[error("busy: another transaction is outstanding")]
    Busy,
    /// The manager has no record for the page.
    #[error("page {0} not found")]
    PageNotFound(PageNum),
    /// A confirm did not match the installed transaction.
    #[error("confirm for page {page} from node {requester} does not match the transaction")]
    WrongConfirm {
        /// Page named by the confirm.
        page: PageNum,
        /// Requester named by the confirm.
        requester: NodeId,
    },
    /// A page delivery did not match the requester's pending request.
    #[error("delivered page {delivered} does not match pending request {expected:?}")]
    ProtocolMismatch {
        /// Page of the pending request, if any.
        expected: Option<PageNum>,
        /// Page that was delivered.
        delivered: PageNum,
    },
    /// The node the manager believes to be the owner does not hold the page.
    #[error("owner does not hold page {0}")]
    OwnerMissingPage(PageNum),
    /// The manager answered a confirm with `confirm = false`.
    #[error("manager rejected the confirm for page {0}")]
    ConfirmRejected(PageNum),
    /// No address is configured for the node.
    #[error("no address configured for node {0}")]
    UnknownNode(NodeId),
    /// The remote call could not be delivered or answered.
    #[error("transport failure: {0}")]
    TransportFailure(String),
    /// The component does not serve this request.
    #[error("request unsupported by this component")]
    Unsupported,
}

impl Error {
    /// Wraps any displayable failure as a transport failure.
    pub fn transport(detail: impl ToString) -> Self {
        Self::TransportFailure(detail.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::TransportFailure(value.to_string())
    }
}
