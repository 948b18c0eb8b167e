use thiserror::Error;

/// Errors reported synchronously by the call surface.
///
/// Asynchronous failures never travel through this type: a transport or
/// framing problem degrades the affected request group and surfaces through
/// the call's final status instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    #[error("an operation of the same kind is already pending on this call")]
    TooManyOperations,

    #[error("operation was already performed on this call")]
    AlreadyInvoked,

    #[error("operation not available on a client call")]
    NotOnClient,

    #[error("operation not available on a server call")]
    NotOnServer,
}

pub type Result<T> = std::result::Result<T, RpcError>;
