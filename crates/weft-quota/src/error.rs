#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuotaError {
    #[error("resource user was shut down")]
    UserShutdown,

    #[error("cancelled: the resource user shut down before this ran")]
    Cancelled,
}
