pub mod errors;
pub mod remote;
pub mod service;

pub use errors::ServiceError;
pub use remote::IndexClient;
pub use service::IssueService;
