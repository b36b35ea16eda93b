pub mod connection;
pub mod errors;
pub mod operation_repo;
pub mod retry_queue_repo;
pub mod session_repo;
pub mod utils;

pub use connection::DatabaseConnection;
pub use errors::DatabaseError;
pub use operation_repo::OperationRepositoryImpl;
pub use retry_queue_repo::RetryQueueRepositoryImpl;
pub use session_repo::SessionRepositoryImpl;
