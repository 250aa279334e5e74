mod infrastructure;
mod queue;
mod resource_state;

pub use infrastructure::InfrastructureClient;
pub use queue::{ExecutionJob, ExecutionQueue, ExecutionRetryPolicy, JobDisposition};
pub use resource_state::{ResourceStateRecord, ResourceStateRepository};
