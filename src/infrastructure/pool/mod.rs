//! Execution Pool - worker 进程池

mod execution_pool;
mod launcher;
mod protocol;
mod worker_process;

pub use execution_pool::{ExecutionPool, ExecutionPoolConfig};
pub use launcher::{
    InProcessWorkerLauncher, ProcessWorkerConfig, ProcessWorkerLauncher, WorkerConnection,
    WorkerFault, WorkerLauncher,
};
pub use protocol::{decode_line, encode_line, WorkerReply, WorkerRequest};
pub use worker_process::serve;
