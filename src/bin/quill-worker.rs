//! Quill Worker - 执行池 worker 进程
//!
//! 由执行池启动，stdin/stdout 传输 JSON 行协议，日志只写 stderr。

use quill::infrastructure::adapters::BackendRegistry;
use quill::infrastructure::pool::serve;
use tokio::io::BufReader;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,quill=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let registry = BackendRegistry::with_defaults().arc();
    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), registry)
        .await
        .map_err(|e| anyhow::anyhow!("worker failed: {}", e))?;

    Ok(())
}
