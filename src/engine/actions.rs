//! Asynchronous control-plane action polling.

use std::future::Future;
use std::time::{Duration, Instant};

use super::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls `get_status(name)` once per second until the reported status
/// leaves `{progressing, queued}`. `error`/`destroy-error` map to
/// [`Error::PipelineFailed`]; any other terminal value is success;
/// exceeding `deadline` produces [`Error::PipelineTimeout`].
pub async fn poll_until_terminal<F, Fut>(name: &str, deadline: Duration, mut get_status: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::api::Result<String>>,
{
    let started = Instant::now();

    loop {
        let status = get_status().await?;
        match status.as_str() {
            "progressing" | "queued" => {
                if started.elapsed() >= deadline {
                    return Err(Error::PipelineTimeout { name: name.to_string(), timeout: deadline });
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            "error" | "destroy-error" => return Err(Error::PipelineFailed { name: name.to_string() }),
            _ => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_on_non_terminal_error_status() {
        let result = poll_until_terminal("pipeline-1", Duration::from_secs(5), || async {
            Ok("deployed".to_string())
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn reports_pipeline_failed_on_error_status() {
        let result = poll_until_terminal("pipeline-1", Duration::from_secs(5), || async {
            Ok("error".to_string())
        })
        .await;
        assert!(matches!(result, Err(Error::PipelineFailed { .. })));
    }

    #[tokio::test]
    async fn retries_while_progressing_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = poll_until_terminal("pipeline-1", Duration::from_secs(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok("progressing".to_string())
                } else {
                    Ok("deployed".to_string())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
