use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned background task together with the token that stops it.
#[derive(Debug)]
pub struct TaskHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancellation_token = CancellationToken::new();
        let join_handle = tokio::spawn(task(cancellation_token.clone()));
        Self {
            cancellation_token,
            join_handle,
        }
    }

    /// Cancels the task and waits for it to wind down.
    pub async fn stop(self) {
        self.cancellation_token.cancel();
        let _ = self.join_handle.await;
    }
}
