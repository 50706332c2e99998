// Worker Shutdown Token

use tokio::sync::watch;

/// Shutdown signal shared by every worker loop and background task
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal
    ///
    /// Returns immediately if shutdown was already signalled. A sender dropped
    /// without signalling never fires.
    pub async fn wait(&mut self) {
        let closed = self.rx.wait_for(|stopped| *stopped).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to all holders of a token
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_late_token_sees_earlier_shutdown() {
        let (tx, token) = shutdown_channel();
        tx.shutdown();

        let mut late = token.clone();
        assert!(late.is_shutdown());
        tokio::time::timeout(Duration::from_millis(100), late.wait())
            .await
            .expect("wait() must not block after shutdown");
    }

    #[tokio::test]
    async fn test_wait_wakes_all_tokens() {
        let (tx, token) = shutdown_channel();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let mut t = token.clone();
            handles.push(tokio::spawn(async move { t.wait().await }));
        }
        tx.shutdown();
        for h in handles {
            tokio::time::timeout(Duration::from_secs(1), h)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_signal() {
        let (tx, mut token) = shutdown_channel();
        drop(tx);

        assert!(!token.is_shutdown());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), token.wait())
                .await
                .is_err()
        );
    }
}
