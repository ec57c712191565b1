use futures::prelude::*;
use kube::runtime::watcher;
use std::pin::Pin;
use tokio::time;
use tracing::info;

pub use kube::runtime::watcher::Event;

/// A kubernetes watch stream that hides disconnects from its consumer.
pub struct Watch<T>(
    Pin<Box<dyn Stream<Item = watcher::Result<watcher::Event<T>>> + Send + 'static>>,
);

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = watcher::Result<watcher::Event<T>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Watch(watch.boxed())
    }
}

impl<T> Watch<T> {
    /// Returns the next event, retrying through watch errors.
    ///
    /// Errors are logged and followed by a short pause so a broken apiserver
    /// connection paces its reconnects instead of spinning.
    pub async fn recv(&mut self) -> Event<T> {
        loop {
            match self
                .0
                .next()
                .await
                .expect("watch stream must not terminate")
            {
                Ok(ev) => return ev,
                Err(error) => {
                    info!(%error, "disconnected, recovering");
                    time::sleep(time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}
