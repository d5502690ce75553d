use crate::error::{CameraError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

/// Dedicated thread that owns a device while it streams.
///
/// The body reports start-up success or failure exactly once through the
/// `ready` sender, then pushes frames until `stop` is raised.
pub(crate) struct CaptureThread {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureThread {
    pub(crate) fn spawn<T, F>(name: &str, body: F) -> Result<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce(Arc<AtomicBool>, mpsc::Sender<Result<T>>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_stop, ready_tx))?;

        let mut capture = Self {
            stop,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(value)) => Ok((capture, value)),
            Ok(Err(e)) => {
                capture.join()?;
                Err(e)
            }
            Err(_) => {
                capture.join()?;
                Err(CameraError::backend(
                    "capture",
                    format!("{} exited during start-up", name),
                ))
            }
        }
    }

    /// Raise the stop flag and wait for the thread to finish.
    pub(crate) fn join(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| CameraError::backend("capture", "capture thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            tracing::warn!("Failed to stop capture thread: {}", e);
        }
    }
}
