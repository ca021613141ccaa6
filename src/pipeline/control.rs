// src/pipeline/control.rs
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Pause,
    Resume,
    Stop,
}

/// Lets other threads steer a running pipeline. Requests are applied at
/// the next tick boundary.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Sender<ControlRequest>,
}

impl ControlHandle {
    pub(crate) fn new(tx: Sender<ControlRequest>) -> Self {
        Self { tx }
    }

    /// Returns false once the pipeline has been dropped.
    pub fn send(&self, request: ControlRequest) -> bool {
        self.tx.send(request).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.send(ControlRequest::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(ControlRequest::Resume)
    }

    pub fn stop(&self) -> bool {
        self.send(ControlRequest::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn requests_arrive_in_order() {
        let (tx, rx) = mpsc::channel();
        let handle = ControlHandle::new(tx);
        let other = handle.clone();
        assert!(handle.pause());
        assert!(other.stop());
        assert_eq!(rx.try_recv().unwrap(), ControlRequest::Pause);
        assert_eq!(rx.try_recv().unwrap(), ControlRequest::Stop);
    }

    #[test]
    fn send_fails_after_receiver_is_gone() {
        let (tx, rx) = mpsc::channel();
        let handle = ControlHandle::new(tx);
        drop(rx);
        assert!(!handle.resume());
    }
}
