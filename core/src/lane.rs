//! Per-target request lanes
//!
//! A lane carries requests from the loader to one target's worker pool. Each
//! lane holds one slot per worker; the loader must claim a free slot before it
//! can enqueue, so a request is only accepted when a worker is idle and will
//! pick it up immediately. The slot travels with the request and is released
//! when the worker drops the [`Dispatch`] after reporting its timing. A worker
//! that dies retires its slot instead, so the lane never accepts more requests
//! than there are live workers.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::request::Request;

/// A request handed to a worker together with its lane slot
#[derive(Debug)]
pub struct Dispatch {
    request: Request,
    slot: OwnedSemaphorePermit,
}

impl Dispatch {
    /// The request to issue
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Remove this dispatch's slot from the lane for good
    pub fn retire(self) {
        self.slot.forget();
    }
}

/// Loader side of a lane
#[derive(Debug, Clone)]
pub struct LaneSender {
    tx: async_channel::Sender<Dispatch>,
    slots: Arc<Semaphore>,
}

/// Worker side of a lane, shared by every worker of the target
pub type LaneReceiver = async_channel::Receiver<Dispatch>;

/// Create a lane for `workers` workers
pub fn lane(workers: usize) -> (LaneSender, LaneReceiver) {
    let workers = workers.max(1);
    let (tx, rx) = async_channel::bounded(workers);
    let slots = Arc::new(Semaphore::new(workers));
    (LaneSender { tx, slots }, rx)
}

impl LaneSender {
    /// Hand the request to an idle worker without waiting.
    ///
    /// Gives the request back when every worker is busy or the lane is closed.
    pub fn try_dispatch(&self, request: Request) -> Result<(), Request> {
        let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
            return Err(request);
        };
        self.tx
            .try_send(Dispatch {
                request,
                slot,
            })
            .map_err(|e| e.into_inner().request)
    }

    /// Close the lane. Workers drain what was already dispatched and exit.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    /// Number of idle workers
    pub fn idle(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_until_busy() {
        let (tx, rx) = lane(2);
        assert!(tx.try_dispatch(Request::get("/1")).is_ok());
        assert!(tx.try_dispatch(Request::get("/2")).is_ok());
        let back = tx.try_dispatch(Request::get("/3")).unwrap_err();
        assert_eq!(back.uri, "/3");
        assert_eq!(tx.idle(), 0);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.request().uri, "/1");
        assert!(tx.try_dispatch(Request::get("/4")).is_err());

        drop(first);
        assert_eq!(tx.idle(), 1);
        assert!(tx.try_dispatch(Request::get("/5")).is_ok());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (tx, rx) = lane(1);
        tx.try_dispatch(Request::get("/1")).unwrap();
        assert!(tx.close());
        assert!(!tx.close());

        assert_eq!(rx.recv().await.unwrap().request().uri, "/1");
        assert!(rx.recv().await.is_err());
        assert!(tx.try_dispatch(Request::get("/2")).is_err());
    }

    #[tokio::test]
    async fn test_workers_share_receiver() {
        let (tx, rx) = lane(2);
        let rx2 = rx.clone();
        tx.try_dispatch(Request::get("/a")).unwrap();
        tx.try_dispatch(Request::get("/b")).unwrap();

        let a = rx.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert_eq!(a.request().uri, "/a");
        assert_eq!(b.request().uri, "/b");
    }

    #[tokio::test]
    async fn test_retired_slot_is_not_reused() {
        let (tx, rx) = lane(2);
        tx.try_dispatch(Request::get("/1")).unwrap();
        rx.recv().await.unwrap().retire();
        assert_eq!(tx.idle(), 1);

        tx.try_dispatch(Request::get("/2")).unwrap();
        assert!(tx.try_dispatch(Request::get("/3")).is_err());
        rx.recv().await.unwrap().retire();

        // Every worker is gone, nothing can be accepted any more.
        assert_eq!(tx.idle(), 0);
        assert!(tx.try_dispatch(Request::get("/4")).is_err());
    }
}
