//! Bridge handle: the caller-side endpoint of the call/reply protocol
//!
//! Normal mode runs the service on a dedicated worker thread with its own
//! runtime, so Argon2id and chunk encryption never touch the caller's
//! thread. If that thread cannot be spawned, the handle degrades to
//! direct in-process calls against the same service instead of failing.
//!
//! Lifecycle is explicit: `spawn` (or `direct`) constructs a handle,
//! `shared` lazily installs one process-wide, `close` tears it down.
//! There is no hidden module-level state beyond the `shared` slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use sealdrive_upload::{MultipartStore, RetryPolicy};

use crate::protocol::{BridgeFault, BridgeOp, BridgeReply, BridgeRequest, BridgeResponse};
use crate::worker::ServiceCore;

type CallResult = Result<BridgeReply, BridgeFault>;
type ExecFn = Arc<dyn Fn(BridgeRequest) -> BoxFuture<'static, CallResult> + Send + Sync>;

enum Transport {
    /// Dedicated worker thread; requests flow over a channel, replies are
    /// matched back to waiters by call id.
    Worker {
        tx: Mutex<Option<mpsc::UnboundedSender<BridgeRequest>>>,
        pending: Arc<Mutex<HashMap<u64, oneshot::Sender<CallResult>>>>,
        thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    },
    /// Degraded mode: the service runs inline on the caller's runtime.
    Direct { exec: ExecFn },
}

pub struct BridgeHandle {
    transport: Transport,
    next_call: AtomicU64,
    closed: AtomicBool,
}

/// A submitted call: its id (usable as a `Cancel` target while in flight)
/// and the pending reply.
pub struct PendingCall {
    pub call_id: u64,
    waiter: Waiter,
}

enum Waiter {
    Channel(oneshot::Receiver<CallResult>),
    Inline(BoxFuture<'static, CallResult>),
}

impl PendingCall {
    pub async fn wait(self) -> CallResult {
        match self.waiter {
            Waiter::Channel(rx) => rx.await.unwrap_or(Err(BridgeFault::Closed)),
            Waiter::Inline(fut) => fut.await,
        }
    }
}

impl BridgeHandle {
    /// Spawn the service on its own thread and runtime. Falls back to
    /// [`BridgeHandle::direct`] if the thread cannot be created.
    pub fn spawn<S: MultipartStore>(
        store: S,
        retry: RetryPolicy,
        max_concurrent_transfers: usize,
    ) -> Arc<BridgeHandle> {
        let core = Arc::new(ServiceCore::new(store, retry, max_concurrent_transfers));
        let (req_tx, req_rx) = mpsc::unbounded_channel::<BridgeRequest>();
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<CallResult>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let router_pending = pending.clone();
        let router_core = core.clone();
        let spawned = std::thread::Builder::new()
            .name("sealdrive-bridge".to_string())
            .spawn(move || run_service(router_core, req_rx, router_pending));

        match spawned {
            Ok(thread) => Arc::new(BridgeHandle {
                transport: Transport::Worker {
                    tx: Mutex::new(Some(req_tx)),
                    pending,
                    thread: Mutex::new(Some(thread)),
                },
                next_call: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
            Err(err) => {
                tracing::warn!(error = %err, "worker thread unavailable, using in-process bridge");
                Self::direct_from_core(core)
            }
        }
    }

    /// In-process mode: calls execute on the caller's runtime.
    pub fn direct<S: MultipartStore>(
        store: S,
        retry: RetryPolicy,
        max_concurrent_transfers: usize,
    ) -> Arc<BridgeHandle> {
        Self::direct_from_core(Arc::new(ServiceCore::new(
            store,
            retry,
            max_concurrent_transfers,
        )))
    }

    fn direct_from_core<S: MultipartStore>(core: Arc<ServiceCore<S>>) -> Arc<BridgeHandle> {
        let exec: ExecFn = Arc::new(move |req: BridgeRequest| {
            let core = core.clone();
            Box::pin(async move { core.handle(req.call_id, req.op).await })
        });
        Arc::new(BridgeHandle {
            transport: Transport::Direct { exec },
            next_call: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Submit an operation without waiting for its reply.
    pub fn submit(&self, op: BridgeOp) -> Result<PendingCall, BridgeFault> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeFault::Closed);
        }
        let call_id = self.next_call.fetch_add(1, Ordering::SeqCst);

        match &self.transport {
            Transport::Worker { tx, pending, .. } => {
                let (reply_tx, reply_rx) = oneshot::channel();
                lock(pending).insert(call_id, reply_tx);

                let sent = match lock_opt(tx).as_ref() {
                    Some(sender) => sender.send(BridgeRequest { call_id, op }).is_ok(),
                    None => false,
                };
                if !sent {
                    lock(pending).remove(&call_id);
                    return Err(BridgeFault::Closed);
                }
                Ok(PendingCall {
                    call_id,
                    waiter: Waiter::Channel(reply_rx),
                })
            }
            Transport::Direct { exec } => Ok(PendingCall {
                call_id,
                waiter: Waiter::Inline(exec(BridgeRequest { call_id, op })),
            }),
        }
    }

    /// Submit an operation and wait for its reply.
    pub async fn call(&self, op: BridgeOp) -> CallResult {
        self.submit(op)?.wait().await
    }

    /// Tear the bridge down. In-flight calls are answered with
    /// [`BridgeFault::Closed`]; the worker thread is joined.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Transport::Worker { tx, pending, thread } = &self.transport {
            // dropping the sender ends the service loop
            lock_opt(tx).take();
            if let Some(handle) = lock_opt(thread).take() {
                if handle.join().is_err() {
                    tracing::error!("bridge worker thread panicked");
                }
            }
            for (_, waiter) in lock(pending).drain() {
                let _ = waiter.send(Err(BridgeFault::Closed));
            }
        }
        tracing::debug!("bridge closed");
    }
}

fn lock<K, V>(m: &Mutex<HashMap<K, V>>) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_opt<T>(m: &Mutex<Option<T>>) -> std::sync::MutexGuard<'_, Option<T>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Worker-thread body: run requests concurrently on a local runtime and
/// route each reply back to its waiter by call id.
fn run_service<S: MultipartStore>(
    core: Arc<ServiceCore<S>>,
    mut req_rx: mpsc::UnboundedReceiver<BridgeRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<CallResult>>>>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(error = %err, "bridge runtime failed to start");
            for (_, waiter) in lock(&pending).drain() {
                let _ = waiter.send(Err(BridgeFault::Closed));
            }
            return;
        }
    };

    runtime.block_on(async {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<BridgeResponse>();

        let dispatcher = async {
            while let Some(req) = req_rx.recv().await {
                let core = core.clone();
                let resp_tx = resp_tx.clone();
                tokio::spawn(async move {
                    let result = core.handle(req.call_id, req.op).await;
                    let _ = resp_tx.send(BridgeResponse {
                        call_id: req.call_id,
                        result,
                    });
                });
            }
            drop(resp_tx);
        };

        let router = async {
            while let Some(resp) = resp_rx.recv().await {
                match lock(&pending).remove(&resp.call_id) {
                    Some(waiter) => {
                        let _ = waiter.send(resp.result);
                    }
                    None => {
                        tracing::warn!(call_id = resp.call_id, "reply for unknown call dropped")
                    }
                }
            }
        };

        tokio::join!(dispatcher, router);
    });
}

static SHARED: OnceLock<Arc<BridgeHandle>> = OnceLock::new();

/// Process-wide bridge: built lazily by `init` on first use, the same
/// handle thereafter.
pub fn shared<F>(init: F) -> Arc<BridgeHandle>
where
    F: FnOnce() -> Arc<BridgeHandle>,
{
    SHARED.get_or_init(init).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use secrecy::SecretString;
    use sealdrive_crypto::{create_account, KdfParams, ObjectManifest};
    use sealdrive_upload::MemoryStore;
    use std::time::Duration;

    fn fast_kdf() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
            ..KdfParams::default()
        }
    }

    async fn unlock(bridge: &BridgeHandle) {
        let (props, _) = create_account(&SecretString::from("pw"), &fast_kdf()).unwrap();
        bridge
            .call(BridgeOp::Unlock {
                properties: props.to_bytes().unwrap(),
                passphrase: SecretString::from("pw"),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_mode_roundtrip() {
        let bridge = BridgeHandle::spawn(MemoryStore::new(), RetryPolicy::default(), 4);
        unlock(&bridge).await;

        let data = Bytes::from(vec![5u8; 70_000]);
        let (wrapped_key, ciphertext) = match bridge
            .call(BridgeOp::Encrypt { plaintext: data.clone() })
            .await
            .unwrap()
        {
            BridgeReply::Encrypted { wrapped_key, ciphertext } => (wrapped_key, ciphertext),
            other => panic!("unexpected reply: {other:?}"),
        };

        match bridge
            .call(BridgeOp::Decrypt { wrapped_key, ciphertext })
            .await
            .unwrap()
        {
            BridgeReply::Plaintext { plaintext } => assert_eq!(plaintext, data),
            other => panic!("unexpected reply: {other:?}"),
        }

        bridge.close();
    }

    #[tokio::test]
    async fn test_direct_mode_roundtrip() {
        let bridge = BridgeHandle::direct(MemoryStore::new(), RetryPolicy::default(), 4);
        unlock(&bridge).await;

        let reply = bridge
            .call(BridgeOp::Encrypt { plaintext: Bytes::from_static(b"inline") })
            .await
            .unwrap();
        assert!(matches!(reply, BridgeReply::Encrypted { .. }));
    }

    #[tokio::test]
    async fn test_replies_match_out_of_order_completion() {
        // a slow upload and a fast encrypt in flight together; each reply
        // must land on its own caller
        let store = MemoryStore::new();
        store.set_part_delay(Duration::from_millis(30));
        let bridge = BridgeHandle::spawn(store, RetryPolicy::default(), 4);
        unlock(&bridge).await;

        let slow = bridge
            .submit(BridgeOp::Upload {
                object_key: "files/slow.bin".into(),
                name: "slow.bin".into(),
                plaintext: Bytes::from(vec![1u8; 100_000]),
            })
            .unwrap();
        let fast = bridge
            .submit(BridgeOp::Encrypt { plaintext: Bytes::from_static(b"quick") })
            .unwrap();
        assert_ne!(slow.call_id, fast.call_id);

        let fast_reply = fast.wait().await.unwrap();
        assert!(matches!(fast_reply, BridgeReply::Encrypted { .. }));

        match slow.wait().await.unwrap() {
            BridgeReply::Uploaded { manifest, .. } => {
                ObjectManifest::from_bytes(&manifest).unwrap();
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        bridge.close();
    }

    #[tokio::test]
    async fn test_cancel_reaches_in_flight_upload() {
        let store = MemoryStore::new();
        store.set_part_delay(Duration::from_millis(50));
        let bridge = BridgeHandle::spawn(store, RetryPolicy::default(), 4);
        unlock(&bridge).await;

        let upload = bridge
            .submit(BridgeOp::Upload {
                object_key: "files/doomed.bin".into(),
                name: "doomed.bin".into(),
                plaintext: Bytes::from(vec![0u8; 11 * 1024 * 1024]),
            })
            .unwrap();

        // give the upload time to get a part in flight
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge
            .call(BridgeOp::Cancel { target: upload.call_id })
            .await
            .unwrap();

        let result = upload.wait().await;
        assert!(matches!(result, Err(BridgeFault::Cancelled)));

        bridge.close();
    }

    #[tokio::test]
    async fn test_closed_bridge_rejects_calls() {
        let bridge = BridgeHandle::spawn(MemoryStore::new(), RetryPolicy::default(), 4);
        bridge.close();
        let result = bridge.call(BridgeOp::Lock).await;
        assert!(matches!(result, Err(BridgeFault::Closed)));
    }
}
