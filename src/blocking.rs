//! Synchronous facade over [`RestClient`].
//!
//! This is the only sanctioned way to drive the pipeline from synchronous
//! code. Each facade owns one worker thread running a current-thread tokio
//! runtime; calls are shipped to that thread and the caller parks on a
//! oneshot reply. The caller's blocking wait never shares a scheduler with
//! the dispatch, so it cannot starve it.
//!
//! Do not call these methods from inside an async runtime: the reply wait
//! is a blocking receive and panics there.

use std::sync::Arc;
use std::thread::JoinHandle;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use http::Method;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::RestClient;
use crate::codec::{Codec, Decode, JsonCodec};
use crate::error::Error;
use crate::request::{RestRequest, TypedRequest};
use crate::response::{RestResponse, TypedResponse};

const WORKER_THREAD_NAME: &str = "restpipe-blocking";

type Job = BoxFuture<'static, ()>;

pub struct BlockingRestClient<C = JsonCodec> {
    client: Arc<RestClient<C>>,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl<C> std::fmt::Debug for BlockingRestClient<C> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BlockingRestClient")
            .field("client", &self.client)
            .field("running", &self.jobs.is_some())
            .finish()
    }
}

impl<C: Codec> BlockingRestClient<C> {
    /// Starts the worker thread. Fails when the runtime or the thread cannot
    /// be created.
    pub fn new(client: RestClient<C>) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| Error::Runtime {
                message: format!("failed to build worker runtime: {error}"),
            })?;
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        let worker = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_owned())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = queue.recv().await {
                        tokio::spawn(job);
                    }
                });
                debug!("blocking worker stopped");
            })
            .map_err(|error| Error::Runtime {
                message: format!("failed to spawn worker thread: {error}"),
            })?;

        Ok(Self {
            client: Arc::new(client),
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    pub fn client(&self) -> &RestClient<C> {
        &self.client
    }

    pub fn dispatch(&self, request: &RestRequest) -> Result<RestResponse, Error> {
        self.dispatch_with_cancel(request, &CancellationToken::new())
    }

    /// Cancelling `cancel` from another thread aborts the in-flight dispatch.
    pub fn dispatch_with_cancel(
        &self,
        request: &RestRequest,
        cancel: &CancellationToken,
    ) -> Result<RestResponse, Error> {
        let request = request.clone();
        let cancel = cancel.clone();
        self.run(move |client| async move { client.dispatch(&request, &cancel).await })
    }

    pub fn dispatch_typed<T>(&self, request: &TypedRequest<T>) -> Result<TypedResponse<T>, Error>
    where
        C: Decode<T>,
        T: Send + 'static,
    {
        self.dispatch_typed_with_cancel(request, &CancellationToken::new())
    }

    pub fn dispatch_typed_with_cancel<T>(
        &self,
        request: &TypedRequest<T>,
        cancel: &CancellationToken,
    ) -> Result<TypedResponse<T>, Error>
    where
        C: Decode<T>,
        T: Send + 'static,
    {
        let request = request.clone();
        let cancel = cancel.clone();
        self.run(move |client| async move { client.dispatch_typed(&request, &cancel).await })
    }

    pub fn get_string(&self, path: impl Into<String>) -> Result<String, Error> {
        let request = self.client.request(Method::GET, path);
        let response = self.dispatch(&request)?;
        Ok(response.body().to_owned())
    }

    pub fn get<T>(&self, path: impl Into<String>) -> Result<Option<T>, Error>
    where
        C: Decode<T>,
        T: Send + 'static,
    {
        let request = self.client.request(Method::GET, path).typed::<T>();
        Ok(self.dispatch_typed(&request)?.into_data())
    }

    /// Ships one pipeline call to the worker and blocks on its reply.
    fn run<R, F, Fut>(&self, call: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce(Arc<RestClient<C>>) -> Fut,
        Fut: std::future::Future<Output = Result<R, Error>> + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or_else(|| Error::Runtime {
            message: "blocking worker is shut down".to_owned(),
        })?;
        let (reply, outcome) = oneshot::channel();
        let future = call(Arc::clone(&self.client));
        let job = async move {
            let _ = reply.send(future.await);
        }
        .boxed();

        jobs.send(job).map_err(|_| Error::Runtime {
            message: "blocking worker is not running".to_owned(),
        })?;
        outcome.blocking_recv().map_err(|_| Error::Runtime {
            message: "blocking worker dropped the call before replying".to_owned(),
        })?
    }
}

impl<C> Drop for BlockingRestClient<C> {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("blocking worker panicked");
            }
        }
    }
}
