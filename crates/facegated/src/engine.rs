use facegate_core::{
    DetectedFace, Embedding, FaceAnalyzer, LivenessAssessment, Orchestrator, Outcome, PipelineError,
    RegistrationOutcome, Verification,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("face analysis models are not loaded")]
    ModelUnavailable,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: Vec<u8>,
        reply: Reply<Outcome<DetectedFace>>,
    },
    ExtractEmbedding {
        image: Vec<u8>,
        reply: Reply<Outcome<Embedding>>,
    },
    Verify {
        image: Vec<u8>,
        stored: Option<Embedding>,
        reply: Reply<Outcome<Verification>>,
    },
    Liveness {
        image: Vec<u8>,
        reply: Reply<Outcome<LivenessAssessment>>,
    },
    Register {
        image: Vec<u8>,
        skip_liveness: bool,
        reply: Reply<RegistrationOutcome>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn detect(&self, image: Vec<u8>) -> Result<Outcome<DetectedFace>, EngineError> {
        self.request(|reply| EngineRequest::Detect { image, reply }).await
    }

    pub async fn extract_embedding(
        &self,
        image: Vec<u8>,
    ) -> Result<Outcome<Embedding>, EngineError> {
        self.request(|reply| EngineRequest::ExtractEmbedding { image, reply }).await
    }

    /// Extract an embedding and, if `stored` is given, compare against it.
    pub async fn verify(
        &self,
        image: Vec<u8>,
        stored: Option<Embedding>,
    ) -> Result<Outcome<Verification>, EngineError> {
        self.request(|reply| EngineRequest::Verify { image, stored, reply }).await
    }

    pub async fn liveness(
        &self,
        image: Vec<u8>,
    ) -> Result<Outcome<LivenessAssessment>, EngineError> {
        self.request(|reply| EngineRequest::Liveness { image, reply }).await
    }

    pub async fn register(
        &self,
        image: Vec<u8>,
        skip_liveness: bool,
    ) -> Result<RegistrationOutcome, EngineError> {
        self.request(|reply| EngineRequest::Register {
            image,
            skip_liveness,
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
        Ok(result?)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The orchestrator (and the inference sessions inside it) is owned by that
/// thread; requests are processed one at a time in arrival order.
pub fn spawn_engine<A>(mut orchestrator: Orchestrator<A>) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let delivered = match req {
                    EngineRequest::Detect { image, reply } => {
                        reply.send(orchestrator.detect(&image)).is_ok()
                    }
                    EngineRequest::ExtractEmbedding { image, reply } => {
                        reply.send(orchestrator.extract_embedding(&image)).is_ok()
                    }
                    EngineRequest::Verify { image, stored, reply } => {
                        reply.send(orchestrator.verify(&image, stored.as_ref())).is_ok()
                    }
                    EngineRequest::Liveness { image, reply } => {
                        reply.send(orchestrator.liveness(&image)).is_ok()
                    }
                    EngineRequest::Register {
                        image,
                        skip_liveness,
                        reply,
                    } => reply.send(orchestrator.register(&image, skip_liveness)).is_ok(),
                };
                if !delivered {
                    tracing::debug!("caller went away before the result was ready");
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
