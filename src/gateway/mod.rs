//! Gateway module (feature-gated).
//!
//! [`FilesGateway`] wires one of the two Files API backends behind the axum
//! router in [`http`]: a local [`FileStore`] cache, or a proxy that forwards
//! every call to the upstream provider through a [`CredentialExecutor`].

pub mod config;
pub mod credential_pool;
pub mod executor;
pub mod http;
pub mod logging;
#[cfg(feature = "gateway-otel")]
pub mod otel;
pub mod sessions;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;
use thiserror::Error;

use crate::error::FilesError;
use crate::filestore::FileStore;
use crate::rewrite::PayloadRewriter;

pub use config::{
    ConfigError, CredentialConfig, FilesConfig, FilesMode, ServerConfig, UpstreamConfig,
};
pub use credential_pool::CredentialPool;
pub use executor::{
    ByteStream, CredentialExecutor, ExecuteOptions, ExecutorError, FilesAction, FilesRequest,
    FilesResponse, RequestBody,
};
pub use http::{LocalFileHandler, QueryPairs, UpstreamFileProxy, router};
pub use sessions::{ExpiringMap, UPLOAD_SESSION_TTL, UploadSession, UploadSessions};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("file store error: {0}")]
    Store(#[from] FilesError),
    #[error("upstream executor error: {0}")]
    Executor(#[from] ExecutorError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug)]
enum FilesBackend {
    Local(LocalFileHandler),
    Upstream(UpstreamFileProxy),
}

/// The Files API in the configured mode, plus the rewriter the generation
/// path uses to inline cached files.
#[derive(Debug)]
pub struct FilesGateway {
    backend: FilesBackend,
    rewriter: PayloadRewriter,
}

impl FilesGateway {
    pub fn local(store: FileStore) -> Self {
        let rewriter = PayloadRewriter::new(Some(store.clone()));
        Self {
            backend: FilesBackend::Local(LocalFileHandler::new(store)),
            rewriter,
        }
    }

    pub fn upstream(proxy: UpstreamFileProxy) -> Self {
        Self {
            backend: FilesBackend::Upstream(proxy),
            rewriter: PayloadRewriter::new(None),
        }
    }

    pub fn with_max_inline_bytes(mut self, max_inline_bytes: u64) -> Self {
        self.rewriter = self.rewriter.with_max_inline_bytes(max_inline_bytes);
        self
    }

    /// `None` when the Files API is disabled.
    ///
    /// Upstream mode without an `upstream` section still serves the routes, but
    /// every call answers 503.
    pub async fn from_config(config: &ServerConfig) -> Result<Option<Self>, GatewayError> {
        let files = &config.files;
        if !files.enable {
            return Ok(None);
        }
        let gateway = match files.mode {
            FilesMode::Local => {
                let store = FileStore::open(files.store_config()).await?;
                Self::local(store)
            }
            FilesMode::Upstream => {
                let executor = match config.upstream.as_ref() {
                    Some(upstream) => {
                        let pool = CredentialPool::from_config(upstream)?;
                        tracing::info!(
                            provider = %upstream.provider,
                            credentials = pool.credential_ids().len(),
                            "gemini files: upstream credential pool ready"
                        );
                        Some(Arc::new(pool) as Arc<dyn CredentialExecutor>)
                    }
                    None => {
                        tracing::warn!("gemini files: upstream mode without credentials; calls will fail");
                        None
                    }
                };
                let mut proxy = UpstreamFileProxy::new(executor);
                if let Some(upstream) = config.upstream.as_ref() {
                    proxy = proxy.with_provider(upstream.provider.trim());
                }
                Self::upstream(proxy)
            }
        };
        Ok(Some(gateway.with_max_inline_bytes(files.max_inline_bytes)))
    }

    pub fn mode(&self) -> FilesMode {
        match self.backend {
            FilesBackend::Local(_) => FilesMode::Local,
            FilesBackend::Upstream(_) => FilesMode::Upstream,
        }
    }

    pub fn store(&self) -> Option<&FileStore> {
        match &self.backend {
            FilesBackend::Local(handler) => Some(handler.store()),
            FilesBackend::Upstream(_) => None,
        }
    }

    pub fn rewriter(&self) -> &PayloadRewriter {
        &self.rewriter
    }

    /// Inlines cached files referenced by a generation request on behalf of
    /// the caller identified by `headers` and `query`. A no-op in upstream mode.
    pub async fn rewrite_generate_request(
        &self,
        headers: &HeaderMap,
        query: &QueryPairs,
        payload: &mut Value,
    ) -> crate::Result<usize> {
        if self.mode() != FilesMode::Local {
            return Ok(0);
        }
        let owner_key = http::caller_key(headers, query);
        self.rewriter.inline_local_files(payload, &owner_key).await
    }

    pub async fn upload(&self, request: Request) -> Response {
        match &self.backend {
            FilesBackend::Local(handler) => handler.upload(request).await,
            FilesBackend::Upstream(proxy) => proxy.upload(request).await,
        }
    }

    pub async fn get(&self, headers: &HeaderMap, query: &QueryPairs, file_id: &str) -> Response {
        match &self.backend {
            FilesBackend::Local(handler) => handler.get(headers, query, file_id).await,
            FilesBackend::Upstream(proxy) => proxy.get(headers, query, file_id).await,
        }
    }

    pub async fn list(&self, headers: &HeaderMap, query: &QueryPairs) -> Response {
        match &self.backend {
            FilesBackend::Local(handler) => handler.list(headers, query).await,
            FilesBackend::Upstream(proxy) => proxy.list(headers, query).await,
        }
    }

    pub async fn delete(&self, headers: &HeaderMap, query: &QueryPairs, file_id: &str) -> Response {
        match &self.backend {
            FilesBackend::Local(handler) => handler.delete(headers, query, file_id).await,
            FilesBackend::Upstream(proxy) => proxy.delete(headers, query, file_id).await,
        }
    }

    /// Stops the local store's sweep task.
    pub fn close(&self) {
        if let Some(store) = self.store() {
            store.close();
        }
    }
}
