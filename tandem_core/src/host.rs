//! Session hosting across reinitializations.
//!
//! A [`Session`] is single-use: once terminated it cannot be restarted. The
//! host owns the transport and the render surface, and on each
//! (re)initialization opens a fresh channel and builds a fresh session with a
//! fresh identity, handing the recovered surface to the new session.

use std::sync::Arc;

use tandem_env::{PresenceTransport, TandemContext};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::{Session, SessionState};
use crate::surface::RenderSurface;

/// Alias for the session a host runs over transport `T`.
pub type HostedSession<Ctx, T, S> = Session<Ctx, <T as PresenceTransport>::Channel, S>;

/// Owns the current session and rebuilds it on demand.
pub struct SessionHost<Ctx, T, S>
where
    Ctx: TandemContext,
    T: PresenceTransport,
    S: RenderSurface,
{
    context: Arc<Ctx>,
    transport: Arc<T>,
    config: SessionConfig,
    session: Option<HostedSession<Ctx, T, S>>,
    generation: u32,
}

impl<Ctx, T, S> SessionHost<Ctx, T, S>
where
    Ctx: TandemContext,
    T: PresenceTransport,
    S: RenderSurface,
{
    pub fn new(context: Arc<Ctx>, transport: Arc<T>, config: SessionConfig) -> Self {
        Self {
            context,
            transport,
            config,
            session: None,
            generation: 0,
        }
    }

    /// Tears down any current session and starts a new one drawing into `surface`.
    ///
    /// If the new session fails to start it is kept (in `IdentityAssigned`)
    /// so the caller can inspect it or retry with [`retry`](Self::retry).
    pub async fn start(&mut self, surface: S) -> Result<(), SessionError> {
        if let Some(mut old) = self.session.take() {
            old.terminate();
        }

        let channel = self.transport.open(&self.config.topic);
        let mut session = Session::new(Arc::clone(&self.context), channel, self.config.clone())
            .with_surface(surface);
        self.generation += 1;

        let result = session.start().await;
        if result.is_ok() {
            info!(generation = self.generation, "session started");
        }
        self.session = Some(session);
        result
    }

    /// Retries after a recoverable start failure.
    ///
    /// A failed start has already unsubscribed its channel, so the retry
    /// runs on a freshly opened one. An already active session is left alone.
    pub async fn retry(&mut self) -> Result<(), SessionError> {
        match self.session.as_ref().map(|s| s.state()) {
            Some(SessionState::Active) => Ok(()),
            Some(_) => {
                let surface = self
                    .shutdown()
                    .ok_or(SessionError::SurfaceUnavailable)?;
                self.start(surface).await
            }
            None => Err(SessionError::SurfaceUnavailable),
        }
    }

    /// Terminates the current session and starts a new one on the same
    /// surface with a new identity.
    pub async fn reinitialize(&mut self) -> Result<(), SessionError> {
        let surface = self
            .session
            .take()
            .and_then(|mut old| old.terminate())
            .ok_or(SessionError::SurfaceUnavailable)?;
        self.start(surface).await
    }

    /// Terminates the current session and returns its surface.
    pub fn shutdown(&mut self) -> Option<S> {
        self.session.take().and_then(|mut s| s.terminate())
    }

    pub fn session(&self) -> Option<&HostedSession<Ctx, T, S>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut HostedSession<Ctx, T, S>> {
        self.session.as_mut()
    }

    /// Number of sessions built so far.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
