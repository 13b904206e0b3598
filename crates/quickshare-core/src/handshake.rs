//! Handshake driver.
//!
//! Moves [`quickshare_crypto::Handshake`] through its states over a framed
//! connection: exchange `Hello`s, let the user confirm the auth code when
//! trust requires it, then exchange `Confirm` tags. The whole exchange is
//! bounded by one timeout. On any failure the driver sends `Abort` (best
//! effort) and no session keys leave this module.

use crate::error::TransferError;
use crate::frame::{FrameCodec, FrameReader, HandshakeFrame, HandshakeStep, WireFrame, write_frame};
use async_trait::async_trait;
use quickshare_crypto::handshake::HANDSHAKE_VERSION;
use quickshare_crypto::{AuthCode, Handshake, HandshakeFailure, Role, SessionKeys, Trust};
use quickshare_discovery::EndpointId;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

const ABORT_GRACE: Duration = Duration::from_secs(1);

/// How this device introduces itself in `Hello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Endpoint id
    pub endpoint_id: EndpointId,
    /// Display name
    pub device_name: String,
}

/// What the peer said about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Endpoint id
    pub endpoint_id: EndpointId,
    /// Display name
    pub device_name: String,
}

/// Asks the local user to compare auth codes.
#[async_trait]
pub trait PinConfirmer: Send + Sync {
    /// Return whether the code shown for `peer` matches the other screen.
    async fn confirm(&self, peer: &PeerIdentity, code: &AuthCode) -> bool;
}

/// Confirms every code without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl PinConfirmer for AutoConfirm {
    async fn confirm(&self, _peer: &PeerIdentity, _code: &AuthCode) -> bool {
        true
    }
}

/// Inputs for one handshake.
pub struct HandshakeOptions<'a> {
    /// Local identity sent in `Hello`
    pub identity: &'a LocalIdentity,
    /// Trust policy
    pub trust: Trust,
    /// Consulted under [`Trust::Pin`]
    pub confirmer: &'a dyn PinConfirmer,
    /// Bound on the whole exchange
    pub timeout: Duration,
}

/// Result of an authenticated handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Who is on the other end
    pub peer: PeerIdentity,
    /// Fresh keys for this session only
    pub keys: SessionKeys,
    /// Code both devices can display
    pub auth_code: AuthCode,
}

/// Run the handshake for `role`.
///
/// # Errors
///
/// Returns [`TransferError::Handshake`] when the state machine ends in
/// `Failed` (including timeout), or a framing error if the connection
/// breaks. The peer is sent `Abort` unless it aborted first or the
/// connection is gone.
pub async fn perform_handshake<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut W,
    role: Role,
    options: &HandshakeOptions<'_>,
) -> Result<HandshakeOutcome, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut handshake = Handshake::new(role, options.trust.clone())?;

    let result = match tokio::time::timeout(
        options.timeout,
        exchange(&mut handshake, reader, writer, options),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(fail(&mut handshake, HandshakeFailure::Timeout)),
    };

    let peer = match result {
        Ok(peer) => peer,
        Err(err) => {
            if should_abort(&err) {
                send_abort(writer, reader.codec(), &err).await;
            }
            tracing::warn!("Handshake as {:?} failed: {}", role, err);
            return Err(err);
        }
    };

    let auth_code = handshake
        .auth_code()
        .cloned()
        .ok_or(TransferError::Handshake(HandshakeFailure::Interrupted))?;
    let keys = handshake.into_session_keys()?;

    tracing::info!(
        "Handshake with {} ({}) complete, auth code {}, keys {}",
        peer.endpoint_id,
        peer.device_name,
        auth_code,
        hex::encode(keys.fingerprint())
    );

    Ok(HandshakeOutcome {
        peer,
        keys,
        auth_code,
    })
}

async fn exchange<R, W>(
    handshake: &mut Handshake,
    reader: &mut FrameReader<R>,
    writer: &mut W,
    options: &HandshakeOptions<'_>,
) -> Result<PeerIdentity, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let codec = *reader.codec();
    let hello = *handshake.local_hello();
    write_frame(
        writer,
        &codec,
        &handshake_frame(HandshakeStep::Hello {
            public_key: hello.public_key.to_vec(),
            nonce: hello.nonce.to_vec(),
            endpoint_id: options.identity.endpoint_id.to_string(),
            device_name: options.identity.device_name.clone(),
        }),
    )
    .await?;

    let peer = match next_step(handshake, reader).await? {
        HandshakeStep::Hello {
            public_key,
            nonce,
            endpoint_id,
            device_name,
        } => {
            let endpoint_id = EndpointId::parse(&endpoint_id).map_err(|_| {
                fail(
                    handshake,
                    HandshakeFailure::Protocol(format!("invalid endpoint id {endpoint_id:?}")),
                )
            })?;
            handshake
                .receive_hello(&public_key, &nonce)
                .map_err(|_| failure_of(handshake))?;
            PeerIdentity {
                endpoint_id,
                device_name,
            }
        }
        HandshakeStep::Abort { reason } => {
            return Err(fail(handshake, HandshakeFailure::PeerAborted(reason)));
        }
        HandshakeStep::Confirm { .. } => {
            return Err(fail(
                handshake,
                HandshakeFailure::Protocol("confirmation before hello".into()),
            ));
        }
    };

    tracing::debug!("Key exchange with {} done", peer.endpoint_id);

    if handshake.requires_user_confirmation() {
        let code = handshake
            .auth_code()
            .cloned()
            .ok_or_else(|| failure_of(handshake))?;
        let accepted = options.confirmer.confirm(&peer, &code).await;
        handshake
            .confirm_auth_code(accepted)
            .map_err(|_| failure_of(handshake))?;
    }

    let tag = handshake.confirmation_tag()?;
    write_frame(
        writer,
        &codec,
        &handshake_frame(HandshakeStep::Confirm { tag: tag.to_vec() }),
    )
    .await?;

    match next_step(handshake, reader).await? {
        HandshakeStep::Confirm { tag } => handshake
            .verify_peer_confirmation(&tag)
            .map_err(|_| failure_of(handshake))?,
        HandshakeStep::Abort { reason } => {
            return Err(fail(handshake, HandshakeFailure::PeerAborted(reason)));
        }
        HandshakeStep::Hello { .. } => {
            return Err(fail(
                handshake,
                HandshakeFailure::Protocol("duplicate hello".into()),
            ));
        }
    }

    handshake.complete()?;
    Ok(peer)
}

async fn next_step<R: AsyncRead + Unpin>(
    handshake: &mut Handshake,
    reader: &mut FrameReader<R>,
) -> Result<HandshakeStep, TransferError> {
    match reader.read_frame().await? {
        Some(WireFrame::Handshake(frame)) if frame.version == HANDSHAKE_VERSION => Ok(frame.step),
        Some(WireFrame::Handshake(frame)) => Err(fail(
            handshake,
            HandshakeFailure::Protocol(format!("unsupported version {}", frame.version)),
        )),
        Some(_) => Err(fail(
            handshake,
            HandshakeFailure::Protocol("non-handshake frame during handshake".into()),
        )),
        None => Err(TransferError::Closed),
    }
}

fn handshake_frame(step: HandshakeStep) -> WireFrame {
    WireFrame::Handshake(HandshakeFrame {
        version: HANDSHAKE_VERSION,
        step,
    })
}

fn fail(handshake: &mut Handshake, reason: HandshakeFailure) -> TransferError {
    // A handshake that already ended keeps its first verdict
    let _ = handshake.fail(reason.clone());
    TransferError::Handshake(reason)
}

fn failure_of(handshake: &Handshake) -> TransferError {
    TransferError::Handshake(
        handshake
            .failure()
            .cloned()
            .unwrap_or(HandshakeFailure::Interrupted),
    )
}

fn should_abort(err: &TransferError) -> bool {
    !matches!(
        err,
        TransferError::Handshake(HandshakeFailure::PeerAborted(_))
            | TransferError::Closed
            | TransferError::Frame(crate::error::FrameError::Io(_))
    )
}

async fn send_abort<W: AsyncWrite + Unpin>(writer: &mut W, codec: &FrameCodec, err: &TransferError) {
    let abort = handshake_frame(HandshakeStep::Abort {
        reason: err.to_string(),
    });
    if let Ok(Err(e)) = tokio::time::timeout(ABORT_GRACE, write_frame(writer, codec, &abort)).await {
        tracing::debug!("Could not deliver handshake abort: {}", e);
    }
}
