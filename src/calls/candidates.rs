//! Remote ICE candidates and the cache that holds them until the remote
//! session description is in place.
//!
//! Candidates may arrive from the signaling server before the answer they
//! belong to. The inbound pump appends them to a [`CandidateCache`]; the
//! negotiator flushes the cache exactly once, right after the remote
//! description has been applied to the engine.

use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use thiserror::Error;
use tokio::sync::Mutex;

/// An ICE candidate received from the remote peer.
///
/// The format of the candidate string follows RFC 5245, e.g.
/// `candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    candidate: String,
    sdp_mid: String,
    sdp_mline_index: u16,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
        }
    }

    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    /// SDP media stream identification (e.g. "0").
    pub fn sdp_mid(&self) -> &str {
        &self.sdp_mid
    }

    pub fn sdp_mline_index(&self) -> u16 {
        self.sdp_mline_index
    }

    /// Transport address of the candidate, if the string is well formed.
    pub fn endpoint(&self) -> Option<(IpAddr, u16)> {
        parse_candidate_endpoint(&self.candidate)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (sdpMid: {}, sdpMLineIndex: {})",
            self.candidate, self.sdp_mid, self.sdp_mline_index
        )
    }
}

/// Extracts `(address, port)` from a candidate attribute value.
///
/// Accepts both the bare value (`1 1 UDP ...`) and the `candidate:` prefixed
/// form used on the wire.
pub fn parse_candidate_endpoint(candidate: &str) -> Option<(IpAddr, u16)> {
    let value = candidate.strip_prefix("candidate:").unwrap_or(candidate);
    let mut fields = value.split_whitespace();
    // foundation, component, transport, priority, address, port
    let address = fields.nth(4)?.parse().ok()?;
    let port = fields.next()?.parse().ok()?;
    Some((address, port))
}

#[derive(Debug, Error)]
pub enum FlushError<E: std::error::Error + 'static> {
    #[error("candidate cache already flushed")]
    AlreadyFlushed,

    #[error("failed to apply remote candidate {candidate}: {source}")]
    Apply {
        candidate: Candidate,
        #[source]
        source: E,
    },
}

#[derive(Debug, Default)]
struct CacheState {
    pending: VecDeque<Candidate>,
    flushed: bool,
}

/// FIFO buffer of remote candidates that cannot be applied yet.
///
/// All access goes through one async mutex that `flush` holds until the
/// last candidate is applied, so an `add` racing a flush lands either in
/// that flush or after it, never in between.
#[derive(Debug, Default)]
pub struct CandidateCache {
    state: Mutex<CacheState>,
}

impl CandidateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a candidate.
    ///
    /// Returns `false` if the cache was already flushed; the candidate is
    /// dropped and never applied.
    pub async fn add(&self, candidate: Candidate) -> bool {
        let mut state = self.state.lock().await;
        if state.flushed {
            warn!("Dropping remote ICE candidate received after flush: {candidate}");
            return false;
        }
        debug!("Caching remote ICE candidate: {candidate}");
        state.pending.push_back(candidate);
        true
    }

    /// Drains the cache, oldest first, passing each candidate to `apply`.
    ///
    /// Stops at the first failure. A candidate handed to `apply` is consumed
    /// whether or not it succeeded, and the cache counts as flushed either
    /// way. Returns the number of candidates applied.
    pub async fn flush<F, Fut, E>(&self, mut apply: F) -> Result<usize, FlushError<E>>
    where
        F: FnMut(Candidate) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::error::Error + 'static,
    {
        let mut state = self.state.lock().await;
        if state.flushed {
            return Err(FlushError::AlreadyFlushed);
        }
        state.flushed = true;

        let mut applied = 0;
        while let Some(candidate) = state.pending.pop_front() {
            debug!("Adding cached remote ICE candidate: {candidate}");
            if let Err(source) = apply(candidate.clone()).await {
                return Err(FlushError::Apply { candidate, source });
            }
            applied += 1;
        }
        Ok(applied)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_flushed(&self) -> bool {
        self.state.lock().await.flushed
    }
}
