//! The transport-bound link: lifecycle, queues, and handshake glue
//! (spec §3, §4.1-§4.7).

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use tor_cell::chancell::msg;
use tor_cell::chancell::{AnyChanCell, ChanCell, ChanCmd, ChanMsg, CircId};
use tor_error::internal;
use tor_llcrypto::pk::rsa::RsaIdentity;

use crate::config::LinkConfig;
use crate::err::{Error, GuardPolicyVerdict};
use crate::handlers::{CellHandler, ListenerHandler, VarCellHandler};
use crate::handshake::{self, HandshakeEnv, HandshakeState, LinkCert, RsaDerCert};
use crate::id::LinkId;
use crate::queue::{InboundQueue, QueuedCell};
use crate::registry::Registry;
use crate::state::{CloseReason, LinkState};
use crate::transport::{Transport, TransportSubState};
use crate::Result;

/// Link protocol versions this crate offers in its own `VERSIONS` cell.
const SUPPORTED_LINK_PROTOCOLS: [u16; 3] = [2, 3, 4];

/// Identity material a link needs to act past a bare version probe: its
/// own certificate, the `CERTS` cell it offers, and (for a relay) how to
/// answer an `AUTH_CHALLENGE`.
///
/// A link with no `LinkIdentity` can still complete a v2 handshake, or
/// probe link protocols as a v3 initiator; it cannot act as a v3
/// responder or ever send `AUTHENTICATE` (`handshake::HandshakeEnv`'s
/// identity fields stay `None` until this is set).
#[non_exhaustive]
pub struct LinkIdentity {
    /// Our own self-signed `ID_1024` certificate.
    pub cert: RsaDerCert,
    /// The `CERTS` cell we offer: `{ID_1024, TLS_LINK}` for a responder,
    /// `{ID_1024, AUTH_1024}` for an initiator.
    pub certs_cell: msg::Certs,
    /// Whether we hold an `AUTH_1024` certificate and should answer an
    /// `AUTH_CHALLENGE` with `AUTHENTICATE`.
    pub can_authenticate: bool,
    /// Signs an `AUTHENTICATE` fixed part with our `AUTH_1024` private
    /// key.
    pub sign_authenticate: Box<dyn Fn(&[u8]) -> Vec<u8> + Send>,
}

/// The heap allocation shared by every clone of a [`Link`].
struct Shared {
    id: LinkId,
    mutable: Mutex<Mutable>,
}

struct Mutable {
    state: LinkState,
    reason_for_closing: CloseReason,
    started_here: bool,
    initiated_remotely: bool,
    peer_identity: Option<RsaIdentity>,
    nickname: Option<String>,
    is_canonical: bool,
    next_circ_id: u16,
    timestamp_last_nonpadding: Option<SystemTime>,
    refcount: u64,
    registered: bool,
    inbound: InboundQueue,
    outbound: VecDeque<AnyChanCell>,
    incoming: VecDeque<Link>,
    transport: Option<Box<dyn Transport>>,
    transport_substate: TransportSubState,
    real_addr: Option<IpAddr>,
    their_apparent_addr: Option<IpAddr>,
    my_addrs: Vec<IpAddr>,
    config: LinkConfig,
    identity: Option<LinkIdentity>,
    handshake: HandshakeState<RsaDerCert>,
    guard_policy: Option<Box<dyn Fn() -> GuardPolicyVerdict + Send>>,
    guard_verdict: Option<GuardPolicyVerdict>,
    cell_handler: Option<CellHandler>,
    var_cell_handler: Option<VarCellHandler>,
    listener_handler: Option<ListenerHandler>,
}

/// A link: the multiplexed, authenticated connection to one peer relay
/// (spec §3).
///
/// Cloning a `Link` is an `Arc` bump yielding another strong reference to
/// the same state. The registry holds one such reference while a link is
/// registered, and [`Link::hold`] yields another ([`LinkRef`]) for the
/// duration of a callback that might reenter the link; zero strong
/// references naturally drops the link, so there is no separate "free"
/// step to get wrong.
#[derive(Clone)]
pub struct Link(Arc<Shared>);

/// An RAII guard pinning a [`Link`] alive across a reentrant call (spec
/// §4.2/§9's `ref()`/`unref()`).
///
/// Dropping the guard is what releases the pin; there is no separate
/// call to remember.
pub struct LinkRef(Link);

impl std::ops::Deref for LinkRef {
    type Target = Link;
    fn deref(&self) -> &Link {
        &self.0
    }
}

impl Drop for LinkRef {
    fn drop(&mut self) {
        let mut m = self.0.lock();
        m.refcount = m.refcount.saturating_sub(1);
    }
}

/// Fold a circuit-ID seed onto whichever half of the ID space this side
/// of the link was assigned once the peer's identity became known (spec
/// §4.7: circuit-ID allocation is split by comparing identities so both
/// ends never pick the same ID).
fn bind_circ_id_side(seed: u16, high_half: bool) -> u16 {
    let body = seed & 0x7fff;
    if high_half {
        body | 0x8000
    } else {
        body
    }
}

impl Link {
    fn new(started_here: bool, initial_state: LinkState, config: LinkConfig) -> Link {
        use rand::RngCore;
        let mut seed_bytes = [0u8; 2];
        rand::rng().fill_bytes(&mut seed_bytes);
        let next_circ_id = u16::from_be_bytes(seed_bytes) & 0x7fff;

        Link(Arc::new(Shared {
            id: LinkId::next(),
            mutable: Mutex::new(Mutable {
                state: initial_state,
                reason_for_closing: CloseReason::NotClosing,
                started_here,
                initiated_remotely: false,
                peer_identity: None,
                nickname: None,
                is_canonical: false,
                next_circ_id,
                timestamp_last_nonpadding: None,
                refcount: 0,
                registered: false,
                inbound: InboundQueue::new(),
                outbound: VecDeque::new(),
                incoming: VecDeque::new(),
                transport: None,
                transport_substate: TransportSubState::TlsHandshaking,
                real_addr: None,
                their_apparent_addr: None,
                my_addrs: Vec::new(),
                config,
                identity: None,
                handshake: HandshakeState::new(started_here),
                guard_policy: None,
                guard_verdict: None,
                cell_handler: None,
                var_cell_handler: None,
                listener_handler: None,
            }),
        }))
    }

    /// Construct a link opening a connection to a peer (spec §4.1:
    /// `CLOSED -> OPENING`). The caller has already established the
    /// underlying transport and installed its downcalls.
    pub fn new_opening(started_here: bool, config: LinkConfig, transport: Box<dyn Transport>) -> LinkRef {
        let link = Self::new(started_here, LinkState::Opening, config);
        {
            let mut m = link.lock();
            m.real_addr = transport.local_addr().map(|a| a.ip());
            m.their_apparent_addr = transport.remote_addr().map(|a| a.ip());
            m.transport = Some(transport);
        }
        link.hold()
    }

    /// Construct a listening link (spec §4.1: `CLOSED -> LISTENING`).
    pub fn new_listening(config: LinkConfig) -> LinkRef {
        let link = Self::new(false, LinkState::Listening, config);
        link.hold()
    }

    fn lock(&self) -> MutexGuard<'_, Mutable> {
        self.0.mutable.lock().expect("link mutex poisoned")
    }

    /// This link's process-unique identifier.
    pub fn id(&self) -> LinkId {
        self.0.id
    }

    /// The link's current lifecycle state (spec §4.1).
    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    /// Whether we initiated this link (vs. accepted it from a listener).
    pub fn started_here(&self) -> bool {
        self.lock().started_here
    }

    /// The peer's authenticated identity, once the handshake has
    /// established one.
    pub fn peer_identity(&self) -> Option<RsaIdentity> {
        self.lock().peer_identity
    }

    /// Whether this link is considered canonical (spec §4.7).
    pub fn is_canonical(&self) -> bool {
        self.lock().is_canonical
    }

    /// This link's nickname, if one has been set.
    pub fn nickname(&self) -> Option<String> {
        self.lock().nickname.clone()
    }

    /// Set this link's nickname (directory-derived, for logging).
    pub fn set_nickname(&self, nickname: impl Into<String>) {
        self.lock().nickname = Some(nickname.into());
    }

    /// The outstanding count of in-flight callback pins held on this
    /// link (spec §9's `refcount`; distinct from the `Arc` strong
    /// count, which also includes the registry's and any caller's
    /// references).
    pub fn refcount(&self) -> u64 {
        self.lock().refcount
    }

    /// Whether this link is currently registered in the global registry.
    pub fn registered(&self) -> bool {
        self.lock().registered
    }

    /// The guard-reachability verdict recorded when this link last
    /// reached `OPEN`, if any.
    pub fn guard_verdict(&self) -> Option<GuardPolicyVerdict> {
        self.lock().guard_verdict
    }

    /// Install identity material, enabling the v3 responder and
    /// authentication paths.
    pub fn set_identity(&self, identity: LinkIdentity) {
        self.lock().identity = Some(identity);
    }

    /// Install the guard-reachability policy consulted by
    /// [`Link::do_open_actions`] each time this link reaches `OPEN`.
    pub fn set_guard_policy(&self, policy: Box<dyn Fn() -> GuardPolicyVerdict + Send>) {
        self.lock().guard_policy = Some(policy);
    }

    /// Pin this link alive for the duration of a reentrant operation.
    pub fn hold(&self) -> LinkRef {
        self.lock().refcount += 1;
        LinkRef(self.clone())
    }

    /// Add this link to the global registry, classified by its current
    /// state.
    pub fn register(&self) {
        let mut m = self.lock();
        if m.registered {
            return;
        }
        m.registered = true;
        drop(m);
        Registry::with_global(|r| r.insert(self));
    }

    /// Remove this link from the global registry.
    pub fn unregister(&self) {
        let mut m = self.lock();
        if !m.registered {
            return;
        }
        m.registered = false;
        drop(m);
        Registry::with_global(|r| {
            r.remove(self.id());
        });
    }

    /// Move the link to a new state, enforcing the transition table
    /// (spec §4.1) and running whatever side effects that transition
    /// implies.
    ///
    /// `reason` only matters when `to` is in the closing family
    /// (`CLOSING`/`CLOSED`/`ERROR`); pass [`CloseReason::NotClosing`]
    /// otherwise. A transition already carrying a reason from an
    /// earlier call (e.g. `CLOSING` set by `request_close`) keeps that
    /// reason if this call passes `NotClosing`.
    pub fn change_state(&self, to: LinkState, reason: CloseReason) -> Result<()> {
        let mut m = self.lock();
        if !m.state.can_transition_to(to) {
            return Err(internal!(
                "link {} cannot transition from {} to {}",
                self.id(),
                m.state,
                to
            )
            .into());
        }
        if to.is_closing_family() {
            let reason = if reason == CloseReason::NotClosing {
                m.reason_for_closing
            } else {
                reason
            };
            if reason == CloseReason::NotClosing {
                return Err(internal!("transition into {} requires a closing reason", to).into());
            }
            m.reason_for_closing = reason;
        }
        if to == LinkState::Closed {
            debug_assert!(m.inbound.is_empty());
            debug_assert!(m.outbound.is_empty());
            debug_assert!(m.incoming.is_empty());
        }
        m.state = to;
        let registered = m.registered;
        drop(m);
        if registered {
            Registry::with_global(|r| r.reclassify(self.id(), to));
        }
        if to == LinkState::Open {
            self.do_open_actions();
            self.process_cells();
            self.process_incoming();
            self.flush_outbound();
        }
        Ok(())
    }

    /// Run the actions a link performs the moment it reaches `OPEN`:
    /// consult the guard-reachability policy and record its verdict
    /// (spec §4.6). Circuits pending on this link are notified
    /// elsewhere (this crate has no circuit layer of its own).
    fn do_open_actions(&self) {
        let mut m = self.lock();
        let policy = m.guard_policy.take();
        drop(m);
        let verdict = match &policy {
            Some(f) => f(),
            None => GuardPolicyVerdict::Accepted,
        };
        let mut m = self.lock();
        m.guard_policy = policy;
        m.guard_verdict = Some(verdict);
        drop(m);
        match verdict {
            GuardPolicyVerdict::Accepted => {
                tracing::debug!(link = %self.id(), "link open and usable for new circuits");
            }
            GuardPolicyVerdict::Rejected => {
                tracing::info!(
                    link = %self.id(),
                    "link open but rejected by guard policy; circuits will not attach"
                );
            }
        }
    }

    /// Request an orderly close (spec §4.1: `-> CLOSING`, reason
    /// `REQUESTED`), then ask the transport to shut down.
    pub fn request_close(&self) -> Result<()> {
        self.change_state(LinkState::Closing, CloseReason::Requested)?;
        let mut m = self.lock();
        if let Some(transport) = m.transport.as_mut() {
            transport.close();
        }
        Ok(())
    }

    /// The transport reported it is going away on its own (spec §4.1:
    /// `-> CLOSING`, reason `FROM_BELOW`).
    pub fn close_from_lower_layer(&self) -> Result<()> {
        self.change_state(LinkState::Closing, CloseReason::FromBelow)
    }

    /// A protocol or I/O error forces this link closed (spec §4.1:
    /// `-> CLOSING`, reason `FOR_ERROR`).
    pub fn close_for_error(&self) -> Result<()> {
        self.change_state(LinkState::Closing, CloseReason::ForError)
    }

    /// The transport's final close notification: drain the queues and
    /// finish the transition to `CLOSED` (or `ERROR`, if the recorded
    /// reason is `FOR_ERROR`), then leave the registry (spec §4.1).
    pub fn notify_closed(&self) -> Result<()> {
        let mut m = self.lock();
        let reason = m.reason_for_closing;
        m.inbound = InboundQueue::new();
        m.outbound.clear();
        m.incoming.clear();
        drop(m);
        let target = if reason == CloseReason::ForError {
            LinkState::Error
        } else {
            LinkState::Closed
        };
        self.change_state(target, reason)?;
        self.unregister();
        Ok(())
    }

    /// The transport reports it has flushed all outbound data written so
    /// far. This crate keeps no directory-request bookkeeping of its
    /// own; the notification is logged for diagnostics.
    pub fn notify_flushed(&self) {
        tracing::trace!(link = %self.id(), "transport reports outbound flush complete");
    }

    /// Send an initiator's first `VERSIONS` cell. A no-op for a link
    /// that did not initiate (the responder waits to hear from its
    /// peer first).
    pub fn begin_handshake(&self) -> Result<()> {
        let mut m = self.lock();
        if !m.started_here {
            return Ok(());
        }
        let now = SystemTime::now();
        let my_link_protocols = SUPPORTED_LINK_PROTOCOLS;
        let their_apparent_addr = m.their_apparent_addr;
        let my_addrs = m.my_addrs.clone();
        let real_addr = m.real_addr;
        let public_server_mode = m.config.public_server_mode;
        let no_trusted = |_: &RsaIdentity| false;
        let env = HandshakeEnv {
            my_link_protocols: &my_link_protocols,
            public_server_mode,
            can_authenticate: false,
            our_identity_cert: None,
            our_identity: None,
            our_certs_cell: None,
            peer_session_public_key: None,
            sign_authenticate: None,
            is_trusted_directory: &no_trusted,
            their_apparent_addr,
            my_addrs,
            real_addr,
        };
        let m_ref = &mut *m;
        let out = handshake::initiate(&mut m_ref.handshake, &env, now)?;
        drop(m);
        for out_msg in out.to_send {
            self.send_handshake_message(out_msg)?;
        }
        Ok(())
    }

    fn send_handshake_message(&self, msg: msg::AnyChanMsg) -> Result<()> {
        let cmd = msg.cmd();
        let cell = ChanCell::new(None, msg);
        if cmd.is_var_cell() {
            self.write_var_cell(cell)
        } else {
            self.write_cell(cell)
        }
    }

    /// Feed a fixed-length cell the transport read, either into the
    /// handshake engine (pre-`OPEN`) or the inbound queue (`OPEN`).
    pub fn feed_cell(&self, cell: AnyChanCell) -> Result<()> {
        self.feed_any(cell, false)
    }

    /// Feed a variable-length cell the transport read.
    pub fn feed_var_cell(&self, cell: AnyChanCell) -> Result<()> {
        self.feed_any(cell, true)
    }

    fn feed_any(&self, cell: AnyChanCell, is_var: bool) -> Result<()> {
        let now = SystemTime::now();
        let mut m = self.lock();
        if m.transport_substate == TransportSubState::Open {
            drop(m);
            return if is_var {
                self.queue_var_cell(cell)
            } else {
                self.queue_cell(cell)
            };
        }
        let substate = m.transport_substate;
        let (_circ_id, msg) = cell.into_circid_and_msg();

        let my_link_protocols = SUPPORTED_LINK_PROTOCOLS;
        let our_identity = m.identity.as_ref().map(|i| handshake::identity_of(&i.cert));
        let can_authenticate = m.identity.as_ref().is_some_and(|i| i.can_authenticate);
        let our_certs_cell = m.identity.as_ref().map(|i| i.certs_cell.clone());
        let peer_session_public_key = m.transport.as_ref().and_then(|t| t.peer_session_public_key());
        let their_apparent_addr = m.their_apparent_addr;
        let my_addrs = m.my_addrs.clone();
        let real_addr = m.real_addr;
        let public_server_mode = m.config.public_server_mode;
        let trusted_directories = m.config.trusted_directories.clone();
        let is_trusted_directory = move |id: &RsaIdentity| trusted_directories.contains(id);

        let m_ref = &mut *m;
        let sign_fn = m_ref
            .identity
            .as_ref()
            .map(|i| i.sign_authenticate.as_ref() as &dyn Fn(&[u8]) -> Vec<u8>);
        let env = HandshakeEnv {
            my_link_protocols: &my_link_protocols,
            public_server_mode,
            can_authenticate,
            our_identity_cert: m_ref.identity.as_ref().map(|i| &i.cert),
            our_identity,
            our_certs_cell,
            peer_session_public_key,
            sign_authenticate: sign_fn,
            is_trusted_directory: &is_trusted_directory,
            their_apparent_addr,
            my_addrs,
            real_addr,
        };

        let result = handshake::feed(&mut m_ref.handshake, substate, &env, &msg, now);
        match result {
            Ok(out) => {
                if matches!(
                    substate,
                    TransportSubState::TlsHandshaking | TransportSubState::TlsServerRenegotiating
                ) {
                    m_ref.transport_substate = TransportSubState::OrHandshakingV3;
                }
                if let Some(id) = out.peer_identity {
                    if m_ref.peer_identity.is_none() {
                        if let Some(our_identity) = our_identity {
                            let high_half = our_identity.as_bytes() < id.as_bytes();
                            m_ref.next_circ_id = bind_circ_id_side(m_ref.next_circ_id, high_half);
                        }
                    }
                    m_ref.peer_identity = Some(id);
                }
                if let Some(canon) = out.is_canonical {
                    m_ref.is_canonical = canon;
                }
                let to_send = out.to_send;
                let became_open = out.became_open;
                let skew = out.clock_skew_seconds;
                let skew_warn = out.clock_skew_warn;
                drop(m);
                if let Some(skew) = skew {
                    if skew_warn {
                        tracing::warn!(link = %self.id(), skew, "peer clock skew");
                    } else {
                        tracing::info!(link = %self.id(), skew, "peer clock skew");
                    }
                }
                for out_msg in to_send {
                    self.send_handshake_message(out_msg)?;
                }
                if became_open {
                    self.set_transport_state(TransportSubState::Open)?;
                }
                Ok(())
            }
            Err(e) => {
                drop(m);
                tracing::warn!(link = %self.id(), error = %e, "handshake protocol violation; closing link");
                let _ = self.close_for_error();
                Err(e)
            }
        }
    }

    /// Notify the link of a transport sub-state transition (spec
    /// §4.6): entering `Open` drives the link `OPENING`/`MAINT -> OPEN`;
    /// leaving `Open` while the link is `OPEN` drives it to `MAINT`.
    pub fn set_transport_state(&self, new: TransportSubState) -> Result<()> {
        let mut m = self.lock();
        let old = m.transport_substate;
        m.transport_substate = new;
        let link_state = m.state;
        drop(m);
        if new == TransportSubState::Open {
            if matches!(link_state, LinkState::Opening | LinkState::Maint) {
                return self.change_state(LinkState::Open, CloseReason::NotClosing);
            }
        } else if old == TransportSubState::Open && link_state == LinkState::Open {
            return self.change_state(LinkState::Maint, CloseReason::NotClosing);
        }
        Ok(())
    }

    /// Allocate the next outgoing circuit ID, wrapping within whichever
    /// half of the space this side was bound to.
    pub fn allocate_circ_id(&self) -> u32 {
        let mut m = self.lock();
        let side_bit = m.next_circ_id & 0x8000;
        let body = m.next_circ_id & 0x7fff;
        let next_body = body.wrapping_add(1) & 0x7fff;
        m.next_circ_id = side_bit | next_body;
        u32::from(side_bit | body)
    }

    /// Queue a fixed-length cell for the circuit layer, or deliver it
    /// immediately if `cell_handler` is bound and nothing is ahead of it
    /// (spec §4.3).
    pub fn queue_cell(&self, cell: AnyChanCell) -> Result<()> {
        self.ingress(cell, true)
    }

    /// Queue a variable-length cell for the circuit layer (spec §4.3,
    /// §8: ignored, not an error, if the negotiated link protocol is
    /// below 3 and the link is already `OPEN`).
    pub fn queue_var_cell(&self, cell: AnyChanCell) -> Result<()> {
        {
            let m = self.lock();
            if m.handshake.link_proto < 3 {
                return Ok(());
            }
        }
        self.ingress(cell, false)
    }

    fn ingress(&self, cell: AnyChanCell, fixed: bool) -> Result<()> {
        let mut m = self.lock();
        if m.state != LinkState::Open {
            return Err(internal!("queue_cell on a link that is not OPEN").into());
        }
        let handler_bound = if fixed {
            m.cell_handler.is_some()
        } else {
            m.var_cell_handler.is_some()
        };
        if handler_bound && m.inbound.is_empty() {
            let mut handler = if fixed {
                m.cell_handler.take()
            } else {
                m.var_cell_handler.take()
            };
            drop(m);
            let _pin = self.hold();
            if let Some(h) = handler.as_mut() {
                h(self, cell);
            }
            let mut m = self.lock();
            if fixed {
                if m.cell_handler.is_none() {
                    m.cell_handler = handler;
                }
            } else if m.var_cell_handler.is_none() {
                m.var_cell_handler = handler;
            }
            return Ok(());
        }
        m.inbound.push_back(if fixed {
            QueuedCell::Fixed(cell)
        } else {
            QueuedCell::Var(cell)
        });
        drop(m);
        self.process_cells();
        Ok(())
    }

    /// Walk the inbound queue, delivering every entry whose handler is
    /// currently bound (spec §4.3, §5).
    pub fn process_cells(&self) {
        self.process_one_kind(true);
        self.process_one_kind(false);
    }

    fn process_one_kind(&self, fixed: bool) {
        let mut m = self.lock();
        if !matches!(m.state, LinkState::Open | LinkState::Maint | LinkState::Closing) {
            return;
        }
        let handler_present = if fixed {
            m.cell_handler.is_some()
        } else {
            m.var_cell_handler.is_some()
        };
        if !handler_present {
            return;
        }
        let mut delivered = Vec::new();
        m.inbound.drain_matching(fixed, |cell| delivered.push(cell));
        if delivered.is_empty() {
            return;
        }
        let mut handler = if fixed {
            m.cell_handler.take()
        } else {
            m.var_cell_handler.take()
        };
        drop(m);
        let _pin = self.hold();
        if let Some(h) = handler.as_mut() {
            for cell in delivered {
                h(self, cell);
            }
        }
        let mut m = self.lock();
        if fixed {
            if m.cell_handler.is_none() {
                m.cell_handler = handler;
            }
        } else if m.var_cell_handler.is_none() {
            m.var_cell_handler = handler;
        }
    }

    /// Bind or clear the fixed-cell handler, reprocessing the queue if
    /// the new binding can now make progress (spec §4.3).
    pub fn set_cell_handler(&self, handler: Option<CellHandler>) -> Result<()> {
        let mut m = self.lock();
        if !matches!(m.state, LinkState::Opening | LinkState::Open | LinkState::Maint) {
            return Err(internal!("cannot bind a cell handler outside OPENING/OPEN/MAINT").into());
        }
        m.cell_handler = handler;
        let now_bound = m.cell_handler.is_some();
        drop(m);
        if now_bound {
            self.process_cells();
        }
        Ok(())
    }

    /// Bind or clear the variable-cell handler.
    pub fn set_var_cell_handler(&self, handler: Option<VarCellHandler>) -> Result<()> {
        let mut m = self.lock();
        if !matches!(m.state, LinkState::Opening | LinkState::Open | LinkState::Maint) {
            return Err(internal!("cannot bind a cell handler outside OPENING/OPEN/MAINT").into());
        }
        m.var_cell_handler = handler;
        let now_bound = m.var_cell_handler.is_some();
        drop(m);
        if now_bound {
            self.process_cells();
        }
        Ok(())
    }

    /// Bind or clear a listening link's accept handler (spec §4.5).
    pub fn set_listener(&self, handler: Option<ListenerHandler>) -> Result<()> {
        let mut m = self.lock();
        if m.state != LinkState::Listening {
            return Err(internal!("set_listener requires a LISTENING link").into());
        }
        m.listener_handler = handler;
        let now_bound = m.listener_handler.is_some();
        drop(m);
        if now_bound {
            self.process_incoming();
        }
        Ok(())
    }

    /// Queue an accepted connection on a listening link (spec §4.5).
    pub fn queue_incoming(listener: &Link, incoming: Link) -> Result<()> {
        {
            let lm = listener.lock();
            if lm.state != LinkState::Listening {
                return Err(internal!("queue_incoming requires a LISTENING listener").into());
            }
        }
        {
            let im = incoming.lock();
            if im.state == LinkState::Listening {
                return Err(internal!("an incoming link cannot itself be LISTENING").into());
            }
        }
        let mut lm = listener.lock();
        lm.incoming.push_back(incoming);
        let handler_bound = lm.listener_handler.is_some();
        drop(lm);
        if handler_bound {
            listener.process_incoming();
        }
        Ok(())
    }

    /// Deliver queued incoming links to a bound accept handler, marking
    /// each `initiated_remotely` first (spec §4.5). Runs during
    /// `CLOSING` too, so a listener shutting down still hands off
    /// connections it already accepted.
    pub fn process_incoming(&self) {
        loop {
            let mut m = self.lock();
            if !matches!(m.state, LinkState::Listening | LinkState::Closing) {
                return;
            }
            if m.listener_handler.is_none() {
                return;
            }
            let Some(incoming) = m.incoming.pop_front() else {
                return;
            };
            let mut handler = m.listener_handler.take();
            drop(m);
            incoming.lock().initiated_remotely = true;
            let _self_pin = self.hold();
            let _incoming_pin = incoming.hold();
            if let Some(h) = handler.as_mut() {
                h(self, incoming);
            }
            let mut m = self.lock();
            if m.listener_handler.is_none() {
                m.listener_handler = handler;
            }
        }
    }

    /// Write a fixed-length cell, delivering it straight to the
    /// transport when nothing is queued ahead of it (spec §4.4).
    pub fn write_cell(&self, cell: AnyChanCell) -> Result<()> {
        self.egress(cell, false)
    }

    /// Write a variable-length cell.
    pub fn write_var_cell(&self, cell: AnyChanCell) -> Result<()> {
        self.egress(cell, true)
    }

    fn egress(&self, cell: AnyChanCell, is_var: bool) -> Result<()> {
        let mut m = self.lock();
        if !matches!(m.state, LinkState::Opening | LinkState::Open | LinkState::Maint) {
            return Err(internal!("write_cell outside OPENING/OPEN/MAINT").into());
        }
        let cmd = cell.msg().cmd();
        if cmd != ChanCmd::PADDING && cmd != ChanCmd::VPADDING {
            m.timestamp_last_nonpadding = Some(SystemTime::now());
        }
        if m.outbound.is_empty() {
            if let Some(transport) = m.transport.as_mut() {
                return if is_var {
                    transport.write_var_cell(&cell)
                } else {
                    transport.write_cell(&cell)
                };
            }
            return Err(Error::LinkClosed);
        }
        m.outbound.push_back(cell);
        let should_flush = m.state == LinkState::Open;
        drop(m);
        if should_flush {
            self.flush_outbound();
        }
        Ok(())
    }

    fn flush_outbound(&self) {
        loop {
            let mut m = self.lock();
            let Some(cell) = m.outbound.pop_front() else {
                return;
            };
            let Some(transport) = m.transport.as_mut() else {
                m.outbound.push_front(cell);
                return;
            };
            let cmd = cell.msg().cmd();
            let is_var = cmd.is_var_cell();
            let result = if is_var {
                transport.write_var_cell(&cell)
            } else {
                transport.write_cell(&cell)
            };
            drop(m);
            if let Err(e) = result {
                tracing::warn!(link = %self.id(), error = %e, "transport write failed; closing link");
                let _ = self.close_for_error();
                return;
            }
        }
    }

    /// Send a `DESTROY` cell for a circuit (spec §4.4). `reason` is
    /// passed through unchecked (spec §8: an unrecognized reason byte
    /// is sent as-is, not rejected).
    pub fn send_destroy(&self, circ_id: u32, reason: u8) -> Result<()> {
        let cell = ChanCell::new(
            CircId::new(circ_id),
            msg::AnyChanMsg::Destroy(msg::Destroy::new(msg::DestroyReason::from(reason))),
        );
        self.write_cell(cell)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::transport::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        written_fixed: StdMutex<Vec<AnyChanCell>>,
        written_var: StdMutex<Vec<AnyChanCell>>,
        closed: AtomicUsize,
    }

    impl Transport for FakeTransport {
        fn write_cell(&mut self, cell: &AnyChanCell) -> Result<()> {
            self.written_fixed.lock().unwrap().push(clone_cell(cell));
            Ok(())
        }
        fn write_var_cell(&mut self, cell: &AnyChanCell) -> Result<()> {
            self.written_var.lock().unwrap().push(clone_cell(cell));
            Ok(())
        }
        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        fn peer_session_public_key(&self) -> Option<tor_llcrypto::pk::rsa::PublicKey> {
            None
        }
        fn local_addr(&self) -> Option<std::net::SocketAddr> {
            None
        }
        fn remote_addr(&self) -> Option<std::net::SocketAddr> {
            None
        }
    }

    fn clone_cell(cell: &AnyChanCell) -> AnyChanCell {
        // `AnyChanCell` carries no `Clone` impl; padding cells are enough
        // for these tests, so rebuild an equivalent one instead.
        ChanCell::new(cell.circid(), msg::AnyChanMsg::Padding(Default::default()))
    }

    fn padding_cell() -> AnyChanCell {
        ChanCell::new(None, msg::AnyChanMsg::Padding(Default::default()))
    }

    fn opening_link() -> LinkRef {
        Link::new_opening(true, LinkConfig::default(), Box::new(FakeTransport::default()))
    }

    #[test]
    fn opening_link_starts_in_opening_state() {
        let link = opening_link();
        assert_eq!(link.state(), LinkState::Opening);
        assert!(link.started_here());
    }

    #[test]
    fn change_state_rejects_illegal_transitions() {
        let link = opening_link();
        let err = link.change_state(LinkState::Listening, CloseReason::NotClosing);
        assert!(err.is_err());
        assert_eq!(link.state(), LinkState::Opening);
    }

    #[test]
    fn change_state_to_closing_requires_a_reason() {
        let link = opening_link();
        let err = link.change_state(LinkState::Closing, CloseReason::NotClosing);
        assert!(err.is_err());
    }

    #[test]
    fn full_lifecycle_reaches_closed() {
        let link = opening_link();
        link.change_state(LinkState::Open, CloseReason::NotClosing).unwrap();
        assert_eq!(link.state(), LinkState::Open);
        link.request_close().unwrap();
        assert_eq!(link.state(), LinkState::Closing);
        link.notify_closed().unwrap();
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn hold_and_drop_track_refcount() {
        let link = opening_link();
        assert_eq!(link.refcount(), 1); // new_opening's own LinkRef
        let second = link.hold();
        assert_eq!(link.refcount(), 2);
        drop(second);
        assert_eq!(link.refcount(), 1);
    }

    #[test]
    fn register_and_unregister_track_the_global_registry() {
        let link = opening_link();
        link.register();
        assert!(Registry::with_global(|r| r.contains(link.id())));
        link.unregister();
        assert!(!Registry::with_global(|r| r.contains(link.id())));
    }

    #[test]
    fn queue_cell_rejects_cells_before_open() {
        let link = opening_link();
        let err = link.queue_cell(padding_cell());
        assert!(err.is_err());
    }

    #[test]
    fn bound_handler_receives_queued_cells_in_order() {
        let link = opening_link();
        link.change_state(LinkState::Open, CloseReason::NotClosing).unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        link.set_cell_handler(Some(Box::new(move |_l, _c| {
            seen2.lock().unwrap().push(());
        })))
        .unwrap();
        link.queue_cell(padding_cell()).unwrap();
        link.queue_cell(padding_cell()).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn unbound_var_cell_does_not_block_fixed_delivery() {
        let link = opening_link();
        link.change_state(LinkState::Open, CloseReason::NotClosing).unwrap();
        {
            // Force link_proto to 3 so variable cells are not simply ignored.
            let mut m = link.lock();
            m.handshake.link_proto = 3;
        }
        link.queue_var_cell(padding_cell()).unwrap();
        let delivered = Arc::new(StdMutex::new(0));
        let delivered2 = delivered.clone();
        link.set_cell_handler(Some(Box::new(move |_l, _c| {
            *delivered2.lock().unwrap() += 1;
        })))
        .unwrap();
        link.queue_cell(padding_cell()).unwrap();
        assert_eq!(*delivered.lock().unwrap(), 1);
    }

    #[test]
    fn listener_delivers_incoming_links_to_a_bound_handler() {
        let listener = Link::new_listening(LinkConfig::default());
        listener.register();
        let accepted = Arc::new(StdMutex::new(Vec::new()));
        let accepted2 = accepted.clone();
        listener
            .set_listener(Some(Box::new(move |_l, incoming| {
                accepted2.lock().unwrap().push(incoming.id());
            })))
            .unwrap();
        let incoming = opening_link();
        Link::queue_incoming(&listener, incoming.clone()).unwrap();
        assert_eq!(accepted.lock().unwrap().len(), 1);
        assert!(incoming.lock().initiated_remotely);
    }

    #[test]
    fn write_cell_rejects_before_opening_state() {
        let link = Link::new_listening(LinkConfig::default());
        let err = link.write_cell(padding_cell());
        assert!(err.is_err());
    }

    #[test]
    fn write_cell_reaches_the_transport_fast_path() {
        let link = opening_link();
        link.write_cell(padding_cell()).unwrap();
    }

    #[test]
    fn send_destroy_accepts_an_unrecognized_reason_byte() {
        let link = opening_link();
        link.send_destroy(7, 200).unwrap();
    }

    #[test]
    fn allocate_circ_id_increments_without_crossing_its_bound_half() {
        let link = opening_link();
        let first = link.allocate_circ_id();
        let second = link.allocate_circ_id();
        assert_eq!(first & 0x8000, second & 0x8000);
    }
}
